//! Recording source client. The capture device's backend is polled over a
//! paginated, rate-limited HTTP API; recordings are read-only to memoir.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::MemoirError;
use crate::thresholds;

/// One utterance attributed to a raw speaker label. Labels are whatever the
/// upstream diarization produced — frequently "Unknown" for several distinct
/// speaker ids in the same recording.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub speaker_id: String,
    #[serde(default)]
    pub speaker_name: String,
    pub text: String,
}

/// One captured session. Produced by the external source; never mutated here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recording {
    pub id: String,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub transcript_segments: Vec<TranscriptSegment>,
    #[serde(default)]
    pub is_processed: bool,
}

impl Recording {
    /// Full transcript text, for scoring and logging.
    pub fn transcript_text(&self) -> String {
        let mut out = String::new();
        for seg in &self.transcript_segments {
            out.push_str(&seg.text);
            out.push('\n');
        }
        out
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TimeWindow {
    pub since: DateTime<Utc>,
    pub until: DateTime<Utc>,
}

impl TimeWindow {
    pub fn last_hours(hours: i64) -> Self {
        let until = Utc::now();
        Self { since: until - chrono::Duration::hours(hours), until }
    }
}

/// A page of recordings within a time window. Implementations return fewer
/// than `limit` items (possibly zero) on the final page.
#[async_trait]
pub trait RecordingSource: Send + Sync {
    async fn fetch_page(
        &self,
        window: TimeWindow,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Recording>, MemoirError>;
}

#[derive(Clone)]
pub struct SourceConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    /// Raw speaker id that represents the device wearer, if the source
    /// reports one.
    pub self_speaker_id: Option<String>,
    pub client: reqwest::Client,
}

impl SourceConfig {
    /// Returns `None` if `MEMOIR_SOURCE_URL` is not set.
    pub fn from_env() -> Option<Self> {
        let base_url = std::env::var("MEMOIR_SOURCE_URL").ok()?;
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .expect("failed to build source HTTP client");
        Some(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: std::env::var("MEMOIR_SOURCE_KEY").ok(),
            self_speaker_id: std::env::var("MEMOIR_SELF_SPEAKER_ID").ok(),
            client,
        })
    }
}

/// HTTP source: `GET {base}/recordings?since=…&until=…&offset=…&limit=…`.
/// Each page is retried with exponential backoff before the batch aborts.
pub struct HttpRecordingSource {
    cfg: SourceConfig,
}

impl HttpRecordingSource {
    pub fn new(cfg: SourceConfig) -> Self {
        Self { cfg }
    }

    async fn fetch_once(
        &self,
        window: TimeWindow,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Recording>, MemoirError> {
        let url = format!("{}/recordings", self.cfg.base_url);
        let mut req = self.cfg.client.get(&url).query(&[
            ("since", window.since.to_rfc3339()),
            ("until", window.until.to_rfc3339()),
            ("offset", offset.to_string()),
            ("limit", limit.to_string()),
        ]);
        if let Some(ref key) = self.cfg.api_key {
            req = req.header("Authorization", format!("Bearer {key}"));
        }
        let resp = req
            .send()
            .await
            .map_err(|e| MemoirError::Source(format!("fetch failed: {e}")))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(MemoirError::Source(format!("source returned {status}: {body}")));
        }
        resp.json::<Vec<Recording>>()
            .await
            .map_err(|e| MemoirError::Source(format!("source response parse failed: {e}")))
    }
}

#[async_trait]
impl RecordingSource for HttpRecordingSource {
    async fn fetch_page(
        &self,
        window: TimeWindow,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Recording>, MemoirError> {
        let mut backoff = std::time::Duration::from_millis(thresholds::FETCH_BACKOFF_MS);
        let mut last_err = None;
        for attempt in 1..=thresholds::FETCH_RETRIES {
            match self.fetch_once(window, offset, limit).await {
                Ok(page) => {
                    debug!(offset, count = page.len(), "fetched source page");
                    return Ok(page);
                }
                Err(e) => {
                    warn!(attempt, offset, error = %e, "source fetch attempt failed");
                    last_err = Some(e);
                    if attempt < thresholds::FETCH_RETRIES {
                        tokio::time::sleep(backoff).await;
                        backoff *= 2;
                    }
                }
            }
        }
        Err(last_err.unwrap_or_else(|| MemoirError::Source("fetch retries exhausted".into())))
    }
}

/// Stand-in when no source is configured: every fetch fails, which a sync
/// run reports as an aborted batch instead of crashing the service.
pub struct UnconfiguredSource;

#[async_trait]
impl RecordingSource for UnconfiguredSource {
    async fn fetch_page(
        &self,
        _window: TimeWindow,
        _offset: usize,
        _limit: usize,
    ) -> Result<Vec<Recording>, MemoirError> {
        Err(MemoirError::Source("MEMOIR_SOURCE_URL not set".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transcript_text_joins_segments() {
        let rec = Recording {
            id: "r".into(),
            started_at: Utc::now(),
            title: String::new(),
            summary: String::new(),
            transcript_segments: vec![
                TranscriptSegment {
                    speaker_id: "s1".into(),
                    speaker_name: "A".into(),
                    text: "hello".into(),
                },
                TranscriptSegment {
                    speaker_id: "s2".into(),
                    speaker_name: "B".into(),
                    text: "world".into(),
                },
            ],
            is_processed: false,
        };
        assert_eq!(rec.transcript_text(), "hello\nworld\n");
    }

    #[test]
    fn window_spans_requested_hours() {
        let w = TimeWindow::last_hours(6);
        let span = w.until - w.since;
        assert_eq!(span.num_hours(), 6);
    }

    #[test]
    fn recording_deserializes_with_defaults() {
        let rec: Recording = serde_json::from_str(
            r#"{"id":"r1","started_at":"2026-08-01T10:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(rec.id, "r1");
        assert!(rec.transcript_segments.is_empty());
        assert!(!rec.is_processed);
    }
}
