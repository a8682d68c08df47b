//! Ingestion coordinator: fetch → speaker resolution → quality gate →
//! extraction → dedup guard → persist → audit record.
//!
//! Recordings in a batch process concurrently on a bounded worker pool; the
//! stages within one recording are strictly sequential. One recording's
//! failure never aborts the batch. `sync` itself never returns an error —
//! failures surface through the summary's skip counters and the audit log.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::dedup;
use crate::error::MemoirError;
use crate::extract::{consolidate_insight, ExtractedInsight, InsightExtractor};
use crate::handoff::TaskSink;
use crate::perf::{timed, timed_sync, StageTimings};
use crate::quality::score_recording;
use crate::source::{Recording, RecordingSource, TimeWindow};
use crate::speakers::resolve_speakers;
use crate::store::{kv_key, MemoryInput, ProcessingRecord};
use crate::thresholds;
use crate::util::short_id;
use crate::{store_call, SharedStore};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncSummary {
    pub run_id: String,
    pub recordings_seen: usize,
    pub recordings_processed: usize,
    pub recordings_skipped: usize,
    pub memories_created: usize,
    pub tasks_created: usize,
}

#[derive(Debug, Serialize)]
pub struct SyncStatus {
    pub pending_runs: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_summary: Option<SyncSummary>,
}

/// Terminal state of one recording's trip through the pipeline.
#[derive(Debug)]
enum Outcome {
    Persisted { tasks_created: usize },
    SkippedLowQuality,
    SkippedDuplicate,
    ExtractionFailed,
    EmptyInsight,
    PersistFailed,
}

impl Outcome {
    fn label(&self) -> &'static str {
        match self {
            Self::Persisted { .. } => "persisted",
            Self::SkippedLowQuality => "skipped_low_quality",
            Self::SkippedDuplicate => "skipped_duplicate",
            Self::ExtractionFailed => "extraction_failed",
            Self::EmptyInsight => "empty_insight",
            Self::PersistFailed => "persist_failed",
        }
    }

    /// Everything except a failed persist marks the recording processed.
    /// A persist failure leaves it unmarked so a future run retries.
    fn marks_processed(&self) -> bool {
        !matches!(self, Self::PersistFailed)
    }
}

#[derive(Clone)]
pub struct IngestConfig {
    pub owner_id: String,
    /// Raw speaker id of the device wearer, when the source reports one.
    pub self_speaker_id: Option<String>,
    pub page_size: usize,
    pub page_delay_ms: u64,
    pub worker_limit: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            owner_id: "default".into(),
            self_speaker_id: None,
            page_size: thresholds::FETCH_PAGE_SIZE,
            page_delay_ms: thresholds::FETCH_PAGE_DELAY_MS,
            worker_limit: thresholds::WORKER_LIMIT,
        }
    }
}

fn processed_key(recording_id: &str) -> String {
    kv_key("recording", "processed", recording_id)
}

fn pending_key() -> String {
    kv_key("sync", "pending", "global")
}

fn last_summary_key() -> String {
    kv_key("sync", "last_summary", "global")
}

pub struct Coordinator {
    store: SharedStore,
    source: Arc<dyn RecordingSource>,
    extractor: Option<Arc<dyn InsightExtractor>>,
    sink: Arc<dyn TaskSink>,
    cfg: IngestConfig,
}

impl Coordinator {
    pub fn new(
        store: SharedStore,
        source: Arc<dyn RecordingSource>,
        extractor: Option<Arc<dyn InsightExtractor>>,
        sink: Arc<dyn TaskSink>,
        cfg: IngestConfig,
    ) -> Self {
        Self { store, source, extractor, sink, cfg }
    }

    /// Run one sync over the window and return the completed summary.
    ///
    /// Awaiting callers (the scheduled loop, tests) get full counts; the
    /// manual HTTP trigger spawns this and answers immediately, so no
    /// user-facing request ever waits on AI latency. Safe to run
    /// concurrently with itself — the marker reserve is atomic.
    pub async fn sync(self: &Arc<Self>, window: TimeWindow) -> SyncSummary {
        self.sync_run(window, uuid::Uuid::new_v4().to_string()).await
    }

    /// Like `sync`, with a caller-chosen run id (the manual trigger hands
    /// the id back before the run finishes).
    pub async fn sync_run(self: &Arc<Self>, window: TimeWindow, run_id: String) -> SyncSummary {
        let mut summary = SyncSummary { run_id, ..Default::default() };
        info!(run = %short_id(&summary.run_id), "sync starting");

        let _ = store_call(&self.store, |s| {
            let _ = s.kv_purge_expired();
            s.kv_incr(&pending_key(), thresholds::SYNC_PENDING_TTL_SECS)
        })
        .await;

        let sem = Arc::new(Semaphore::new(self.cfg.worker_limit.max(1)));
        let mut workers: JoinSet<(String, Outcome)> = JoinSet::new();
        let mut offset = 0usize;

        loop {
            let page = match self.source.fetch_page(window, offset, self.cfg.page_size).await {
                Ok(page) => page,
                Err(e) => {
                    // Retries already exhausted inside the source. Abort the
                    // rest of the batch; work already spawned still lands.
                    warn!(run = %short_id(&summary.run_id), error = %e, "fetch aborted batch");
                    break;
                }
            };
            let page_len = page.len();
            summary.recordings_seen += page_len;

            for recording in page {
                if self.already_processed(&recording).await {
                    // Every scheduled poll re-sees these; keep the noise down.
                    debug!(recording = %short_id(&recording.id), "already processed, skipping");
                    summary.recordings_skipped += 1;
                    continue;
                }
                let this = self.clone();
                let sem = sem.clone();
                workers.spawn(async move {
                    let _permit = sem.acquire_owned().await.expect("semaphore closed");
                    let id = recording.id.clone();
                    let outcome = this.process_recording(recording).await;
                    (id, outcome)
                });
            }

            if page_len < self.cfg.page_size {
                break;
            }
            offset += self.cfg.page_size;
            // The source rate-limits; pace ourselves between pages.
            tokio::time::sleep(std::time::Duration::from_millis(self.cfg.page_delay_ms)).await;
        }

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok((id, outcome)) => {
                    debug!(recording = %short_id(&id), outcome = outcome.label(), "recording finished");
                    match outcome {
                        Outcome::Persisted { tasks_created } => {
                            summary.recordings_processed += 1;
                            summary.memories_created += 1;
                            summary.tasks_created += tasks_created;
                        }
                        Outcome::ExtractionFailed | Outcome::EmptyInsight => {
                            summary.recordings_processed += 1;
                        }
                        Outcome::SkippedLowQuality
                        | Outcome::SkippedDuplicate
                        | Outcome::PersistFailed => {
                            summary.recordings_skipped += 1;
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "pipeline worker panicked");
                    summary.recordings_skipped += 1;
                }
            }
        }

        let done = summary.clone();
        let _ = store_call(&self.store, move |s| {
            if let Ok(json) = serde_json::to_string(&done) {
                let _ = s.kv_put(&last_summary_key(), &json, None);
            }
            s.kv_decr(&pending_key())
        })
        .await;

        info!(
            run = %short_id(&summary.run_id),
            seen = summary.recordings_seen,
            processed = summary.recordings_processed,
            skipped = summary.recordings_skipped,
            memories = summary.memories_created,
            tasks = summary.tasks_created,
            "sync complete"
        );
        summary
    }

    async fn already_processed(&self, recording: &Recording) -> bool {
        if recording.is_processed {
            return true;
        }
        let key = processed_key(&recording.id);
        store_call(&self.store, move |s| s.kv_exists(&key))
            .await
            .and_then(|r| r)
            .unwrap_or(false)
    }

    /// Run one recording through the pipeline to a terminal state. Stages
    /// are strictly sequential; each is timed into the audit record.
    async fn process_recording(&self, recording: Recording) -> Outcome {
        let mut timings = StageTimings::new();

        let self_id = self.cfg.self_speaker_id.clone();
        let speakers = timed_sync(&mut timings, "speaker_resolution", || {
            resolve_speakers(&recording.transcript_segments, self_id.as_deref())
        });

        let quality = timed_sync(&mut timings, "quality_filter", || score_recording(&recording));

        let outcome = if !quality.should_memorize {
            debug!(
                recording = %short_id(&recording.id),
                score = format!("{:.1}", quality.score),
                "below quality gate"
            );
            // Explicit zero so monitoring can tell "skipped" from "missing".
            timings.record("extraction", 0.0);
            Outcome::SkippedLowQuality
        } else {
            match self.extractor.clone() {
                None => {
                    warn!(
                        recording = %short_id(&recording.id),
                        "no extractor configured, marking processed without a memory"
                    );
                    Outcome::ExtractionFailed
                }
                Some(extractor) => {
                    let extracted =
                        timed(&mut timings, "extraction", extractor.extract(&recording, &speakers))
                            .await;
                    match extracted {
                        Err(e) => {
                            warn!(recording = %recording.id, error = %e, "extraction failed");
                            Outcome::ExtractionFailed
                        }
                        Ok(insight) => match consolidate_insight(&recording, &insight) {
                            None => {
                                debug!(recording = %short_id(&recording.id), "nothing worth keeping");
                                Outcome::EmptyInsight
                            }
                            Some(draft) => {
                                let persist = self.persist(&recording, draft, &insight);
                                timed(&mut timings, "persistence", persist).await
                            }
                        },
                    }
                }
            }
        };

        self.finish(&recording, outcome, timings).await
    }

    /// Reserve the idempotency marker, insert the memory, hand off tasks.
    async fn persist(
        &self,
        recording: &Recording,
        draft: crate::extract::MemoryDraft,
        insight: &ExtractedInsight,
    ) -> Outcome {
        let rid = recording.id.clone();
        let reserved = store_call(&self.store, move |s| dedup::reserve(s, &rid)).await;
        match reserved {
            Ok(Ok(true)) => {}
            Ok(Ok(false)) => {
                debug!(recording = %short_id(&recording.id), "duplicate, marker already present");
                return Outcome::SkippedDuplicate;
            }
            Ok(Err(e)) | Err(e) => {
                warn!(recording = %recording.id, error = %e, "marker reserve failed");
                return Outcome::PersistFailed;
            }
        }

        let input = MemoryInput::new(self.cfg.owner_id.clone(), draft.content)
            .kind(draft.kind)
            .importance(draft.importance)
            .people(draft.people_mentioned)
            .recording(recording.id.clone())
            .skip_deduplication();
        let inserted = store_call(&self.store, move |s| s.insert_recording_memory(input)).await;

        match inserted {
            Ok(Ok(Some(memory))) => {
                info!(
                    recording = %short_id(&recording.id),
                    memory = %short_id(&memory.id),
                    people = memory.people_mentioned.len(),
                    "memory created"
                );
                let tasks_created = self.hand_off(insight).await;
                Outcome::Persisted { tasks_created }
            }
            Ok(Ok(None)) => {
                // The unique index caught what the marker couldn't see
                // (e.g. marker expired but the memory survived).
                debug!(recording = %short_id(&recording.id), "memory already exists");
                Outcome::SkippedDuplicate
            }
            Ok(Err(e)) | Err(e) => {
                warn!(recording = %recording.id, error = %e, "memory persist failed");
                let rid = recording.id.clone();
                let _ = store_call(&self.store, move |s| dedup::release(s, &rid)).await;
                Outcome::PersistFailed
            }
        }
    }

    /// Fire-and-forget hand-off of tasks and events. Failures are logged
    /// and simply not counted — delivery retry is the receiving system's job.
    async fn hand_off(&self, insight: &ExtractedInsight) -> usize {
        let mut created = 0;
        for task in &insight.tasks {
            match self.sink.create_task(&self.cfg.owner_id, task).await {
                Ok(()) => created += 1,
                Err(e) => warn!(task = %task.description, error = %e, "task hand-off failed"),
            }
        }
        for event in &insight.events {
            if let Err(e) = self.sink.create_event(&self.cfg.owner_id, event).await {
                warn!(event = %event.description, error = %e, "event hand-off failed");
            }
        }
        created
    }

    /// Mark processed-ness and append the audit record.
    async fn finish(
        &self,
        recording: &Recording,
        outcome: Outcome,
        timings: StageTimings,
    ) -> Outcome {
        let mut record = ProcessingRecord::new(recording.id.clone(), outcome.label());
        record.stage_timings = timings.into_map();
        if let Outcome::Persisted { tasks_created } = &outcome {
            record.memories_created = 1;
            record.tasks_created = *tasks_created;
        }

        let mark = outcome.marks_processed();
        let key = processed_key(&recording.id);
        let label = outcome.label().to_string();
        let appended = store_call(&self.store, move |s| {
            if mark {
                s.kv_put(&key, &label, Some(thresholds::PROCESSED_TTL_SECS))?;
            }
            s.append_processing(&record)
        })
        .await;
        if let Ok(Err(e)) | Err(e) = appended {
            warn!(recording = %recording.id, error = %e, "audit record append failed");
        }
        outcome
    }

    /// Operator escape hatch: clear the processed flag and the idempotency
    /// marker so the next sync reprocesses this recording from scratch.
    pub async fn force_reprocess(&self, recording_id: &str) -> Result<(), MemoirError> {
        let key = processed_key(recording_id);
        let rid = recording_id.to_string();
        store_call(&self.store, move |s| {
            s.kv_delete(&key)?;
            dedup::release(s, &rid)
        })
        .await??;
        info!(recording = %recording_id, "cleared for reprocessing");
        Ok(())
    }

    pub async fn status(&self) -> Result<SyncStatus, MemoirError> {
        let (pending, last) = store_call(&self.store, |s| {
            let pending = s
                .kv_get(&pending_key())
                .ok()
                .flatten()
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(0);
            let last = s.kv_get(&last_summary_key()).ok().flatten();
            (pending, last)
        })
        .await?;
        Ok(SyncStatus {
            pending_runs: pending,
            last_summary: last.and_then(|json| serde_json::from_str(&json).ok()),
        })
    }
}
