//! Hand-off of extracted tasks and events to external task/calendar
//! systems. Responsibility ends at delivering a well-formed payload —
//! delivery confirmation and retries belong to the receiving system.

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use crate::error::MemoirError;
use crate::extract::{ExtractedEvent, ExtractedTask};

#[async_trait]
pub trait TaskSink: Send + Sync {
    async fn create_task(&self, owner_id: &str, task: &ExtractedTask) -> Result<(), MemoirError>;
    async fn create_event(&self, owner_id: &str, event: &ExtractedEvent) -> Result<(), MemoirError>;
}

/// Standalone deployments: accept and drop, loudly enough to trace.
pub struct NullTaskSink;

#[async_trait]
impl TaskSink for NullTaskSink {
    async fn create_task(&self, owner_id: &str, task: &ExtractedTask) -> Result<(), MemoirError> {
        debug!(owner = %owner_id, task = %task.description, "no task sink configured, dropping");
        Ok(())
    }

    async fn create_event(&self, owner_id: &str, event: &ExtractedEvent) -> Result<(), MemoirError> {
        debug!(owner = %owner_id, event = %event.description, "no task sink configured, dropping");
        Ok(())
    }
}

#[derive(Clone)]
pub struct SinkConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub client: reqwest::Client,
}

impl SinkConfig {
    /// Returns `None` if `MEMOIR_TASKS_URL` is not set.
    pub fn from_env() -> Option<Self> {
        let base_url = std::env::var("MEMOIR_TASKS_URL").ok()?;
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()
            .expect("failed to build task sink HTTP client");
        Some(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: std::env::var("MEMOIR_TASKS_KEY").ok(),
            client,
        })
    }
}

/// POSTs tasks to `{base}/tasks` and events to `{base}/events`.
pub struct HttpTaskSink {
    cfg: SinkConfig,
}

impl HttpTaskSink {
    pub fn new(cfg: SinkConfig) -> Self {
        Self { cfg }
    }

    async fn post<T: Serialize>(&self, path: &str, body: &T) -> Result<(), MemoirError> {
        let url = format!("{}/{path}", self.cfg.base_url);
        let mut req = self.cfg.client.post(&url).json(body);
        if let Some(ref key) = self.cfg.api_key {
            req = req.header("Authorization", format!("Bearer {key}"));
        }
        let resp = req
            .send()
            .await
            .map_err(|e| MemoirError::Internal(format!("task sink request failed: {e}")))?;
        if !resp.status().is_success() {
            return Err(MemoirError::Internal(format!(
                "task sink returned {}",
                resp.status()
            )));
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct TaskPayload<'a> {
    owner_id: &'a str,
    description: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    due_date: Option<&'a str>,
    source: &'a str,
}

#[derive(Serialize)]
struct EventPayload<'a> {
    owner_id: &'a str,
    description: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    when: Option<&'a str>,
}

#[async_trait]
impl TaskSink for HttpTaskSink {
    async fn create_task(&self, owner_id: &str, task: &ExtractedTask) -> Result<(), MemoirError> {
        self.post(
            "tasks",
            &TaskPayload {
                owner_id,
                description: &task.description,
                due_date: task.due_date.as_deref(),
                source: "recording_pipeline",
            },
        )
        .await
    }

    async fn create_event(&self, owner_id: &str, event: &ExtractedEvent) -> Result<(), MemoirError> {
        self.post(
            "events",
            &EventPayload {
                owner_id,
                description: &event.description,
                when: event.when.as_deref(),
            },
        )
        .await
    }
}
