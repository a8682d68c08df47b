//! Read-only monitoring endpoints consumed by the dashboard.

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;

use crate::error::MemoirError;
use crate::perf::{self, PerfSummary};
use crate::store::ProcessingRecord;
use crate::{store_call, AppState};

pub(super) async fn index() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "service": "memoir",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub(super) async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "ok": true,
        "uptime_secs": state.started_at.elapsed().as_secs(),
    }))
}

pub(super) async fn stats(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, MemoirError> {
    let (memories, db_bytes) = store_call(&state.store, |s| {
        (s.memory_count().unwrap_or(0), s.db_size_bytes())
    })
    .await?;
    let status = state.coordinator.status().await?;
    Ok(Json(serde_json::json!({
        "memories": memories,
        "db_size_bytes": db_bytes,
        "pending_sync_runs": status.pending_runs,
    })))
}

#[derive(Deserialize)]
pub(super) struct ProcessingQuery {
    limit: Option<usize>,
}

pub(super) async fn list_processing(
    State(state): State<AppState>,
    Query(q): Query<ProcessingQuery>,
) -> Result<Json<Vec<ProcessingRecord>>, MemoirError> {
    let limit = q.limit.unwrap_or(50).min(500);
    let records = store_call(&state.store, move |s| s.list_processing(limit)).await??;
    Ok(Json(records))
}

#[derive(Deserialize)]
pub(super) struct PerfQuery {
    hours: Option<i64>,
}

pub(super) async fn perf_summary(
    State(state): State<AppState>,
    Query(q): Query<PerfQuery>,
) -> Result<Json<PerfSummary>, MemoirError> {
    let hours = q.hours.unwrap_or(24).clamp(1, 24 * 30);
    let cutoff = crate::store::now_ms() - hours * 3_600_000;
    let records = store_call(&state.store, move |s| s.processing_since(cutoff)).await??;
    Ok(Json(perf::summarize(&records)))
}
