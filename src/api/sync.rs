//! Manual sync trigger. The request returns as soon as the run is spawned —
//! the pipeline's AI latency never blocks whoever pressed the button.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use tracing::info;

use crate::error::MemoirError;
use crate::ingest::SyncStatus;
use crate::source::TimeWindow;
use crate::thresholds::DEFAULT_SYNC_WINDOW_HOURS;
use crate::util::short_id;
use crate::AppState;

#[derive(Deserialize, Default)]
pub(super) struct SyncBody {
    hours: Option<i64>,
}

pub(super) async fn trigger_sync(
    State(state): State<AppState>,
    body: Option<Json<SyncBody>>,
) -> (StatusCode, Json<serde_json::Value>) {
    let hours = body
        .and_then(|Json(b)| b.hours)
        .unwrap_or(DEFAULT_SYNC_WINDOW_HOURS)
        .clamp(1, 24 * 90);
    let window = TimeWindow::last_hours(hours);
    let run_id = uuid::Uuid::new_v4().to_string();

    let coordinator = state.coordinator.clone();
    let spawned_run = run_id.clone();
    tokio::spawn(async move {
        coordinator.sync_run(window, spawned_run).await;
    });

    info!(run = %short_id(&run_id), hours, "manual sync queued");
    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "run_id": run_id, "window_hours": hours })),
    )
}

pub(super) async fn sync_status(
    State(state): State<AppState>,
) -> Result<Json<SyncStatus>, MemoirError> {
    Ok(Json(state.coordinator.status().await?))
}

pub(super) async fn reprocess_recording(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, MemoirError> {
    state.coordinator.force_reprocess(&id).await?;
    Ok(Json(serde_json::json!({ "cleared": true, "recording_id": id })))
}
