//! HTTP surface: sync trigger, memory CRUD, monitoring. Read-only consumers
//! (dashboards) hit /processing and /perf; nothing here renders UI.

use axum::extract::State;
use axum::http::Request;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use subtle::ConstantTimeEq;
use tower_http::limit::RequestBodyLimitLayer;

use crate::error::MemoirError;
use crate::AppState;

mod memory;
mod monitor;
mod sync;

use memory::*;
use monitor::*;
use sync::*;

/// Auth middleware: checks Bearer token if MEMOIR_API_KEY is configured.
async fn require_auth(
    State(state): State<AppState>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, MemoirError> {
    let Some(ref expected) = state.api_key else {
        return Ok(next.run(req).await);
    };

    let unauthorized = || MemoirError::Unauthorized;

    let header = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(unauthorized)?;

    let token = header.strip_prefix("Bearer ").ok_or_else(unauthorized)?;

    // constant-time comparison to prevent timing attacks
    if token.as_bytes().ct_eq(expected.as_bytes()).into() {
        Ok(next.run(req).await)
    } else {
        Err(unauthorized())
    }
}

pub fn router(state: AppState) -> Router {
    let public = Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/stats", get(stats));

    let protected = Router::new()
        .route("/sync", post(trigger_sync))
        .route("/sync/status", get(sync_status))
        .route("/memories", post(create_memory).get(list_memories))
        .route(
            "/memories/{id}",
            get(get_memory).patch(update_memory).delete(delete_memory),
        )
        .route("/processing", get(list_processing))
        .route("/perf", get(perf_summary))
        .route("/recordings/{id}/reprocess", post(reprocess_recording))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    public
        .merge(protected)
        .layer(RequestBodyLimitLayer::new(256 * 1024))
        .with_state(state)
}
