//! memoir — recording ingestion and memory consolidation engine.
//! Wearable captures in, one deduplicated memory per worthwhile recording out.

pub mod ai;
pub mod api;
pub mod dedup;
pub mod error;
pub mod extract;
pub mod handoff;
pub mod ingest;
pub mod perf;
pub mod prompts;
pub mod quality;
pub mod source;
pub mod speakers;
pub mod store;
pub mod thresholds;
pub mod util;

use std::sync::Arc;

pub type SharedStore = Arc<store::Store>;

/// Run a blocking store operation on tokio's blocking thread pool.
///
/// All synchronous SQLite calls in async context MUST go through this
/// to avoid starving tokio worker threads.
pub async fn store_call<F, T>(store: &SharedStore, f: F) -> Result<T, error::MemoirError>
where
    F: FnOnce(&store::Store) -> T + Send + 'static,
    T: Send + 'static,
{
    let store = Arc::clone(store);
    tokio::task::spawn_blocking(move || f(&store))
        .await
        .map_err(|e| error::MemoirError::Internal(e.to_string()))
}

#[derive(Clone)]
pub struct AppState {
    pub store: SharedStore,
    pub coordinator: Arc<ingest::Coordinator>,
    pub api_key: Option<String>,
    pub started_at: std::time::Instant,
}
