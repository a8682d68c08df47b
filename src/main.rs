//! memoir — recording ingestion and memory consolidation engine.
//! Polls a wearable capture source, turns worthwhile recordings into
//! exactly one memory each, and serves a small monitoring/CRUD API.

use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use memoir::extract::{InsightExtractor, LlmExtractor};
use memoir::handoff::{HttpTaskSink, NullTaskSink, SinkConfig, TaskSink};
use memoir::ingest::{Coordinator, IngestConfig};
use memoir::source::{HttpRecordingSource, RecordingSource, SourceConfig, TimeWindow, UnconfiguredSource};
use memoir::store::Store;
use memoir::{ai, api, AppState, SharedStore};

#[derive(Parser)]
#[command(name = "memoir", version, about = "Recording ingestion and memory consolidation engine")]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "3921", env = "MEMOIR_PORT")]
    port: u16,

    /// SQLite database path
    #[arg(short, long, default_value = "memoir.db", env = "MEMOIR_DB")]
    db: String,

    /// Owner id memories are filed under
    #[arg(long, default_value = "default", env = "MEMOIR_OWNER_ID")]
    owner: String,

    /// Minutes between scheduled syncs (0 disables the background loop)
    #[arg(long, default_value = "10", env = "MEMOIR_SYNC_MINS")]
    sync_mins: u64,

    /// Hours of history each scheduled sync covers
    #[arg(long, default_value = "24", env = "MEMOIR_SYNC_WINDOW_HOURS")]
    window_hours: i64,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = Args::parse();
    let store: SharedStore = Arc::new(Store::open(&args.db).expect("failed to open database"));

    let ai_cfg = ai::AiConfig::from_env();
    let ai_status = match &ai_cfg {
        Some(cfg) => format!("model={}", cfg.model_for_extract()),
        None => "disabled".into(),
    };
    let extractor = ai_cfg
        .map(|cfg| Arc::new(LlmExtractor::new(cfg, store.clone())) as Arc<dyn InsightExtractor>);

    let source_cfg = SourceConfig::from_env();
    let source_status = if source_cfg.is_some() { "configured" } else { "disabled" };
    let self_speaker_id = source_cfg.as_ref().and_then(|c| c.self_speaker_id.clone());
    let source: Arc<dyn RecordingSource> = match source_cfg {
        Some(cfg) => Arc::new(HttpRecordingSource::new(cfg)),
        None => {
            warn!("MEMOIR_SOURCE_URL not set — sync runs will abort until configured");
            Arc::new(UnconfiguredSource)
        }
    };

    let sink: Arc<dyn TaskSink> = match SinkConfig::from_env() {
        Some(cfg) => Arc::new(HttpTaskSink::new(cfg)),
        None => Arc::new(NullTaskSink),
    };

    let coordinator = Arc::new(Coordinator::new(
        store.clone(),
        source,
        extractor,
        sink,
        IngestConfig {
            owner_id: args.owner.clone(),
            self_speaker_id,
            ..Default::default()
        },
    ));

    let api_key = std::env::var("MEMOIR_API_KEY").ok();
    let auth_status = if api_key.is_some() { "enabled" } else { "disabled" };

    let state = AppState {
        store: store.clone(),
        coordinator: coordinator.clone(),
        api_key,
        started_at: std::time::Instant::now(),
    };
    let app = api::router(state);

    // Scheduled sync — the background path; the manual path is POST /sync.
    // Both converge on the same coordinator and are safe to overlap.
    if args.sync_mins > 0 && source_status == "configured" {
        let bg = coordinator.clone();
        let window_hours = args.window_hours;
        let interval = std::time::Duration::from_secs(args.sync_mins.saturating_mul(60));
        tokio::spawn(async move {
            // wait a bit before first run so startup isn't slowed
            tokio::time::sleep(std::time::Duration::from_secs(30)).await;
            loop {
                let summary = bg.sync(TimeWindow::last_hours(window_hours)).await;
                if summary.memories_created > 0 || summary.recordings_processed > 0 {
                    info!(
                        memories = summary.memories_created,
                        processed = summary.recordings_processed,
                        "scheduled sync"
                    );
                }
                tokio::time::sleep(interval).await;
            }
        });
        info!(every_mins = args.sync_mins, window_hours = args.window_hours, "scheduled sync enabled");
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = args.port,
        db = %args.db,
        ai = %ai_status,
        source = source_status,
        auth = auth_status,
        "memoir starting"
    );

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");
}

async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
    info!("shutting down");
}
