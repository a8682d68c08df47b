/// Policy constants for the ingestion pipeline.
///
/// The quality threshold and synthesized-label ordering are tuning choices,
/// not contracts — they live here so they can be audited in one place.

/// Quality score (0-10) at or above which a recording earns an extraction call.
pub const MEMORIZE_THRESHOLD: f64 = 5.0;

/// First ordinal used for synthesized speaker labels ("Speaker 0").
pub const SPEAKER_ORDINAL_BASE: usize = 0;

/// Idempotency marker retention, seconds. After expiry, reprocessing the
/// same recording id is treated as new — bounded staleness, not a bug.
pub const MARKER_TTL_SECS: i64 = 30 * 24 * 3600;

/// Locally-tracked processed flag for recordings, same retention window.
pub const PROCESSED_TTL_SECS: i64 = 30 * 24 * 3600;

/// Pending-sync counter TTL. A crashed run stops looking "in flight" after this.
pub const SYNC_PENDING_TTL_SECS: i64 = 5 * 60;

/// Recordings fetched per page from the source (upstream is rate-limited).
pub const FETCH_PAGE_SIZE: usize = 50;

/// Delay between source pages, milliseconds.
pub const FETCH_PAGE_DELAY_MS: u64 = 250;

/// Fetch attempts per page before the batch aborts.
pub const FETCH_RETRIES: u32 = 3;

/// Base backoff between fetch retries, doubled per attempt.
pub const FETCH_BACKOFF_MS: u64 = 500;

/// Concurrent per-recording pipeline workers.
pub const WORKER_LIMIT: usize = 4;

/// Hard cap on one extraction call, seconds. Timeout counts as failure.
pub const EXTRACT_TIMEOUT_SECS: u64 = 60;

/// A stage consuming more than this share of mean per-recording time is
/// flagged as the bottleneck.
pub const BOTTLENECK_SHARE: f64 = 0.30;

/// Jaccard overlap above which a manual memory counts as a near-duplicate.
pub const MANUAL_DEDUP_SIM: f64 = 0.65;

/// Default sync window when the caller gives none, hours.
pub const DEFAULT_SYNC_WINDOW_HOURS: i64 = 24;
