//! SQLite-backed store: TTL key-value markers, durable memory records,
//! append-only processing audit.

mod kv;
mod memory;
mod processing;

pub use kv::kv_key;
pub use memory::{Memory, MemoryInput, MemoryKind, MemorySource, PersonMention};
pub use processing::ProcessingRecord;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::error::MemoirError;

/// Set busy_timeout on every connection handed out by the pool.
/// Prevents SQLITE_BUSY under concurrent write pressure (sync workers + API).
#[derive(Debug)]
struct BusyTimeoutCustomizer;
impl r2d2::CustomizeConnection<rusqlite::Connection, rusqlite::Error> for BusyTimeoutCustomizer {
    fn on_acquire(&self, conn: &mut rusqlite::Connection) -> Result<(), rusqlite::Error> {
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Ok(())
    }
}

type PooledConn = r2d2::PooledConnection<SqliteConnectionManager>;

pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before Unix epoch")
        .as_millis() as i64
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS kv (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    expires_at INTEGER
);
CREATE INDEX IF NOT EXISTS idx_kv_expires ON kv(expires_at);

CREATE TABLE IF NOT EXISTS memories (
    id TEXT PRIMARY KEY,
    owner_id TEXT NOT NULL,
    kind TEXT NOT NULL DEFAULT 'note',
    content TEXT NOT NULL,
    people_mentioned TEXT NOT NULL DEFAULT '[]',
    recording_id TEXT,
    source TEXT NOT NULL DEFAULT 'manual',
    importance INTEGER NOT NULL DEFAULT 5,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    superseded_by TEXT,
    supersede_confidence REAL
);
CREATE INDEX IF NOT EXISTS idx_memories_owner ON memories(owner_id);
CREATE UNIQUE INDEX IF NOT EXISTS idx_memories_recording
    ON memories(owner_id, recording_id) WHERE recording_id IS NOT NULL;

CREATE TABLE IF NOT EXISTS processing_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    recording_id TEXT NOT NULL,
    outcome TEXT NOT NULL,
    stage_timings TEXT NOT NULL DEFAULT '{}',
    memories_created INTEGER NOT NULL DEFAULT 0,
    tasks_created INTEGER NOT NULL DEFAULT 0,
    processed_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_processing_recording ON processing_records(recording_id);
CREATE INDEX IF NOT EXISTS idx_processing_at ON processing_records(processed_at);

CREATE TABLE IF NOT EXISTS llm_usage (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    ts INTEGER NOT NULL,
    component TEXT NOT NULL,
    model TEXT NOT NULL,
    input_tokens INTEGER NOT NULL DEFAULT 0,
    output_tokens INTEGER NOT NULL DEFAULT 0,
    duration_ms INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_llm_usage_ts ON llm_usage(ts);
"#;

/// SQLite-backed store. Every invariant the pipeline relies on (one marker
/// per recording, one memory per recording) is enforced by a single key or
/// a single unique index, so no multi-statement transactions are needed.
pub struct Store {
    pool: Pool<SqliteConnectionManager>,
}

impl Store {
    fn conn(&self) -> Result<PooledConn, MemoirError> {
        self.pool.get().map_err(|e| MemoirError::Internal(format!("pool: {e}")))
    }

    /// Open (or create) a database at the given path.
    /// Pool size defaults to 8 (1 writer + 7 readers in WAL mode).
    pub fn open(path: &str) -> Result<Self, MemoirError> {
        let pool_size = if path == ":memory:" { 2 } else { 8 };
        let manager = if path == ":memory:" {
            // Shared cache so all pool connections see the same in-memory DB.
            // Each test gets a unique name to avoid cross-test pollution.
            let name = uuid::Uuid::new_v4().to_string();
            SqliteConnectionManager::file(format!("file:{name}?mode=memory&cache=shared"))
        } else {
            SqliteConnectionManager::file(path)
        };
        let pool = Pool::builder()
            .max_size(pool_size)
            .connection_customizer(Box::new(BusyTimeoutCustomizer))
            .build(manager)
            .map_err(|e| MemoirError::Internal(format!("pool: {e}")))?;

        let conn = pool.get().map_err(|e| MemoirError::Internal(e.to_string()))?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        conn.execute_batch(SCHEMA)?;
        if conn.prepare("SELECT supersede_confidence FROM memories LIMIT 0").is_err() {
            conn.execute("ALTER TABLE memories ADD COLUMN superseded_by TEXT", [])?;
            conn.execute("ALTER TABLE memories ADD COLUMN supersede_confidence REAL", [])?;
        }
        drop(conn);
        Ok(Self { pool })
    }

    /// Database file size in bytes (via SQLite pragma).
    pub fn db_size_bytes(&self) -> i64 {
        self.conn()
            .and_then(|c| {
                c.query_row(
                    "SELECT page_count * page_size FROM pragma_page_count, pragma_page_size",
                    [],
                    |r| r.get(0),
                )
                .map_err(|e| MemoirError::Internal(e.to_string()))
            })
            .unwrap_or(0)
    }

    pub fn log_llm_call(
        &self,
        component: &str,
        model: &str,
        input_tokens: u32,
        output_tokens: u32,
        duration_ms: u64,
    ) -> Result<(), MemoirError> {
        let c = self.conn()?;
        c.execute(
            "INSERT INTO llm_usage (ts, component, model, input_tokens, output_tokens, duration_ms) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![now_ms(), component, model, input_tokens, output_tokens, duration_ms as i64],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod open_tests {
    use super::*;

    #[test]
    fn open_in_memory() {
        let store = Store::open(":memory:").unwrap();
        assert!(store.db_size_bytes() >= 0);
    }

    #[test]
    fn reopen_is_idempotent() {
        // Schema creation must tolerate running twice.
        let store = Store::open(":memory:").unwrap();
        drop(store);
        let _ = Store::open(":memory:").unwrap();
    }
}
