//! Append-only processing audit. One record per recording that entered the
//! pipeline, whatever its terminal state — monitoring sees every recording.

use std::collections::HashMap;

use rusqlite::params;
use serde::{Deserialize, Serialize};

use super::{now_ms, Store};
use crate::error::MemoirError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingRecord {
    pub recording_id: String,
    /// Terminal state label: persisted | skipped_low_quality |
    /// skipped_duplicate | extraction_failed | persist_failed.
    pub outcome: String,
    /// Stage name → elapsed seconds. Skipped stages are absent or zero.
    pub stage_timings: HashMap<String, f64>,
    pub memories_created: usize,
    pub tasks_created: usize,
    pub processed_at: i64,
}

impl ProcessingRecord {
    pub fn new(recording_id: impl Into<String>, outcome: impl Into<String>) -> Self {
        Self {
            recording_id: recording_id.into(),
            outcome: outcome.into(),
            stage_timings: HashMap::new(),
            memories_created: 0,
            tasks_created: 0,
            processed_at: now_ms(),
        }
    }
}

impl Store {
    pub fn append_processing(&self, rec: &ProcessingRecord) -> Result<(), MemoirError> {
        let c = self.conn()?;
        c.execute(
            "INSERT INTO processing_records \
                 (recording_id, outcome, stage_timings, memories_created, tasks_created, processed_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                rec.recording_id,
                rec.outcome,
                serde_json::to_string(&rec.stage_timings).unwrap_or_else(|_| "{}".into()),
                rec.memories_created as i64,
                rec.tasks_created as i64,
                rec.processed_at,
            ],
        )?;
        Ok(())
    }

    /// Most recent records first.
    pub fn list_processing(&self, limit: usize) -> Result<Vec<ProcessingRecord>, MemoirError> {
        let c = self.conn()?;
        let mut stmt = c.prepare(
            "SELECT recording_id, outcome, stage_timings, memories_created, tasks_created, processed_at \
             FROM processing_records ORDER BY processed_at DESC, id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], row_to_record)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    /// Records processed at or after `cutoff_ms`, oldest first.
    pub fn processing_since(&self, cutoff_ms: i64) -> Result<Vec<ProcessingRecord>, MemoirError> {
        let c = self.conn()?;
        let mut stmt = c.prepare(
            "SELECT recording_id, outcome, stage_timings, memories_created, tasks_created, processed_at \
             FROM processing_records WHERE processed_at >= ?1 ORDER BY processed_at ASC",
        )?;
        let rows = stmt.query_map(params![cutoff_ms], row_to_record)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }
}

fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<ProcessingRecord> {
    let timings_str: String = row.get("stage_timings")?;
    Ok(ProcessingRecord {
        recording_id: row.get("recording_id")?,
        outcome: row.get("outcome")?,
        stage_timings: serde_json::from_str(&timings_str).unwrap_or_default(),
        memories_created: row.get::<_, i64>("memories_created")? as usize,
        tasks_created: row.get::<_, i64>("tasks_created")? as usize,
        processed_at: row.get("processed_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_list() {
        let s = Store::open(":memory:").unwrap();
        let mut rec = ProcessingRecord::new("rec-1", "persisted");
        rec.stage_timings.insert("extraction".into(), 1.25);
        rec.memories_created = 1;
        s.append_processing(&rec).unwrap();

        let listed = s.list_processing(10).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].recording_id, "rec-1");
        assert_eq!(listed[0].stage_timings["extraction"], 1.25);
        assert_eq!(listed[0].memories_created, 1);
    }

    #[test]
    fn since_filters_by_time() {
        let s = Store::open(":memory:").unwrap();
        let mut old = ProcessingRecord::new("old", "persisted");
        old.processed_at = 1000;
        s.append_processing(&old).unwrap();
        let fresh = ProcessingRecord::new("fresh", "persisted");
        s.append_processing(&fresh).unwrap();

        let recent = s.processing_since(2000).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].recording_id, "fresh");
    }
}
