//! Deduplication guard.
//!
//! Recording path: a constant-time idempotency marker keyed by recording id.
//! Uniqueness there is about "did we already process THIS recording", so a
//! single set-if-absent beats any scan over existing memories — the naive
//! load-and-compare pass is O(total memories) per recording and was the
//! dominant cost in earlier designs.
//!
//! Manual path: optional semantic near-duplicate handling via token overlap
//! and a one-way supersedes relation. The recording pipeline always bypasses
//! it (`skip_deduplication`).

use tracing::{debug, info};

use crate::error::MemoirError;
use crate::store::{kv_key, Memory, MemoryInput, Store};
use crate::thresholds::{MANUAL_DEDUP_SIM, MARKER_TTL_SECS};
use crate::util::short_id;

fn marker_key(recording_id: &str) -> String {
    // TTL-bound (30 days): after expiry the same recording id reprocesses
    // as new — accepted bounded staleness.
    kv_key("recording", "memory_created", recording_id)
}

/// Atomically claim the right to persist a memory for this recording.
/// `true` means the caller may proceed; `false` means another run (past or
/// concurrent) already holds the claim. Single-key, so two overlapping sync
/// runs can never both get `true`.
pub fn reserve(store: &Store, recording_id: &str) -> Result<bool, MemoirError> {
    let claimed = store.kv_set_nx(&marker_key(recording_id), "1", Some(MARKER_TTL_SECS))?;
    debug!(recording = %short_id(recording_id), claimed, "idempotency reserve");
    Ok(claimed)
}

/// Give the claim back after a failed persist, so a future run retries
/// instead of the recording being silently lost behind a marker.
pub fn release(store: &Store, recording_id: &str) -> Result<(), MemoirError> {
    store.kv_delete(&marker_key(recording_id))?;
    Ok(())
}

pub fn marker_exists(store: &Store, recording_id: &str) -> Result<bool, MemoirError> {
    store.kv_exists(&marker_key(recording_id))
}

/// Manual-entry insert with semantic near-duplicate handling. When a recent
/// memory overlaps heavily, the new memory still gets written and the old
/// one is marked superseded (directed relation + confidence) — never merged
/// in place, so no reference cycles can form.
pub fn insert_manual(store: &Store, input: MemoryInput) -> Result<Memory, MemoirError> {
    if input.skip_deduplication {
        return store.insert_memory(input);
    }
    let near = store.find_near_duplicate(&input.owner_id, &input.content, MANUAL_DEDUP_SIM)?;
    let mem = store.insert_memory(input)?;
    if let Some((existing, sim)) = near {
        store.mark_superseded(&existing.id, &mem.id, sim)?;
        info!(
            old = %short_id(&existing.id),
            new = %short_id(&mem.id),
            similarity = format!("{sim:.2}"),
            "near-duplicate superseded"
        );
    }
    Ok(mem)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> Store {
        Store::open(":memory:").unwrap()
    }

    #[test]
    fn reserve_once_then_refuse() {
        let s = store();
        assert!(reserve(&s, "rec-1").unwrap());
        assert!(!reserve(&s, "rec-1").unwrap());
        assert!(reserve(&s, "rec-2").unwrap());
    }

    #[test]
    fn release_allows_retry() {
        let s = store();
        assert!(reserve(&s, "rec-1").unwrap());
        release(&s, "rec-1").unwrap();
        assert!(reserve(&s, "rec-1").unwrap());
    }

    #[test]
    fn manual_insert_supersedes_near_duplicate() {
        let s = store();
        let first = insert_manual(
            &s,
            MemoryInput::new("u1", "the user is strongly allergic to peanuts and tree nuts"),
        )
        .unwrap();
        let second = insert_manual(
            &s,
            MemoryInput::new("u1", "the user is strongly allergic to peanuts and tree nuts today"),
        )
        .unwrap();
        let old = s.get_memory(&first.id).unwrap().unwrap();
        assert_eq!(old.superseded_by.as_deref(), Some(second.id.as_str()));
        assert!(old.supersede_confidence.unwrap() > 0.5);
        // The new memory itself carries no supersede marks.
        let new = s.get_memory(&second.id).unwrap().unwrap();
        assert!(new.superseded_by.is_none());
    }

    #[test]
    fn skip_deduplication_bypasses_semantic_path() {
        let s = store();
        let first = insert_manual(
            &s,
            MemoryInput::new("u1", "weekly review happens every friday afternoon"),
        )
        .unwrap();
        let _second = insert_manual(
            &s,
            MemoryInput::new("u1", "weekly review happens every friday afternoon")
                .skip_deduplication(),
        )
        .unwrap();
        let old = s.get_memory(&first.id).unwrap().unwrap();
        assert!(old.superseded_by.is_none());
    }

    #[test]
    fn unrelated_memories_do_not_supersede() {
        let s = store();
        let first =
            insert_manual(&s, MemoryInput::new("u1", "the cat's vet visit went fine")).unwrap();
        let _ = insert_manual(
            &s,
            MemoryInput::new("u1", "quarterly budget numbers were approved by finance"),
        )
        .unwrap();
        let old = s.get_memory(&first.id).unwrap().unwrap();
        assert!(old.superseded_by.is_none());
    }
}
