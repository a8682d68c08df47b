//! TTL key-value operations: idempotency markers, pending-sync counters,
//! cached summaries. Every operation is a single SQL statement, so each
//! invariant rides on one key's existence — no multi-key transactions.

use rusqlite::params;

use super::{now_ms, Store};
use crate::error::MemoirError;

/// Key layout convention: `memoir:{category}:{subcategory}:{identifier}`.
pub fn kv_key(category: &str, subcategory: &str, id: &str) -> String {
    format!("memoir:{category}:{subcategory}:{id}")
}

fn expiry(ttl_secs: Option<i64>) -> Option<i64> {
    ttl_secs.map(|s| now_ms() + s * 1000)
}

impl Store {
    /// Set a key unconditionally. `ttl_secs = None` means permanent.
    pub fn kv_put(&self, key: &str, value: &str, ttl_secs: Option<i64>) -> Result<(), MemoirError> {
        let c = self.conn()?;
        c.execute(
            "INSERT INTO kv (key, value, expires_at) VALUES (?1, ?2, ?3) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at",
            params![key, value, expiry(ttl_secs)],
        )?;
        Ok(())
    }

    /// Read a key. Expired keys read as absent (lazy expiry — purge happens
    /// separately).
    pub fn kv_get(&self, key: &str) -> Result<Option<String>, MemoirError> {
        let c = self.conn()?;
        let v = c
            .query_row(
                "SELECT value FROM kv WHERE key = ?1 \
                 AND (expires_at IS NULL OR expires_at > ?2)",
                params![key, now_ms()],
                |r| r.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        Ok(v)
    }

    pub fn kv_exists(&self, key: &str) -> Result<bool, MemoirError> {
        Ok(self.kv_get(key)?.is_some())
    }

    pub fn kv_delete(&self, key: &str) -> Result<bool, MemoirError> {
        let c = self.conn()?;
        let n = c.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(n > 0)
    }

    /// Atomic set-if-absent-with-TTL: the reserve primitive. Returns `true`
    /// when this call created (or revived an expired) key, `false` when a
    /// live key already existed. Single statement, so two overlapping
    /// callers can never both see `true` for the same key.
    pub fn kv_set_nx(&self, key: &str, value: &str, ttl_secs: Option<i64>) -> Result<bool, MemoirError> {
        let c = self.conn()?;
        let now = now_ms();
        let n = c.execute(
            "INSERT INTO kv (key, value, expires_at) VALUES (?1, ?2, ?3) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at \
             WHERE kv.expires_at IS NOT NULL AND kv.expires_at <= ?4",
            params![key, value, expiry(ttl_secs), now],
        )?;
        Ok(n > 0)
    }

    /// Atomic increment with TTL. An expired counter restarts at 1 with a
    /// fresh window; a live counter keeps its original expiry.
    pub fn kv_incr(&self, key: &str, ttl_secs: i64) -> Result<i64, MemoirError> {
        let c = self.conn()?;
        let now = now_ms();
        let fresh = expiry(Some(ttl_secs));
        let v: i64 = c.query_row(
            "INSERT INTO kv (key, value, expires_at) VALUES (?1, '1', ?2) \
             ON CONFLICT(key) DO UPDATE SET \
                 value = CASE WHEN kv.expires_at IS NOT NULL AND kv.expires_at <= ?3 \
                              THEN '1' \
                              ELSE CAST(CAST(kv.value AS INTEGER) + 1 AS TEXT) END, \
                 expires_at = CASE WHEN kv.expires_at IS NOT NULL AND kv.expires_at <= ?3 \
                                   THEN ?2 ELSE kv.expires_at END \
             RETURNING CAST(value AS INTEGER)",
            params![key, fresh, now],
            |r| r.get(0),
        )?;
        Ok(v)
    }

    /// Atomic decrement, floored at zero. Missing or expired keys stay absent.
    pub fn kv_decr(&self, key: &str) -> Result<i64, MemoirError> {
        let c = self.conn()?;
        let v = c
            .query_row(
                "UPDATE kv SET value = CAST(MAX(CAST(value AS INTEGER) - 1, 0) AS TEXT) \
                 WHERE key = ?1 AND (expires_at IS NULL OR expires_at > ?2) \
                 RETURNING CAST(value AS INTEGER)",
                params![key, now_ms()],
                |r| r.get(0),
            )
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(0),
                other => Err(other),
            })?;
        Ok(v)
    }

    /// Delete expired keys. Called opportunistically from the sync loop.
    pub fn kv_purge_expired(&self) -> Result<usize, MemoirError> {
        let c = self.conn()?;
        let n = c.execute(
            "DELETE FROM kv WHERE expires_at IS NOT NULL AND expires_at <= ?1",
            params![now_ms()],
        )?;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> Store {
        Store::open(":memory:").unwrap()
    }

    #[test]
    fn key_layout() {
        assert_eq!(
            kv_key("recording", "memory_created", "rec-1"),
            "memoir:recording:memory_created:rec-1"
        );
    }

    #[test]
    fn put_get_roundtrip() {
        let s = store();
        s.kv_put("k", "v", None).unwrap();
        assert_eq!(s.kv_get("k").unwrap().as_deref(), Some("v"));
        assert!(s.kv_delete("k").unwrap());
        assert_eq!(s.kv_get("k").unwrap(), None);
    }

    #[test]
    fn expired_key_reads_as_absent() {
        let s = store();
        s.kv_put("gone", "v", Some(-1)).unwrap();
        assert_eq!(s.kv_get("gone").unwrap(), None);
        assert!(!s.kv_exists("gone").unwrap());
    }

    #[test]
    fn set_nx_refuses_live_key() {
        let s = store();
        assert!(s.kv_set_nx("m", "1", Some(60)).unwrap());
        assert!(!s.kv_set_nx("m", "2", Some(60)).unwrap());
        // Value untouched by the losing call.
        assert_eq!(s.kv_get("m").unwrap().as_deref(), Some("1"));
    }

    #[test]
    fn set_nx_revives_expired_key() {
        let s = store();
        assert!(s.kv_set_nx("m", "1", Some(-1)).unwrap());
        assert!(s.kv_set_nx("m", "2", Some(60)).unwrap());
        assert_eq!(s.kv_get("m").unwrap().as_deref(), Some("2"));
    }

    #[test]
    fn incr_counts_and_restarts_after_expiry() {
        let s = store();
        assert_eq!(s.kv_incr("c", 60).unwrap(), 1);
        assert_eq!(s.kv_incr("c", 60).unwrap(), 2);
        s.kv_put("c", "9", Some(-1)).unwrap();
        assert_eq!(s.kv_incr("c", 60).unwrap(), 1);
    }

    #[test]
    fn decr_floors_at_zero() {
        let s = store();
        assert_eq!(s.kv_incr("c", 60).unwrap(), 1);
        assert_eq!(s.kv_decr("c").unwrap(), 0);
        assert_eq!(s.kv_decr("c").unwrap(), 0);
        assert_eq!(s.kv_decr("missing").unwrap(), 0);
    }

    #[test]
    fn purge_drops_only_expired() {
        let s = store();
        s.kv_put("live", "v", Some(60)).unwrap();
        s.kv_put("dead", "v", Some(-1)).unwrap();
        s.kv_put("forever", "v", None).unwrap();
        assert_eq!(s.kv_purge_expired().unwrap(), 1);
        assert!(s.kv_exists("live").unwrap());
        assert!(s.kv_exists("forever").unwrap());
    }
}
