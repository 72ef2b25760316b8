//! Request admission: per-user fixed-window counters with a premium bypass.
//!
//! Counters live in `users.json`, keyed by identity. A window is 30 minutes
//! by default; expiry is checked lazily on the next call, never swept.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

use crate::config::admin_matches;

/// Usage bookkeeping for one user, as persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    pub count: u32,
    /// Unix seconds after which `count` goes back to zero.
    pub reset: i64,
    /// Sticky: once set it is never cleared.
    pub premium: bool,
}

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub allowed: bool,
    /// Requests consumed in the current window; the ceiling when denied.
    pub count: u32,
}

/// Fixed-window request counter backed by a JSON file.
///
/// One lock covers the whole read-modify-write cycle so concurrent handlers
/// cannot lose updates, whether they race on the same identity or not.
pub struct UsageStore {
    path: PathBuf,
    admin: String,
    ceiling: u32,
    window_secs: i64,
    lock: Mutex<()>,
}

impl UsageStore {
    pub fn new(path: PathBuf, admin: String, ceiling: u32, window_secs: i64) -> Self {
        Self {
            path,
            admin,
            ceiling,
            window_secs,
            lock: Mutex::new(()),
        }
    }

    /// Decide whether `identity` may issue another request right now, and
    /// consume one slot if so.
    pub fn check_and_consume(&self, identity: &str, display_name: &str) -> Admission {
        self.check_and_consume_at(identity, display_name, chrono::Utc::now().timestamp())
    }

    /// Same as [`check_and_consume`](Self::check_and_consume) with an
    /// explicit clock, so tests control time.
    pub fn check_and_consume_at(&self, identity: &str, display_name: &str, now: i64) -> Admission {
        let _guard = self.lock.lock().unwrap();
        let mut records = load_records(&self.path);

        let record = records
            .entry(identity.to_string())
            .or_insert_with(|| UsageRecord {
                count: 0,
                reset: now + self.window_secs,
                premium: false,
            });

        if now > record.reset {
            record.count = 0;
            record.reset = now + self.window_secs;
        }

        if admin_matches(display_name, &self.admin) {
            record.premium = true;
        }

        let admission = if record.premium {
            Admission {
                allowed: true,
                count: record.count,
            }
        } else if record.count >= self.ceiling {
            Admission {
                allowed: false,
                count: self.ceiling,
            }
        } else {
            record.count += 1;
            Admission {
                allowed: true,
                count: record.count,
            }
        };

        // Persist even on denial so the reset bookkeeping stays current.
        if let Err(e) = save_records(&self.path, &records) {
            warn!("Failed to persist usage records: {e}");
        }

        admission
    }

    /// Look up a record without consuming anything.
    pub fn get(&self, identity: &str) -> Option<UsageRecord> {
        let _guard = self.lock.lock().unwrap();
        load_records(&self.path).remove(identity)
    }
}

fn load_records(path: &Path) -> HashMap<String, UsageRecord> {
    match std::fs::read_to_string(path) {
        Ok(json) => serde_json::from_str(&json).unwrap_or_else(|e| {
            warn!("Corrupt usage file {}, starting empty: {e}", path.display());
            HashMap::new()
        }),
        // A missing store reads as empty, not as an error.
        Err(_) => HashMap::new(),
    }
}

fn save_records(path: &Path, records: &HashMap<String, UsageRecord>) -> Result<(), String> {
    let json = serde_json::to_string_pretty(records)
        .map_err(|e| format!("Failed to serialize: {e}"))?;
    std::fs::write(path, json).map_err(|e| format!("Failed to write {}: {e}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const WINDOW: i64 = 1800;

    fn make_store(dir: &tempfile::TempDir, ceiling: u32) -> UsageStore {
        UsageStore::new(
            dir.path().join("users.json"),
            "@admin".to_string(),
            ceiling,
            WINDOW,
        )
    }

    #[test]
    fn test_counts_up_to_ceiling_then_denies() {
        let dir = tempdir().unwrap();
        let store = make_store(&dir, 30);
        let now = 1_000_000;

        for i in 1..=30 {
            let adm = store.check_and_consume_at("u1", "alice", now);
            assert!(adm.allowed);
            assert_eq!(adm.count, i);
        }

        let denied = store.check_and_consume_at("u1", "alice", now);
        assert!(!denied.allowed);
        assert_eq!(denied.count, 30);
    }

    #[test]
    fn test_window_expiry_resets_count() {
        let dir = tempdir().unwrap();
        let store = make_store(&dir, 30);
        let now = 1_000_000;

        for _ in 0..30 {
            store.check_and_consume_at("u1", "alice", now);
        }
        assert!(!store.check_and_consume_at("u1", "alice", now).allowed);

        // One past the reset point: counter restarts at 1 (post-increment)
        // and the reset advances by exactly one window from the call time.
        let later = now + WINDOW + 1;
        let adm = store.check_and_consume_at("u1", "alice", later);
        assert!(adm.allowed);
        assert_eq!(adm.count, 1);
        assert_eq!(store.get("u1").unwrap().reset, later + WINDOW);
    }

    #[test]
    fn test_no_reset_at_exact_boundary() {
        let dir = tempdir().unwrap();
        let store = make_store(&dir, 30);
        let now = 1_000_000;

        store.check_and_consume_at("u1", "alice", now);
        let reset = store.get("u1").unwrap().reset;

        // now == reset is still inside the window.
        let adm = store.check_and_consume_at("u1", "alice", reset);
        assert_eq!(adm.count, 2);
        assert_eq!(store.get("u1").unwrap().reset, reset);
    }

    #[test]
    fn test_premium_is_sticky_and_skips_counting() {
        let dir = tempdir().unwrap();
        let store = make_store(&dir, 30);
        let now = 1_000_000;

        for _ in 0..30 {
            store.check_and_consume_at("u1", "alice", now);
        }
        assert!(!store.check_and_consume_at("u1", "alice", now).allowed);

        // Matching the admin name flips premium and bypasses the ceiling
        // without touching the count.
        let adm = store.check_and_consume_at("u1", "admin", now);
        assert!(adm.allowed);
        assert_eq!(adm.count, 30);

        // Sticky: the bypass survives even under the original name.
        let adm = store.check_and_consume_at("u1", "alice", now);
        assert!(adm.allowed);
        assert_eq!(adm.count, 30);
        assert!(store.get("u1").unwrap().premium);
    }

    #[test]
    fn test_admin_match_ignores_at_prefix() {
        let dir = tempdir().unwrap();
        let store = make_store(&dir, 30);
        let now = 1_000_000;

        let adm = store.check_and_consume_at("u2", "@admin", now);
        assert!(adm.allowed);
        assert!(store.get("u2").unwrap().premium);
    }

    #[test]
    fn test_identities_are_independent() {
        let dir = tempdir().unwrap();
        let store = make_store(&dir, 2);
        let now = 1_000_000;

        store.check_and_consume_at("u1", "alice", now);
        store.check_and_consume_at("u1", "alice", now);
        assert!(!store.check_and_consume_at("u1", "alice", now).allowed);

        assert!(store.check_and_consume_at("u2", "bob", now).allowed);
    }

    #[test]
    fn test_state_survives_reopen() {
        let dir = tempdir().unwrap();
        let now = 1_000_000;

        {
            let store = make_store(&dir, 30);
            for _ in 0..5 {
                store.check_and_consume_at("u1", "alice", now);
            }
        }

        let store = make_store(&dir, 30);
        let adm = store.check_and_consume_at("u1", "alice", now);
        assert_eq!(adm.count, 6);
    }

    #[test]
    fn test_missing_file_reads_as_empty() {
        let dir = tempdir().unwrap();
        let store = make_store(&dir, 30);
        assert!(store.get("u1").is_none());
    }
}
