//! Per-user conversation state: bounded history, sticky mode, display name.
//!
//! Backed by `conversations.json` locally, or row-per-user upserts when a
//! remote store is configured (no local lock in that case, the remote's
//! upsert semantics are the only serialization).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{info, warn};

use crate::modes::Mode;
use crate::store::remote::RemoteStore;

/// Who said a history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One prior exchange line, insertion order = chronological order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
    /// Unix seconds.
    pub timestamp: i64,
}

/// Everything stored for one user.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationRecord {
    #[serde(default)]
    pub mode: Option<Mode>,
    #[serde(default)]
    pub messages: Vec<HistoryEntry>,
    /// Last-known display name, advisory only.
    #[serde(default)]
    pub username: Option<String>,
}

/// Outcome of a mode selection attempt. The store owns the lock-or-reject
/// decision; handlers only render it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeDecision {
    /// Mode was unset and is now locked.
    Set,
    /// The requested mode is already the locked one.
    Unchanged,
    /// Another mode is locked; nothing was changed.
    Conflict(Mode),
}

/// What a record held before `clear` reset it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cleared {
    pub mode: Option<Mode>,
    pub username: Option<String>,
}

/// Older files stored a bare message list per user; decode either shape
/// once at load time into the structured record.
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredRecord {
    Record(ConversationRecord),
    Legacy(Vec<HistoryEntry>),
}

impl StoredRecord {
    fn into_record(self) -> ConversationRecord {
        match self {
            StoredRecord::Record(record) => record,
            StoredRecord::Legacy(messages) => ConversationRecord {
                mode: None,
                messages,
                username: None,
            },
        }
    }
}

pub struct ConversationStore {
    path: PathBuf,
    remote: Option<RemoteStore>,
    history_limit: usize,
    lock: Mutex<()>,
}

impl ConversationStore {
    pub fn new(path: PathBuf, remote: Option<RemoteStore>, history_limit: usize) -> Self {
        Self {
            path,
            remote,
            history_limit,
            lock: Mutex::new(()),
        }
    }

    pub fn local(path: PathBuf, history_limit: usize) -> Self {
        Self::new(path, None, history_limit)
    }

    /// Current record for `identity`, defaults if unseen. Remote failures
    /// degrade to the defaults as well.
    pub async fn get(&self, identity: &str) -> ConversationRecord {
        if let Some(ref remote) = self.remote {
            return match remote.fetch_conversation(identity).await {
                Ok(record) => record.unwrap_or_default(),
                Err(e) => {
                    warn!("Remote conversation fetch failed for {identity}: {e}");
                    ConversationRecord::default()
                }
            };
        }

        let _guard = self.lock.lock().unwrap();
        load_records(&self.path)
            .remove(identity)
            .unwrap_or_default()
    }

    /// Lock `mode` for `identity`, or report the conflict. `Unset` goes to
    /// `Locked(mode)`; a different locked mode is rejected untouched and
    /// only `clear` unlocks it.
    pub async fn try_set_mode(
        &self,
        identity: &str,
        mode: Mode,
        username: &str,
    ) -> ModeDecision {
        let username = username.to_string();
        self.update(identity, move |record| match record.mode {
            None => {
                record.mode = Some(mode);
                record.username = Some(username);
                ModeDecision::Set
            }
            Some(current) if current == mode => ModeDecision::Unchanged,
            Some(current) => ModeDecision::Conflict(current),
        })
        .await
    }

    /// Last `max` entries in chronological order; all of them if fewer.
    pub async fn recent_history(&self, identity: &str, max: usize) -> Vec<HistoryEntry> {
        let record = self.get(identity).await;
        let skip = record.messages.len().saturating_sub(max);
        record.messages.into_iter().skip(skip).collect()
    }

    /// Append one entry timestamped now, evicting the oldest beyond the
    /// history bound.
    pub async fn append(&self, identity: &str, role: Role, content: &str) {
        self.append_at(identity, role, content, chrono::Utc::now().timestamp())
            .await
    }

    pub async fn append_at(&self, identity: &str, role: Role, content: &str, now: i64) {
        let content = content.to_string();
        let limit = self.history_limit;
        self.update(identity, move |record| {
            record.messages.push(HistoryEntry {
                role,
                content,
                timestamp: now,
            });
            let excess = record.messages.len().saturating_sub(limit);
            if excess > 0 {
                record.messages.drain(..excess);
            }
        })
        .await;
    }

    /// Reset mode and history, returning what was there. The username is
    /// preserved on the record for audit.
    pub async fn clear(&self, identity: &str) -> Cleared {
        self.update(identity, |record| {
            let cleared = Cleared {
                mode: record.mode,
                username: record.username.clone(),
            };
            record.mode = None;
            record.messages.clear();
            cleared
        })
        .await
    }

    /// Manually-invoked cleanup: drop entries older than `max_age_secs` and
    /// remove records left with no messages and no locked mode. Returns the
    /// number of entries deleted.
    pub async fn sweep_expired(&self, max_age_secs: i64) -> usize {
        self.sweep_expired_at(max_age_secs, chrono::Utc::now().timestamp())
            .await
    }

    pub async fn sweep_expired_at(&self, max_age_secs: i64, now: i64) -> usize {
        let cutoff = now - max_age_secs;

        if let Some(ref remote) = self.remote {
            let rows = match remote.all_conversations().await {
                Ok(rows) => rows,
                Err(e) => {
                    warn!("Remote sweep fetch failed: {e}");
                    return 0;
                }
            };

            let mut removed = 0;
            for (identity, mut record) in rows {
                let before = record.messages.len();
                record.messages.retain(|entry| entry.timestamp > cutoff);
                if record.messages.len() == before {
                    continue;
                }
                removed += before - record.messages.len();

                let result = if record.messages.is_empty() && record.mode.is_none() {
                    remote.delete_conversation(&identity).await
                } else {
                    remote.upsert_conversation(&identity, &record).await
                };
                if let Err(e) = result {
                    warn!("Remote sweep write failed for {identity}: {e}");
                }
            }
            if removed > 0 {
                info!("Swept {removed} expired conversation entries");
            }
            return removed;
        }

        let _guard = self.lock.lock().unwrap();
        let mut records = load_records(&self.path);
        let mut removed = 0;
        records.retain(|_, record| {
            let before = record.messages.len();
            record.messages.retain(|entry| entry.timestamp > cutoff);
            removed += before - record.messages.len();
            !(record.messages.is_empty() && record.mode.is_none())
        });
        if let Err(e) = save_records(&self.path, &records) {
            warn!("Failed to persist conversations: {e}");
        }
        if removed > 0 {
            info!("Swept {removed} expired conversation entries");
        }
        removed
    }

    /// Read-modify-write one record. Local: under the store lock. Remote:
    /// fetch + upsert, last write wins.
    async fn update<R>(
        &self,
        identity: &str,
        mutate: impl FnOnce(&mut ConversationRecord) -> R,
    ) -> R {
        if let Some(ref remote) = self.remote {
            let mut record = match remote.fetch_conversation(identity).await {
                Ok(record) => record.unwrap_or_default(),
                Err(e) => {
                    warn!("Remote conversation fetch failed for {identity}: {e}");
                    ConversationRecord::default()
                }
            };
            let out = mutate(&mut record);
            if let Err(e) = remote.upsert_conversation(identity, &record).await {
                warn!("Remote conversation upsert failed for {identity}: {e}");
            }
            return out;
        }

        let _guard = self.lock.lock().unwrap();
        let mut records = load_records(&self.path);
        let record = records.entry(identity.to_string()).or_default();
        let out = mutate(record);
        if let Err(e) = save_records(&self.path, &records) {
            warn!("Failed to persist conversations: {e}");
        }
        out
    }
}

fn load_records(path: &Path) -> HashMap<String, ConversationRecord> {
    let json = match std::fs::read_to_string(path) {
        Ok(json) => json,
        // Missing store reads as empty.
        Err(_) => return HashMap::new(),
    };

    match serde_json::from_str::<HashMap<String, StoredRecord>>(&json) {
        Ok(stored) => stored
            .into_iter()
            .map(|(identity, record)| (identity, record.into_record()))
            .collect(),
        Err(e) => {
            warn!(
                "Corrupt conversations file {}, starting empty: {e}",
                path.display()
            );
            HashMap::new()
        }
    }
}

fn save_records(path: &Path, records: &HashMap<String, ConversationRecord>) -> Result<(), String> {
    let json = serde_json::to_string_pretty(records)
        .map_err(|e| format!("Failed to serialize: {e}"))?;
    std::fs::write(path, json).map_err(|e| format!("Failed to write {}: {e}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn make_store(dir: &tempfile::TempDir) -> ConversationStore {
        ConversationStore::local(dir.path().join("conversations.json"), 30)
    }

    #[tokio::test]
    async fn test_unseen_identity_returns_defaults() {
        let dir = tempdir().unwrap();
        let store = make_store(&dir);

        let record = store.get("u1").await;
        assert!(record.mode.is_none());
        assert!(record.messages.is_empty());
        assert!(record.username.is_none());
    }

    #[tokio::test]
    async fn test_append_bounds_history_to_limit() {
        let dir = tempdir().unwrap();
        let store = make_store(&dir);

        for i in 0..35 {
            store
                .append_at("u1", Role::User, &format!("msg {i}"), 1_000 + i)
                .await;
        }

        let record = store.get("u1").await;
        assert_eq!(record.messages.len(), 30);
        // Oldest evicted first: entries 5..35 survive, in order.
        assert_eq!(record.messages[0].content, "msg 5");
        assert_eq!(record.messages[29].content, "msg 34");
    }

    #[tokio::test]
    async fn test_recent_history_returns_suffix() {
        let dir = tempdir().unwrap();
        let store = make_store(&dir);

        for i in 0..8 {
            store
                .append_at("u1", Role::User, &format!("msg {i}"), 1_000 + i)
                .await;
        }

        let history = store.recent_history("u1", 3).await;
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].content, "msg 5");
        assert_eq!(history[2].content, "msg 7");
    }

    #[tokio::test]
    async fn test_recent_history_shorter_than_max() {
        let dir = tempdir().unwrap();
        let store = make_store(&dir);

        for i in 0..3 {
            store
                .append_at("u1", Role::User, &format!("msg {i}"), 1_000 + i)
                .await;
        }

        let history = store.recent_history("u1", 5).await;
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].content, "msg 0");
    }

    #[tokio::test]
    async fn test_mode_locks_once_and_conflicts() {
        let dir = tempdir().unwrap();
        let store = make_store(&dir);

        assert_eq!(
            store.try_set_mode("u1", Mode::Kasar, "alice").await,
            ModeDecision::Set
        );
        assert_eq!(
            store.try_set_mode("u1", Mode::Kasar, "alice").await,
            ModeDecision::Unchanged
        );
        assert_eq!(
            store.try_set_mode("u1", Mode::Halus, "alice").await,
            ModeDecision::Conflict(Mode::Kasar)
        );

        // Conflict mutates nothing.
        let record = store.get("u1").await;
        assert_eq!(record.mode, Some(Mode::Kasar));
        assert_eq!(record.username.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn test_clear_returns_previous_and_resets() {
        let dir = tempdir().unwrap();
        let store = make_store(&dir);

        store.try_set_mode("u1", Mode::Kasar, "alice").await;
        store.append_at("u1", Role::User, "hi", 1_000).await;

        let cleared = store.clear("u1").await;
        assert_eq!(cleared.mode, Some(Mode::Kasar));
        assert_eq!(cleared.username.as_deref(), Some("alice"));

        let record = store.get("u1").await;
        assert!(record.mode.is_none());
        assert!(record.messages.is_empty());
        // Username is preserved for audit.
        assert_eq!(record.username.as_deref(), Some("alice"));

        // Mode can be picked again after clear.
        assert_eq!(
            store.try_set_mode("u1", Mode::Halus, "alice").await,
            ModeDecision::Set
        );
    }

    #[tokio::test]
    async fn test_legacy_list_shape_upgrades_on_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("conversations.json");
        std::fs::write(
            &path,
            r#"{"u1": [{"role": "user", "content": "old", "timestamp": 5}]}"#,
        )
        .unwrap();

        let store = ConversationStore::local(path, 30);
        let record = store.get("u1").await;
        assert!(record.mode.is_none());
        assert_eq!(record.messages.len(), 1);
        assert_eq!(record.messages[0].content, "old");

        // A write re-persists the structured shape.
        store.append_at("u1", Role::Assistant, "new", 6).await;
        let record = store.get("u1").await;
        assert_eq!(record.messages.len(), 2);
    }

    #[tokio::test]
    async fn test_sweep_drops_only_expired_entries() {
        let dir = tempdir().unwrap();
        let store = make_store(&dir);
        let now = 100_000;

        store.append_at("u1", Role::User, "stale", now - 90_000).await;
        store.append_at("u1", Role::User, "fresh", now - 10).await;
        store.append_at("u2", Role::User, "stale", now - 90_000).await;
        store.try_set_mode("u3", Mode::Halus, "carol").await;
        store.append_at("u3", Role::User, "stale", now - 90_000).await;

        let removed = store.sweep_expired_at(86_400, now).await;
        assert_eq!(removed, 3);

        let u1 = store.get("u1").await;
        assert_eq!(u1.messages.len(), 1);
        assert_eq!(u1.messages[0].content, "fresh");

        // u2 had nothing left and no mode: the record is gone.
        let raw = std::fs::read_to_string(dir.path().join("conversations.json")).unwrap();
        assert!(!raw.contains("u2"));

        // u3 keeps its locked mode even with an empty history.
        let u3 = store.get("u3").await;
        assert!(u3.messages.is_empty());
        assert_eq!(u3.mode, Some(Mode::Halus));
    }

    #[tokio::test]
    async fn test_state_survives_reopen() {
        let dir = tempdir().unwrap();
        {
            let store = make_store(&dir);
            store.try_set_mode("u1", Mode::Informasi, "alice").await;
            store.append_at("u1", Role::User, "hello", 1_000).await;
        }

        let store = make_store(&dir);
        let record = store.get("u1").await;
        assert_eq!(record.mode, Some(Mode::Informasi));
        assert_eq!(record.messages.len(), 1);
    }
}
