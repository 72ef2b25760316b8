//! Registry of group chats the bot has answered in, used for broadcasts.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

use crate::store::remote::RemoteStore;

pub struct GroupRegistry {
    path: PathBuf,
    remote: Option<RemoteStore>,
    lock: Mutex<()>,
}

impl GroupRegistry {
    pub fn new(path: PathBuf, remote: Option<RemoteStore>) -> Self {
        Self {
            path,
            remote,
            lock: Mutex::new(()),
        }
    }

    pub fn local(path: PathBuf) -> Self {
        Self::new(path, None)
    }

    /// Remember a group chat (idempotent; the title is refreshed).
    pub async fn record(&self, chat_id: i64, title: &str) {
        if let Some(ref remote) = self.remote {
            if let Err(e) = remote.upsert_group(chat_id, title).await {
                warn!("Failed to save group {chat_id}: {e}");
            }
            return;
        }

        let _guard = self.lock.lock().unwrap();
        let mut groups = load_groups(&self.path);
        groups.insert(chat_id, title.to_string());
        if let Err(e) = save_groups(&self.path, &groups) {
            warn!("Failed to save groups: {e}");
        }
    }

    /// All registered groups. Errors read as an empty registry.
    pub async fn all(&self) -> HashMap<i64, String> {
        if let Some(ref remote) = self.remote {
            return match remote.fetch_groups().await {
                Ok(groups) => groups,
                Err(e) => {
                    warn!("Failed to load groups: {e}");
                    HashMap::new()
                }
            };
        }

        let _guard = self.lock.lock().unwrap();
        load_groups(&self.path)
    }
}

fn load_groups(path: &Path) -> HashMap<i64, String> {
    match std::fs::read_to_string(path) {
        Ok(json) => serde_json::from_str(&json).unwrap_or_else(|e| {
            warn!("Corrupt groups file {}, starting empty: {e}", path.display());
            HashMap::new()
        }),
        Err(_) => HashMap::new(),
    }
}

fn save_groups(path: &Path, groups: &HashMap<i64, String>) -> Result<(), String> {
    let json = serde_json::to_string_pretty(groups)
        .map_err(|e| format!("Failed to serialize: {e}"))?;
    std::fs::write(path, json).map_err(|e| format!("Failed to write {}: {e}", path.display()))
}
