//! Runtime mode availability, toggled by the admin with /off and /on.
//!
//! The disabled set is re-read before each use so several bot instances
//! sharing a remote store converge on the same view.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

use crate::modes::Mode;
use crate::store::remote::RemoteStore;

#[derive(Default, Serialize, Deserialize)]
struct SettingsFile {
    #[serde(default)]
    disabled_modes: Vec<Mode>,
}

pub struct ModeSettings {
    path: PathBuf,
    remote: Option<RemoteStore>,
    disabled: Mutex<HashSet<Mode>>,
}

impl ModeSettings {
    /// Construct and read the initial disabled set from the backend.
    pub async fn load(path: PathBuf, remote: Option<RemoteStore>) -> Self {
        let settings = Self {
            path,
            remote,
            disabled: Mutex::new(HashSet::new()),
        };
        settings.refresh().await;
        settings
    }

    /// Re-read the disabled set from the backend. Failures keep the current
    /// in-memory view.
    pub async fn refresh(&self) {
        if let Some(ref remote) = self.remote {
            match remote.fetch_disabled_modes().await {
                Ok(modes) => {
                    let fresh: HashSet<Mode> = modes.unwrap_or_default().into_iter().collect();
                    *self.disabled.lock().unwrap() = fresh;
                }
                Err(e) => warn!("Failed to load disabled modes: {e}"),
            }
            return;
        }

        let fresh = read_local(&self.path);
        *self.disabled.lock().unwrap() = fresh;
    }

    pub fn is_disabled(&self, mode: Mode) -> bool {
        self.disabled.lock().unwrap().contains(&mode)
    }

    /// Disabled modes in a stable display order.
    pub fn disabled(&self) -> Vec<Mode> {
        let set = self.disabled.lock().unwrap();
        Mode::ALL.into_iter().filter(|m| set.contains(m)).collect()
    }

    /// Disable a mode. Returns false if it was already disabled.
    pub async fn disable(&self, mode: Mode) -> bool {
        let changed = self.disabled.lock().unwrap().insert(mode);
        if changed {
            self.persist().await;
        }
        changed
    }

    /// Re-enable a mode. Returns false if it was not disabled.
    pub async fn enable(&self, mode: Mode) -> bool {
        let changed = self.disabled.lock().unwrap().remove(&mode);
        if changed {
            self.persist().await;
        }
        changed
    }

    async fn persist(&self) {
        let modes = self.disabled();

        if let Some(ref remote) = self.remote {
            if let Err(e) = remote.save_disabled_modes(&modes).await {
                warn!("Failed to save disabled modes: {e}");
            }
            return;
        }

        let file = SettingsFile {
            disabled_modes: modes,
        };
        let json = match serde_json::to_string_pretty(&file) {
            Ok(json) => json,
            Err(e) => {
                warn!("Failed to serialize settings: {e}");
                return;
            }
        };
        if let Err(e) = std::fs::write(&self.path, json) {
            warn!("Failed to write {}: {e}", self.path.display());
        }
    }
}

fn read_local(path: &Path) -> HashSet<Mode> {
    let json = match std::fs::read_to_string(path) {
        Ok(json) => json,
        Err(_) => return HashSet::new(),
    };
    match serde_json::from_str::<SettingsFile>(&json) {
        Ok(file) => file.disabled_modes.into_iter().collect(),
        Err(e) => {
            warn!("Corrupt settings file {}, ignoring: {e}", path.display());
            HashSet::new()
        }
    }
}
