//! Persisted per-user state: usage counters, conversation history, mode
//! settings and the group registry.
//!
//! Everything is keyed by a stable string identity. The local variants are
//! JSON files under `data_dir` with a mutex around each read-modify-write;
//! the remote variant rides on row-level upserts instead.

pub mod conversation;
pub mod groups;
pub mod remote;
pub mod settings;
pub mod usage;

pub use conversation::{ConversationRecord, ConversationStore, HistoryEntry, ModeDecision, Role};
pub use groups::GroupRegistry;
pub use remote::RemoteStore;
pub use settings::ModeSettings;
pub use usage::{Admission, UsageRecord, UsageStore};
