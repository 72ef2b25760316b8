//! PostgREST-style row store client (Supabase-compatible).
//!
//! Conversations, mode settings and the group registry can live in remote
//! tables instead of local JSON files. Writes are row-level upserts; there
//! is no extra locking here, racing writers rely on upsert idempotency.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::modes::Mode;
use crate::store::conversation::{ConversationRecord, HistoryEntry};

#[derive(Clone)]
pub struct RemoteStore {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

#[derive(Serialize, Deserialize)]
struct ConversationRow {
    user_id: String,
    #[serde(default)]
    mode: Option<Mode>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    messages: Vec<HistoryEntry>,
}

impl ConversationRow {
    fn into_record(self) -> (String, ConversationRecord) {
        (
            self.user_id,
            ConversationRecord {
                mode: self.mode,
                messages: self.messages,
                username: self.username,
            },
        )
    }
}

#[derive(Serialize)]
struct SettingsRow<'a> {
    key: &'a str,
    value: &'a [Mode],
}

#[derive(Deserialize)]
struct SettingsValue {
    #[serde(default)]
    value: Option<Vec<Mode>>,
}

#[derive(Serialize, Deserialize)]
struct GroupRow {
    chat_id: i64,
    title: String,
}

impl RemoteStore {
    pub fn new(base_url: String, api_key: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            base_url,
            api_key,
            client,
        }
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{table}", self.base_url.trim_end_matches('/'))
    }

    async fn fetch<T: DeserializeOwned>(&self, table: &str, query: &str) -> Result<Vec<T>, String> {
        let url = format!("{}?{query}", self.table_url(table));
        let response = self
            .client
            .get(&url)
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| format!("HTTP error: {e}"))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| format!("Failed to read response: {e}"))?;

        if !status.is_success() {
            return Err(format!("API error {status}: {body}"));
        }

        serde_json::from_str(&body).map_err(|e| format!("Failed to parse response: {e}"))
    }

    async fn upsert<T: Serialize>(&self, table: &str, row: &T) -> Result<(), String> {
        let response = self
            .client
            .post(self.table_url(table))
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .header("Prefer", "resolution=merge-duplicates")
            .json(row)
            .send()
            .await
            .map_err(|e| format!("HTTP error: {e}"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(format!("API error {status}: {body}"));
        }
        Ok(())
    }

    async fn delete(&self, table: &str, query: &str) -> Result<(), String> {
        let url = format!("{}?{query}", self.table_url(table));
        let response = self
            .client
            .delete(&url)
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| format!("HTTP error: {e}"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(format!("API error {status}: {body}"));
        }
        Ok(())
    }

    // ---- conversations ----

    pub async fn fetch_conversation(
        &self,
        identity: &str,
    ) -> Result<Option<ConversationRecord>, String> {
        let query = format!(
            "user_id=eq.{}&select=user_id,mode,username,messages",
            urlencoding::encode(identity)
        );
        let rows: Vec<ConversationRow> = self.fetch("conversations", &query).await?;
        Ok(rows.into_iter().next().map(|row| row.into_record().1))
    }

    pub async fn upsert_conversation(
        &self,
        identity: &str,
        record: &ConversationRecord,
    ) -> Result<(), String> {
        let row = ConversationRow {
            user_id: identity.to_string(),
            mode: record.mode,
            username: record.username.clone(),
            messages: record.messages.clone(),
        };
        self.upsert("conversations", &row).await
    }

    pub async fn all_conversations(&self) -> Result<Vec<(String, ConversationRecord)>, String> {
        let rows: Vec<ConversationRow> = self
            .fetch("conversations", "select=user_id,mode,username,messages")
            .await?;
        Ok(rows.into_iter().map(ConversationRow::into_record).collect())
    }

    pub async fn delete_conversation(&self, identity: &str) -> Result<(), String> {
        let query = format!("user_id=eq.{}", urlencoding::encode(identity));
        self.delete("conversations", &query).await
    }

    // ---- mode settings ----

    pub async fn fetch_disabled_modes(&self) -> Result<Option<Vec<Mode>>, String> {
        let rows: Vec<SettingsValue> = self
            .fetch("bot_settings", "key=eq.disabled_modes&select=value")
            .await?;
        Ok(rows.into_iter().next().and_then(|row| row.value))
    }

    pub async fn save_disabled_modes(&self, modes: &[Mode]) -> Result<(), String> {
        let row = SettingsRow {
            key: "disabled_modes",
            value: modes,
        };
        self.upsert("bot_settings", &row).await
    }

    // ---- group registry ----

    pub async fn upsert_group(&self, chat_id: i64, title: &str) -> Result<(), String> {
        let row = GroupRow {
            chat_id,
            title: title.to_string(),
        };
        self.upsert("groups", &row).await
    }

    pub async fn fetch_groups(&self) -> Result<HashMap<i64, String>, String> {
        let rows: Vec<GroupRow> = self.fetch("groups", "select=chat_id,title").await?;
        Ok(rows.into_iter().map(|row| (row.chat_id, row.title)).collect())
    }
}
