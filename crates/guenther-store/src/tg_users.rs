//! Persisted `@username` → Telegram chat-id mapping.
//!
//! Written by the gateway on every authorized inbound message so outbound
//! tool-driven messages can target a user even if they have not spoken
//! recently. File-backed, last-writer-wins.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use guenther_core::config::{read_json_or_default, write_json_atomic};

#[derive(Debug, Clone)]
pub struct TelegramUserMap {
    path: PathBuf,
}

impl TelegramUserMap {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join("telegram_users.json"),
        }
    }

    pub fn get(&self, username: &str) -> Option<i64> {
        let map: BTreeMap<String, i64> = read_json_or_default(&self.path);
        map.get(username.trim_start_matches('@')).copied()
    }

    /// Record the mapping; no-op when the stored value already matches.
    pub fn record(&self, username: &str, chat_id: i64) {
        let username = username.trim_start_matches('@');
        let mut map: BTreeMap<String, i64> = read_json_or_default(&self.path);
        if map.get(username) == Some(&chat_id) {
            return;
        }
        map.insert(username.to_string(), chat_id);
        if let Err(e) = write_json_atomic(&self.path, &map) {
            tracing::warn!(error = %e, "telegram user map write failed");
        }
    }
}
