use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::db::init_db;
use crate::error::{Result, StoreError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chat {
    pub id: i64,
    pub title: String,
    pub created_at: String,
    pub updated_at: String,
    pub agent_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: i64,
    pub chat_id: i64,
    pub role: String,
    pub content: String,
    pub message_type: String,
    pub created_at: String,
}

/// One append-only usage log row, written after every provider call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageEntry {
    pub timestamp: String,
    pub provider_id: String,
    pub model: String,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
}

/// Append-only conversation persistence over a single SQLite connection.
///
/// The `Mutex<Connection>` serialises writers, which also guarantees the
/// per-chat append order: message timestamps within one chat are
/// monotonically non-decreasing.
pub struct ChatStore {
    db: Mutex<Connection>,
}

impl ChatStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let conn = Connection::open(path)?;
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    pub fn create_chat(&self, title: &str, agent_id: Option<&str>) -> Result<i64> {
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO chats (title, created_at, updated_at, agent_id) VALUES (?1, ?2, ?2, ?3)",
            rusqlite::params![title, now, agent_id],
        )?;
        let id = db.last_insert_rowid();
        debug!(chat_id = id, %title, "chat created");
        Ok(id)
    }

    /// All chats, most recently updated first.
    pub fn list_chats(&self) -> Result<Vec<Chat>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, title, created_at, updated_at, agent_id
             FROM chats ORDER BY updated_at DESC",
        )?;
        let chats = stmt
            .query_map([], row_to_chat)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(chats)
    }

    pub fn get_chat(&self, id: i64) -> Result<Option<Chat>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            "SELECT id, title, created_at, updated_at, agent_id FROM chats WHERE id = ?1",
            [id],
            row_to_chat,
        ) {
            Ok(chat) => Ok(Some(chat)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Database(e)),
        }
    }

    /// Ordered message history for a chat.
    pub fn get_messages(&self, chat_id: i64) -> Result<Vec<ChatMessage>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, chat_id, role, content, message_type, created_at
             FROM messages WHERE chat_id = ?1 ORDER BY created_at, id",
        )?;
        let messages = stmt
            .query_map([chat_id], row_to_message)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(messages)
    }

    /// Append a message and bump the chat's updated_at.
    pub fn add_message(&self, chat_id: i64, role: &str, content: &str) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO messages (chat_id, role, content, message_type, created_at)
             VALUES (?1, ?2, ?3, 'text', ?4)",
            rusqlite::params![chat_id, role, content, now],
        )?;
        db.execute(
            "UPDATE chats SET updated_at = ?1 WHERE id = ?2",
            rusqlite::params![now, chat_id],
        )?;
        Ok(())
    }

    pub fn update_chat_title(&self, chat_id: i64, title: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE chats SET title = ?1 WHERE id = ?2",
            rusqlite::params![title, chat_id],
        )?;
        if n == 0 {
            return Err(StoreError::ChatNotFound { id: chat_id });
        }
        Ok(())
    }

    /// Delete a chat and all its messages. The caller is responsible for
    /// removing the chat's file directory (see `FileStore::delete_chat_files`).
    pub fn delete_chat(&self, chat_id: i64) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute("DELETE FROM messages WHERE chat_id = ?1", [chat_id])?;
        let n = db.execute("DELETE FROM chats WHERE id = ?1", [chat_id])?;
        if n == 0 {
            return Err(StoreError::ChatNotFound { id: chat_id });
        }
        Ok(())
    }

    pub fn record_usage(&self, entry: &UsageEntry) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO usage_log
             (timestamp, provider_id, model, bytes_sent, bytes_received,
              prompt_tokens, completion_tokens)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                entry.timestamp,
                entry.provider_id,
                entry.model,
                entry.bytes_sent as i64,
                entry.bytes_received as i64,
                entry.prompt_tokens,
                entry.completion_tokens,
            ],
        )?;
        Ok(())
    }

    /// Most recent usage entries, newest first.
    pub fn usage_log(&self, limit: usize) -> Result<Vec<UsageEntry>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT timestamp, provider_id, model, bytes_sent, bytes_received,
                    prompt_tokens, completion_tokens
             FROM usage_log ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map([limit as i64], |row| {
                Ok(UsageEntry {
                    timestamp: row.get(0)?,
                    provider_id: row.get(1)?,
                    model: row.get(2)?,
                    bytes_sent: row.get::<_, i64>(3)? as u64,
                    bytes_received: row.get::<_, i64>(4)? as u64,
                    prompt_tokens: row.get(5)?,
                    completion_tokens: row.get(6)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }
}

fn row_to_chat(row: &rusqlite::Row<'_>) -> rusqlite::Result<Chat> {
    Ok(Chat {
        id: row.get(0)?,
        title: row.get(1)?,
        created_at: row.get(2)?,
        updated_at: row.get(3)?,
        agent_id: row.get(4)?,
    })
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChatMessage> {
    Ok(ChatMessage {
        id: row.get(0)?,
        chat_id: row.get(1)?,
        role: row.get(2)?,
        content: row.get(3)?,
        message_type: row.get(4)?,
        created_at: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_fetch_chat() {
        let store = ChatStore::open_in_memory().unwrap();
        let id = store.create_chat("Neuer Chat", None).unwrap();
        let chat = store.get_chat(id).unwrap().unwrap();
        assert_eq!(chat.title, "Neuer Chat");
        assert!(chat.agent_id.is_none());
        assert!(store.get_chat(id + 1).unwrap().is_none());
    }

    #[test]
    fn messages_append_in_order() {
        let store = ChatStore::open_in_memory().unwrap();
        let id = store.create_chat("t", None).unwrap();
        store.add_message(id, "user", "Hallo").unwrap();
        store.add_message(id, "assistant", "Hi!").unwrap();

        let msgs = store.get_messages(id).unwrap();
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].role, "user");
        assert_eq!(msgs[1].role, "assistant");
        assert!(msgs[0].created_at <= msgs[1].created_at);
    }

    #[test]
    fn delete_chat_removes_messages() {
        let store = ChatStore::open_in_memory().unwrap();
        let id = store.create_chat("t", None).unwrap();
        store.add_message(id, "user", "x").unwrap();
        store.delete_chat(id).unwrap();

        assert!(store.get_chat(id).unwrap().is_none());
        assert!(store.get_messages(id).unwrap().is_empty());
        assert!(matches!(
            store.delete_chat(id),
            Err(StoreError::ChatNotFound { .. })
        ));
    }

    #[test]
    fn list_orders_by_updated_at() {
        let store = ChatStore::open_in_memory().unwrap();
        let a = store.create_chat("a", None).unwrap();
        let b = store.create_chat("b", None).unwrap();
        // Touching chat `a` moves it to the front.
        std::thread::sleep(std::time::Duration::from_millis(5));
        store.add_message(a, "user", "bump").unwrap();

        let chats = store.list_chats().unwrap();
        assert_eq!(chats[0].id, a);
        assert_eq!(chats[1].id, b);
    }

    #[test]
    fn usage_log_round_trip() {
        let store = ChatStore::open_in_memory().unwrap();
        store
            .record_usage(&UsageEntry {
                timestamp: chrono::Utc::now().to_rfc3339(),
                provider_id: "openrouter".to_string(),
                model: "openai/gpt-4o-mini".to_string(),
                bytes_sent: 1200,
                bytes_received: 3400,
                prompt_tokens: Some(100),
                completion_tokens: Some(50),
            })
            .unwrap();

        let rows = store.usage_log(10).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].bytes_sent, 1200);
        assert_eq!(rows[0].prompt_tokens, Some(100));
    }
}
