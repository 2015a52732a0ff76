use rusqlite::{Connection, Result};

/// Initialise chat tables. Safe to call on every startup (idempotent).
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch("PRAGMA foreign_keys=ON; PRAGMA busy_timeout=3000;")?;
    create_chats_table(conn)?;
    create_messages_table(conn)?;
    create_usage_table(conn)?;
    Ok(())
}

fn create_chats_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS chats (
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            title      TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            agent_id   TEXT
        );",
    )
}

fn create_messages_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS messages (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            chat_id      INTEGER NOT NULL,
            role         TEXT NOT NULL,
            content      TEXT NOT NULL,
            message_type TEXT NOT NULL DEFAULT 'text',
            created_at   TEXT NOT NULL,
            FOREIGN KEY (chat_id) REFERENCES chats(id) ON DELETE CASCADE
        );
        CREATE INDEX IF NOT EXISTS idx_messages_chat
            ON messages(chat_id, created_at);",
    )
}

fn create_usage_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS usage_log (
            id                INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp         TEXT NOT NULL,
            provider_id       TEXT NOT NULL,
            model             TEXT NOT NULL,
            bytes_sent        INTEGER NOT NULL DEFAULT 0,
            bytes_received    INTEGER NOT NULL DEFAULT 0,
            prompt_tokens     INTEGER,
            completion_tokens INTEGER
        );",
    )
}
