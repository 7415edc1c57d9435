use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;

use crate::common::{ChatMessage, ChatUser};
use crate::error::ChatResult;

/// SQLite-backed message history and local identity.
///
/// Sits beside the in-memory store as a persistence collaborator: the chat
/// core never reads from it while running.
pub struct HistoryDatabase {
    conn: Connection,
}

impl HistoryDatabase {
    /// Open (or create) the database at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> ChatResult<Self> {
        let history = Self {
            conn: Connection::open(path)?,
        };
        history.init_schema()?;
        Ok(history)
    }

    pub fn in_memory() -> ChatResult<Self> {
        let history = Self {
            conn: Connection::open_in_memory()?,
        };
        history.init_schema()?;
        Ok(history)
    }

    fn init_schema(&self) -> ChatResult<()> {
        // seq keeps the order in which this node learned each message
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS messages (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                payload TEXT NOT NULL
            )",
            [],
        )?;

        // Identity table (single row)
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS identity (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                user_id TEXT NOT NULL,
                name TEXT NOT NULL
            )",
            [],
        )?;

        Ok(())
    }

    // ========== Messages ==========

    /// Store a message; already stored ids are ignored. Returns whether a row was added.
    pub fn save_message(&self, message: &ChatMessage) -> ChatResult<bool> {
        let payload = serde_json::to_string(message)?;
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO messages (id, payload) VALUES (?1, ?2)",
            params![message.id.to_string(), payload],
        )?;
        Ok(inserted > 0)
    }

    /// All stored messages in the order they were saved. Rows that no longer
    /// decode are skipped.
    pub fn load_messages(&self) -> ChatResult<Vec<ChatMessage>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, payload FROM messages ORDER BY seq ASC")?;

        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        let messages = rows
            .into_iter()
            .filter_map(|(id, payload)| match serde_json::from_str(&payload) {
                Ok(message) => Some(message),
                Err(err) => {
                    log::warn!("Skipping undecodable stored message {id}: {err}");
                    None
                }
            })
            .collect();

        Ok(messages)
    }

    pub fn message_count(&self) -> ChatResult<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    // ========== Identity ==========

    /// Save the local user (replace if exists)
    pub fn save_identity(&self, user: &ChatUser) -> ChatResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO identity (id, user_id, name) VALUES (1, ?1, ?2)",
            params![user.id.to_string(), user.name],
        )?;
        Ok(())
    }

    pub fn load_identity(&self) -> ChatResult<Option<ChatUser>> {
        let row = self
            .conn
            .query_row("SELECT user_id, name FROM identity WHERE id = 1", [], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .optional()?;

        Ok(row.and_then(|(user_id, name)| match user_id.parse() {
            Ok(id) => Some(ChatUser::with_id(id, name)),
            Err(err) => {
                log::warn!("Stored identity {user_id} is not a valid id: {err}");
                None
            }
        }))
    }

    /// Load the stored identity, or persist `fallback` as the identity.
    pub fn load_or_create_identity(&self, fallback: ChatUser) -> ChatResult<ChatUser> {
        if let Some(user) = self.load_identity()? {
            return Ok(user);
        }
        self.save_identity(&fallback)?;
        Ok(fallback)
    }
}
