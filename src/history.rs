//! History Store
//!
//! Stores conversation turns per user so chat context survives restarts.
//! Append-only apart from an explicit per-user clear.

use parking_lot::Mutex;
use rusqlite::{params, Connection};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unknown role in history: {0}")]
    InvalidRole(String),
}

/// Who authored a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
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

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(StorageError::InvalidRole(other.to_string())),
        }
    }
}

/// A single persisted turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub id: i64,
    pub user_id: i64,
    pub role: Role,
    pub text: String,
    pub created_at: i64, // Unix timestamp (ms)
}

/// History store with SQLite backend
pub struct HistoryStore {
    conn: Mutex<Connection>,
}

impl HistoryStore {
    /// Open or create history database
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let store = Self::with_connection(Connection::open(path)?)?;
        info!("History store opened: {}", path.display());
        Ok(store)
    }

    /// In-memory store (tests, ephemeral runs)
    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StorageError> {
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), StorageError> {
        self.conn.lock().execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS turns (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                role TEXT NOT NULL CHECK(role IN ('user', 'assistant')),
                text TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_turns_user_recent
                ON turns(user_id, created_at DESC, id DESC);
            "#,
        )?;

        Ok(())
    }

    /// Append a turn stamped with the current time
    pub fn append(&self, user_id: i64, role: Role, text: &str) -> Result<Turn, StorageError> {
        let created_at = chrono::Utc::now().timestamp_millis();

        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO turns (user_id, role, text, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![user_id, role.as_str(), text, created_at],
        )?;
        let id = conn.last_insert_rowid();

        debug!("Appended {} turn {} for user {}", role, id, user_id);
        Ok(Turn {
            id,
            user_id,
            role,
            text: text.to_string(),
            created_at,
        })
    }

    /// Most recent `limit` turns for a user, oldest first
    pub fn read(&self, user_id: i64, limit: usize) -> Result<Vec<Turn>, StorageError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, user_id, role, text, created_at FROM turns
             WHERE user_id = ?1
             ORDER BY created_at DESC, id DESC
             LIMIT ?2",
        )?;

        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt.query_map(params![user_id, limit], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, i64>(4)?,
            ))
        })?;

        let mut turns = Vec::new();
        for row in rows {
            let (id, user_id, role, text, created_at) = row?;
            turns.push(Turn {
                id,
                user_id,
                role: role.parse()?,
                text,
                created_at,
            });
        }

        // Reverse to get chronological order
        turns.reverse();
        Ok(turns)
    }

    /// Delete all turns for a user
    pub fn clear(&self, user_id: i64) -> Result<usize, StorageError> {
        let rows = self
            .conn
            .lock()
            .execute("DELETE FROM turns WHERE user_id = ?1", params![user_id])?;
        info!("Cleared {} turns for user {}", rows, user_id);
        Ok(rows)
    }

    /// Number of stored turns for a user
    pub fn count(&self, user_id: i64) -> Result<usize, StorageError> {
        let count: i64 = self.conn.lock().query_row(
            "SELECT COUNT(*) FROM turns WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}
