use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use rusqlite::{Connection, OptionalExtension};

use crate::error::ClientError;

pub type DbPool = Arc<Mutex<Connection>>;

/// Fixed key of the single credential slot.
pub const TOKEN_KEY: &str = "token";

/// Durable slot holding the bearer credential. No TTL: an expired token is
/// kept until the server rejects it.
pub trait TokenStore: Send + Sync {
    fn save(&self, token: &str) -> Result<(), ClientError>;
    fn read(&self) -> Result<Option<String>, ClientError>;
    fn clear(&self) -> Result<(), ClientError>;
}

pub fn init_db(path: impl AsRef<Path>) -> rusqlite::Result<DbPool> {
    let conn = Connection::open(path)?;
    init_schema(&conn)?;
    Ok(Arc::new(Mutex::new(conn)))
}

pub fn init_memory_db() -> rusqlite::Result<DbPool> {
    let conn = Connection::open_in_memory()?;
    init_schema(&conn)?;
    Ok(Arc::new(Mutex::new(conn)))
}

fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS session_slot (
            name TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at INTEGER DEFAULT (strftime('%s', 'now'))
        );
        ",
    )
}

#[derive(Clone)]
pub struct SqliteTokenStore {
    pool: DbPool,
}

impl SqliteTokenStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ClientError> {
        Ok(SqliteTokenStore {
            pool: init_db(path)?,
        })
    }

    pub fn from_pool(pool: DbPool) -> Self {
        SqliteTokenStore { pool }
    }
}

impl TokenStore for SqliteTokenStore {
    fn save(&self, token: &str) -> Result<(), ClientError> {
        let conn = self.pool.lock().unwrap_or_else(PoisonError::into_inner);
        conn.execute(
            "INSERT INTO session_slot (name, value) VALUES (?1, ?2)
             ON CONFLICT(name) DO UPDATE SET value = excluded.value,
                 updated_at = strftime('%s', 'now')",
            (TOKEN_KEY, token),
        )?;
        Ok(())
    }

    fn read(&self) -> Result<Option<String>, ClientError> {
        let conn = self.pool.lock().unwrap_or_else(PoisonError::into_inner);
        let token = conn
            .query_row(
                "SELECT value FROM session_slot WHERE name = ?1",
                [TOKEN_KEY],
                |row| row.get(0),
            )
            .optional()?;
        Ok(token)
    }

    fn clear(&self) -> Result<(), ClientError> {
        let conn = self.pool.lock().unwrap_or_else(PoisonError::into_inner);
        conn.execute("DELETE FROM session_slot WHERE name = ?1", [TOKEN_KEY])?;
        Ok(())
    }
}

/// Process-local slot; gone when the process exits.
#[derive(Default)]
pub struct MemoryTokenStore {
    slot: Mutex<Option<String>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TokenStore for MemoryTokenStore {
    fn save(&self, token: &str) -> Result<(), ClientError> {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(token.to_string());
        Ok(())
    }

    fn read(&self) -> Result<Option<String>, ClientError> {
        Ok(self.slot.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }

    fn clear(&self) -> Result<(), ClientError> {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}
