//! Local identity store
//!
//! Persists the visitor id and the active session id across restarts. These
//! two keys are the only client state treated as durable.

mod schema;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use schema::{DELETE_IF_VALUE, INSERT_IF_ABSENT, SCHEMA, SELECT, UPSERT};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("Identity store error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Identity store lock poisoned")]
    Poisoned,
}

pub type IdentityResult<T> = Result<T, IdentityError>;

/// Durable storage keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdentityKey {
    VisitorId,
    SessionId,
}

impl IdentityKey {
    pub fn as_str(self) -> &'static str {
        match self {
            IdentityKey::VisitorId => "visitor_id",
            IdentityKey::SessionId => "session_id",
        }
    }
}

/// Durable on-device storage for the visitor and session identifiers
pub trait IdentityStore: Send + Sync {
    /// Read a stored value
    fn get(&self, key: IdentityKey) -> IdentityResult<Option<String>>;

    /// Store `value` unless the key already holds one; returns the stored value
    fn insert_if_absent(&self, key: IdentityKey, value: &str) -> IdentityResult<String>;

    /// Store `value`, replacing any previous one
    fn set(&self, key: IdentityKey, value: &str) -> IdentityResult<()>;

    /// Remove the key if it still holds `value`; returns whether it was removed
    fn remove_if(&self, key: IdentityKey, value: &str) -> IdentityResult<bool>;

    fn visitor_id(&self) -> IdentityResult<Option<String>> {
        self.get(IdentityKey::VisitorId)
    }

    /// The visitor id is generated once per device and never overwritten
    fn ensure_visitor_id(&self, candidate: &str) -> IdentityResult<String> {
        self.insert_if_absent(IdentityKey::VisitorId, candidate)
    }

    fn session_id(&self) -> IdentityResult<Option<String>> {
        self.get(IdentityKey::SessionId)
    }

    fn set_session_id(&self, session_id: &str) -> IdentityResult<()> {
        self.set(IdentityKey::SessionId, session_id)
    }

    fn clear_session_id(&self, session_id: &str) -> IdentityResult<bool> {
        self.remove_if(IdentityKey::SessionId, session_id)
    }
}

impl<T: IdentityStore + ?Sized> IdentityStore for Arc<T> {
    fn get(&self, key: IdentityKey) -> IdentityResult<Option<String>> {
        (**self).get(key)
    }

    fn insert_if_absent(&self, key: IdentityKey, value: &str) -> IdentityResult<String> {
        (**self).insert_if_absent(key, value)
    }

    fn set(&self, key: IdentityKey, value: &str) -> IdentityResult<()> {
        (**self).set(key, value)
    }

    fn remove_if(&self, key: IdentityKey, value: &str) -> IdentityResult<bool> {
        (**self).remove_if(key, value)
    }
}

/// SQLite-backed identity store
#[derive(Clone)]
pub struct SqliteIdentityStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteIdentityStore {
    /// Open or create the store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> IdentityResult<Self> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// Open an in-memory store (nothing survives the process)
    pub fn open_in_memory() -> IdentityResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> IdentityResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> IdentityResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| IdentityError::Poisoned)
    }
}

impl IdentityStore for SqliteIdentityStore {
    fn get(&self, key: IdentityKey) -> IdentityResult<Option<String>> {
        let conn = self.conn()?;
        let value = conn
            .query_row(SELECT, params![key.as_str()], |row| row.get(0))
            .optional()?;
        Ok(value)
    }

    fn insert_if_absent(&self, key: IdentityKey, value: &str) -> IdentityResult<String> {
        let conn = self.conn()?;
        let now = Utc::now().to_rfc3339();
        conn.execute(INSERT_IF_ABSENT, params![key.as_str(), value, now])?;
        let stored = conn.query_row(SELECT, params![key.as_str()], |row| row.get(0))?;
        Ok(stored)
    }

    fn set(&self, key: IdentityKey, value: &str) -> IdentityResult<()> {
        let conn = self.conn()?;
        let now = Utc::now().to_rfc3339();
        conn.execute(UPSERT, params![key.as_str(), value, now])?;
        Ok(())
    }

    fn remove_if(&self, key: IdentityKey, value: &str) -> IdentityResult<bool> {
        let conn = self.conn()?;
        let removed = conn.execute(DELETE_IF_VALUE, params![key.as_str(), value])?;
        Ok(removed > 0)
    }
}

/// Process-local identity store for embedding without persistence
#[derive(Default)]
pub struct MemoryIdentityStore {
    values: Mutex<HashMap<IdentityKey, String>>,
}

impl MemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn values(&self) -> IdentityResult<MutexGuard<'_, HashMap<IdentityKey, String>>> {
        self.values.lock().map_err(|_| IdentityError::Poisoned)
    }
}

impl IdentityStore for MemoryIdentityStore {
    fn get(&self, key: IdentityKey) -> IdentityResult<Option<String>> {
        Ok(self.values()?.get(&key).cloned())
    }

    fn insert_if_absent(&self, key: IdentityKey, value: &str) -> IdentityResult<String> {
        let mut values = self.values()?;
        Ok(values.entry(key).or_insert_with(|| value.to_string()).clone())
    }

    fn set(&self, key: IdentityKey, value: &str) -> IdentityResult<()> {
        self.values()?.insert(key, value.to_string());
        Ok(())
    }

    fn remove_if(&self, key: IdentityKey, value: &str) -> IdentityResult<bool> {
        let mut values = self.values()?;
        if values.get(&key).is_some_and(|v| v == value) {
            values.remove(&key);
            return Ok(true);
        }
        Ok(false)
    }
}
