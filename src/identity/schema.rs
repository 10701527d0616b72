//! Identity store schema

/// SQL schema for initialization
pub const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS identity (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
";

/// Insert a value only if the key is absent
pub const INSERT_IF_ABSENT: &str =
    "INSERT INTO identity (key, value, updated_at) VALUES (?1, ?2, ?3)
     ON CONFLICT(key) DO NOTHING";

/// Insert or overwrite a value
pub const UPSERT: &str = "INSERT INTO identity (key, value, updated_at) VALUES (?1, ?2, ?3)
     ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at";

pub const SELECT: &str = "SELECT value FROM identity WHERE key = ?1";

/// Delete a key only while it still holds the given value
pub const DELETE_IF_VALUE: &str = "DELETE FROM identity WHERE key = ?1 AND value = ?2";
