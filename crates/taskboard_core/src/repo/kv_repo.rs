//! Key-value persistence for OAuth token state.

use crate::db::SharedConnection;
use crate::repo::{lock, RepoResult};
use crate::sync::auth::KeyValueStore;
use chrono::Utc;
use rusqlite::{params, OptionalExtension};

/// SQLite-backed key-value store.
pub struct SqliteKeyValueStore {
    conn: SharedConnection,
}

impl SqliteKeyValueStore {
    pub fn new(conn: SharedConnection) -> Self {
        Self { conn }
    }
}

impl KeyValueStore for SqliteKeyValueStore {
    fn get(&self, key: &str) -> RepoResult<Option<String>> {
        let conn = lock(&self.conn);
        let value = conn
            .query_row(
                "SELECT value FROM kv_store WHERE key = ?1;",
                [key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> RepoResult<()> {
        let conn = lock(&self.conn);
        conn.execute(
            "INSERT INTO kv_store (key, value, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at;",
            params![key, value, Utc::now().timestamp_millis()],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> RepoResult<()> {
        let conn = lock(&self.conn);
        conn.execute("DELETE FROM kv_store WHERE key = ?1;", [key])?;
        Ok(())
    }
}
