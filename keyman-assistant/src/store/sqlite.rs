//! SQLite-backed key-value store.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use super::{KeyValueStore, migrations, timestamp};
use crate::error::{StoreError, StoreResult};

/// Key-value store on a single SQLite connection
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the database at the given path
    pub fn open(path: &Path) -> StoreResult<Self> {
        let conn = Connection::open(path).map_err(StoreError::Connection)?;

        // WAL lets readers proceed while a transcript is being written
        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .map_err(StoreError::Query)?;

        migrations::run_migrations(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl KeyValueStore for SqliteStore {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.conn()
            .query_row(
                "SELECT value FROM kv_store WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(StoreError::Query)
    }

    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.conn()
            .execute(
                r#"
                INSERT INTO kv_store (key, value, updated_at)
                VALUES (?1, ?2, ?3)
                ON CONFLICT(key) DO UPDATE SET
                    value = excluded.value,
                    updated_at = excluded.updated_at
                "#,
                params![key, value, timestamp(Utc::now())],
            )
            .map_err(StoreError::Query)?;

        Ok(())
    }

    fn remove(&self, key: &str) -> StoreResult<()> {
        self.conn()
            .execute("DELETE FROM kv_store WHERE key = ?1", params![key])
            .map_err(StoreError::Query)?;

        Ok(())
    }

    fn purge_older_than(&self, prefix: &str, cutoff: DateTime<Utc>) -> StoreResult<usize> {
        // substr instead of LIKE so prefixes never need wildcard escaping
        self.conn()
            .execute(
                "DELETE FROM kv_store WHERE substr(key, 1, length(?1)) = ?1 AND updated_at < ?2",
                params![prefix, timestamp(cutoff)],
            )
            .map_err(StoreError::Query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn open_temp() -> (tempfile::TempDir, SqliteStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(&dir.path().join("keyman.db")).unwrap();
        (dir, store)
    }

    #[test]
    fn test_set_get_remove() {
        let (_dir, store) = open_temp();

        assert_eq!(store.get("missing").unwrap(), None);

        store.set("request_chat:s1", "[]").unwrap();
        assert_eq!(store.get("request_chat:s1").unwrap().as_deref(), Some("[]"));

        store.set("request_chat:s1", "[1]").unwrap();
        assert_eq!(store.get("request_chat:s1").unwrap().as_deref(), Some("[1]"));

        store.remove("request_chat:s1").unwrap();
        assert_eq!(store.get("request_chat:s1").unwrap(), None);

        // Removing twice is fine
        store.remove("request_chat:s1").unwrap();
    }

    #[test]
    fn test_purge_only_touches_prefix() {
        let (_dir, store) = open_temp();

        store.set("request_chat:a", "[]").unwrap();
        store.set("request_chat:b", "[]").unwrap();
        store.set("keyman.environment", "production").unwrap();

        let removed = store
            .purge_older_than("request_chat:", Utc::now() + Duration::seconds(5))
            .unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.get("request_chat:a").unwrap(), None);
        assert_eq!(
            store.get("keyman.environment").unwrap().as_deref(),
            Some("production")
        );

        store.set("request_chat:c", "[]").unwrap();
        let removed = store
            .purge_older_than("request_chat:", Utc::now() - Duration::hours(1))
            .unwrap();
        assert_eq!(removed, 0);
    }

    #[test]
    fn test_reopen_keeps_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keyman.db");

        SqliteStore::open(&path)
            .unwrap()
            .set("keyman.user_type", "CLIENT")
            .unwrap();

        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(
            store.get("keyman.user_type").unwrap().as_deref(),
            Some("CLIENT")
        );
    }
}
