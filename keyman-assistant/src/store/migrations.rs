//! Database schema migrations.

use rusqlite::Connection;

use crate::error::{StoreError, StoreResult};

/// Run all database migrations.
///
/// Called during store initialization to ensure the schema is up to date.
pub(super) fn run_migrations(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        r#"
        -- Transcripts and plain-string preferences share one table
        CREATE TABLE IF NOT EXISTS kv_store (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_kv_store_updated ON kv_store(updated_at);
    "#,
    )
    .map_err(|e| StoreError::Migration {
        message: e.to_string(),
    })?;

    Ok(())
}
