//! Key-value storage for transcripts and preferences.
//!
//! The conversation engine only talks to the [`KeyValueStore`] port. The
//! service wires in the SQLite implementation; tests and the `memory` storage
//! backend use the in-memory one.

mod memory;
mod migrations;
pub mod preferences;
mod sqlite;

pub use memory::MemoryStore;
pub use preferences::Preferences;
pub use sqlite::SqliteStore;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::StoreResult;

/// Minimal key-value port with string values
pub trait KeyValueStore: Send + Sync {
    /// Read a value, `None` when the key is absent
    fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Insert or overwrite a value
    fn set(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Delete a value; removing a missing key is not an error
    fn remove(&self, key: &str) -> StoreResult<()>;

    /// Delete entries under `prefix` last written before `cutoff`
    fn purge_older_than(&self, prefix: &str, cutoff: DateTime<Utc>) -> StoreResult<usize>;
}

/// Timestamp format used for `updated_at` so that string order matches time order
pub(crate) fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}
