//! In-memory key-value store.

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use super::KeyValueStore;
use crate::error::StoreResult;

/// Process-local store; contents are lost on restart
#[derive(Default)]
pub struct MemoryStore {
    entries: DashMap<String, (String, DateTime<Utc>)>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.entries.get(key).map(|entry| entry.value().0.clone()))
    }

    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.entries
            .insert(key.to_string(), (value.to_string(), Utc::now()));
        Ok(())
    }

    fn remove(&self, key: &str) -> StoreResult<()> {
        self.entries.remove(key);
        Ok(())
    }

    fn purge_older_than(&self, prefix: &str, cutoff: DateTime<Utc>) -> StoreResult<usize> {
        let before = self.entries.len();
        self.entries
            .retain(|key, (_, updated_at)| !(key.starts_with(prefix) && *updated_at < cutoff));
        Ok(before - self.entries.len())
    }
}
