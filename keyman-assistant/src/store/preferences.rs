//! Client preferences stored as plain-string keys, scoped to one session.

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::KeyValueStore;
use crate::conversation::UserType;
use crate::error::StoreResult;

pub const ENVIRONMENT_KEY: &str = "keyman.environment";
pub const USER_TYPE_KEY: &str = "keyman.user_type";
pub const BASE_URL_KEY: &str = "keyman.base_url";

/// Environment, actor role and webhook base URL chosen by a client
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preferences {
    #[serde(default)]
    pub environment: Option<String>,
    #[serde(default)]
    pub user_type: Option<UserType>,
    #[serde(default)]
    pub base_url: Option<String>,
}

impl Preferences {
    /// Read the scope's preference keys; blank values count as unset
    pub fn load(store: &dyn KeyValueStore, scope: &str) -> StoreResult<Self> {
        let environment = non_blank(store.get(&scoped(ENVIRONMENT_KEY, scope))?);
        let base_url = non_blank(store.get(&scoped(BASE_URL_KEY, scope))?);
        let user_type = non_blank(store.get(&scoped(USER_TYPE_KEY, scope))?).and_then(|raw| {
            raw.parse::<UserType>()
                .inspect_err(|_| warn!(value = %raw, "Ignoring unknown user type preference"))
                .ok()
        });

        Ok(Self {
            environment,
            user_type,
            base_url,
        })
    }

    /// Write every key of the scope; unset values are removed
    pub fn save(&self, store: &dyn KeyValueStore, scope: &str) -> StoreResult<()> {
        write(store, &scoped(ENVIRONMENT_KEY, scope), self.environment.as_deref())?;
        write(store, &scoped(BASE_URL_KEY, scope), self.base_url.as_deref())?;
        let user_type = self.user_type.map(|t| t.to_string());
        write(store, &scoped(USER_TYPE_KEY, scope), user_type.as_deref())?;
        Ok(())
    }
}

/// Storage key of one preference within a session scope
pub fn scoped(key: &str, scope: &str) -> String {
    format!("{key}:{scope}")
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn write(store: &dyn KeyValueStore, key: &str, value: Option<&str>) -> StoreResult<()> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        Some(v) => store.set(key, v),
        None => store.remove(key),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    const SCOPE: &str = "request_chat:s1";

    #[test]
    fn test_save_and_load() {
        let store = MemoryStore::new();
        let prefs = Preferences {
            environment: Some("staging".to_string()),
            user_type: Some(UserType::ServiceProvider),
            base_url: None,
        };
        prefs.save(&store, SCOPE).unwrap();

        assert_eq!(
            store
                .get("keyman.user_type:request_chat:s1")
                .unwrap()
                .as_deref(),
            Some("SERVICE_PROVIDER")
        );
        assert_eq!(store.get(&scoped(BASE_URL_KEY, SCOPE)).unwrap(), None);
        assert_eq!(Preferences::load(&store, SCOPE).unwrap(), prefs);
    }

    #[test]
    fn test_scopes_are_independent() {
        let store = MemoryStore::new();
        let prefs = Preferences {
            base_url: Some("http://localhost:5678/webhook/requests".to_string()),
            ..Preferences::default()
        };
        prefs.save(&store, SCOPE).unwrap();

        assert_eq!(
            Preferences::load(&store, "request_chat:s2").unwrap(),
            Preferences::default()
        );
        assert_eq!(store.get(BASE_URL_KEY).unwrap(), None);
    }

    #[test]
    fn test_unset_removes_keys() {
        let store = MemoryStore::new();
        store.set(&scoped(ENVIRONMENT_KEY, SCOPE), "production").unwrap();

        Preferences::default().save(&store, SCOPE).unwrap();
        assert_eq!(store.get(&scoped(ENVIRONMENT_KEY, SCOPE)).unwrap(), None);
    }

    #[test]
    fn test_blank_and_unknown_values_ignored() {
        let store = MemoryStore::new();
        store.set(&scoped(ENVIRONMENT_KEY, SCOPE), "   ").unwrap();
        store.set(&scoped(USER_TYPE_KEY, SCOPE), "ADMIN").unwrap();
        store
            .set(&scoped(BASE_URL_KEY, SCOPE), " https://hooks.example/webhook ")
            .unwrap();

        let prefs = Preferences::load(&store, SCOPE).unwrap();
        assert_eq!(prefs.environment, None);
        assert_eq!(prefs.user_type, None);
        assert_eq!(prefs.base_url.as_deref(), Some("https://hooks.example/webhook"));
    }
}
