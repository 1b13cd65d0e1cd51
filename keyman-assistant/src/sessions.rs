//! In-memory registry of conversation engines, one per session identity.
//!
//! A session belongs to the user token that first opened it. The owner's
//! token fingerprint is kept with the live session and under
//! `request_owner:{key}`, so a different token is refused even after the
//! session was evicted and its transcript is restored from storage.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::config::RuntimeConfig;
use crate::conversation::{
    ConversationEngine, ConversationObserver, Message, SessionIdentity, TRANSCRIPT_KEY_PREFIX,
};
use crate::error::{ServiceError, ServiceResult, StoreResult};
use crate::i18n::I18n;
use crate::store::{KeyValueStore, Preferences};
use crate::webhook::AssistantTransport;

/// Key prefix of the persisted session owner fingerprints
pub const OWNER_KEY_PREFIX: &str = "request_owner:";

/// SHA-256 of the trimmed user token, empty for sessions without one
fn owner_fingerprint(user_token: Option<&str>) -> String {
    match user_token.map(str::trim).filter(|token| !token.is_empty()) {
        Some(token) => {
            let mut hasher = Sha256::new();
            hasher.update(token.as_bytes());
            format!("{:x}", hasher.finalize())
        }
        None => String::new(),
    }
}

/// Collects `on_error` reports until the API layer drains them into a response
pub struct SessionObserver {
    conversation_key: String,
    errors: Mutex<Vec<String>>,
}

impl SessionObserver {
    fn new(conversation_key: String) -> Self {
        Self {
            conversation_key,
            errors: Mutex::new(Vec::new()),
        }
    }

    pub fn drain_errors(&self) -> Vec<String> {
        std::mem::take(&mut *self.errors.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl ConversationObserver for SessionObserver {
    fn on_error(&self, message: &str) {
        warn!(key = %self.conversation_key, message = %message, "Conversation error");
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message.to_string());
    }

    fn on_request_submitted(&self, message: &Message) {
        info!(
            key = %self.conversation_key,
            message_id = %message.id,
            "Material request submitted by assistant"
        );
    }
}

/// One live conversation
pub struct Session<T> {
    pub engine: ConversationEngine<T>,
    pub observer: Arc<SessionObserver>,
    /// Transcript key, also the scope of the session's preferences
    pub key: String,
    owner: String,
}

/// Live sessions keyed by transcript key
pub struct SessionRegistry<T> {
    sessions: DashMap<String, Arc<Session<T>>>,
    transport: Arc<T>,
    store: Arc<dyn KeyValueStore>,
    config: Arc<RuntimeConfig>,
    i18n: Arc<I18n>,
}

impl<T: AssistantTransport> SessionRegistry<T> {
    pub fn new(
        transport: Arc<T>,
        store: Arc<dyn KeyValueStore>,
        config: Arc<RuntimeConfig>,
        i18n: Arc<I18n>,
    ) -> Self {
        Self {
            sessions: DashMap::new(),
            transport,
            store,
            config,
            i18n,
        }
    }

    /// Existing session for the identity, or a new one restored from storage.
    ///
    /// Fails with `SessionConflict` when the session belongs to another user
    /// token. The user type is fixed when the session is created.
    pub fn get_or_create(&self, identity: SessionIdentity) -> ServiceResult<Arc<Session<T>>> {
        let key = identity.storage_key().ok_or(ServiceError::SessionRequired)?;
        let owner = owner_fingerprint(identity.user_token.as_deref());
        let owner_key = format!("{OWNER_KEY_PREFIX}{key}");

        let live = self.sessions.get(&key).map(|session| session.clone());
        let session = match live {
            Some(session) => session,
            None => {
                if let Some(stored) = self.store.get(&owner_key)?
                    && stored != owner
                {
                    warn!(key = %key, "Refusing stored session opened with another token");
                    return Err(ServiceError::SessionConflict { key });
                }
                let preferences = Preferences::load(self.store.as_ref(), &key)?;
                self.sessions
                    .entry(key.clone())
                    .or_insert_with(|| self.create(&key, identity, owner.clone(), preferences))
                    .clone()
            }
        };

        if session.owner != owner {
            warn!(key = %key, "Refusing live session opened with another token");
            return Err(ServiceError::SessionConflict { key });
        }

        // Rewritten on every access so the marker outlives the transcript
        self.store.set(&owner_key, &owner)?;
        Ok(session)
    }

    fn create(
        &self,
        key: &str,
        identity: SessionIdentity,
        owner: String,
        preferences: Preferences,
    ) -> Arc<Session<T>> {
        debug!(key = %key, user_type = %identity.user_type, "Creating session");
        let observer = Arc::new(SessionObserver::new(key.to_string()));
        let discard_stale = self.config.dynamic().assistant.discard_stale_replies;
        let engine = ConversationEngine::new(
            self.transport.clone(),
            self.store.clone(),
            identity,
            observer.clone(),
            self.i18n.clone(),
        )
        .with_stale_reply_guard(discard_stale)
        .with_preferences(preferences);

        Arc::new(Session {
            engine,
            observer,
            key: key.to_string(),
            owner,
        })
    }

    /// Store a session's preferences and apply them to its engine
    pub fn update_preferences(
        &self,
        session: &Session<T>,
        preferences: &Preferences,
    ) -> StoreResult<Preferences> {
        preferences.save(self.store.as_ref(), &session.key)?;
        let stored = Preferences::load(self.store.as_ref(), &session.key)?;
        session.engine.set_preferences(stored.clone());

        info!(
            key = %session.key,
            environment = ?stored.environment,
            user_type = ?stored.user_type,
            base_url_set = stored.base_url.is_some(),
            "Session preferences updated"
        );
        Ok(stored)
    }

    /// Drop sessions idle for at least `ttl`; their transcripts stay stored
    pub fn evict_idle(&self, ttl: Duration) -> usize {
        let before = self.sessions.len();
        self.sessions
            .retain(|_, session| session.engine.last_active().elapsed() < ttl);
        let evicted = before.saturating_sub(self.sessions.len());

        if evicted > 0 {
            info!(evicted, remaining = self.sessions.len(), "Evicted idle sessions");
        }
        evicted
    }

    /// Remove stored transcripts and owner markers not written within `ttl`
    pub fn purge_transcripts(&self, ttl: Duration) -> StoreResult<usize> {
        let Some(cutoff) = TimeDelta::from_std(ttl)
            .ok()
            .and_then(|ttl| Utc::now().checked_sub_signed(ttl))
        else {
            return Ok(0);
        };

        let purged = self.store.purge_older_than(TRANSCRIPT_KEY_PREFIX, cutoff)?;
        let released = self.store.purge_older_than(OWNER_KEY_PREFIX, cutoff)?;
        if purged > 0 || released > 0 {
            info!(purged, released, "Purged expired transcripts");
        }
        Ok(purged)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DynamicConfig, StaticConfig};
    use crate::conversation::UserType;
    use crate::store::MemoryStore;
    use crate::webhook::WebhookClient;

    const DEFAULT_WEBHOOK: &str = "https://n8n.example/webhook/requests";

    fn registry_with(store: Arc<MemoryStore>, webhook_url: &str) -> SessionRegistry<WebhookClient> {
        let static_config: StaticConfig = serde_json::from_str("{}").unwrap();
        let mut dynamic = DynamicConfig::default();
        dynamic.assistant.webhook_url = webhook_url.to_string();
        let config = Arc::new(RuntimeConfig::new(static_config, dynamic));
        let transport = Arc::new(WebhookClient::new(config.clone()).unwrap());
        SessionRegistry::new(transport, store, config, Arc::new(I18n::new()))
    }

    fn registry(store: Arc<MemoryStore>) -> SessionRegistry<WebhookClient> {
        registry_with(store, "")
    }

    fn identity(session_id: Option<&str>, user_token: Option<&str>) -> SessionIdentity {
        SessionIdentity {
            session_id: session_id.map(str::to_string),
            user_token: user_token.map(str::to_string),
            user_type: UserType::Client,
        }
    }

    #[test]
    fn test_same_owner_shares_session() {
        let registry = registry(Arc::new(MemoryStore::new()));

        let a = registry.get_or_create(identity(Some("s1"), Some("tok"))).unwrap();
        let b = registry.get_or_create(identity(Some("s1"), Some(" tok "))).unwrap();
        let c = registry.get_or_create(identity(None, Some("tok"))).unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(a.key, "request_chat:s1");
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_other_token_is_refused() {
        let store = Arc::new(MemoryStore::new());
        let registry = registry(store.clone());

        let alice = registry
            .get_or_create(identity(Some("s1"), Some("alice-token")))
            .unwrap();
        alice.engine.set_text("draft for alice");

        let err = registry
            .get_or_create(identity(Some("s1"), Some("bob-token")))
            .err()
            .unwrap();
        assert!(matches!(err, ServiceError::SessionConflict { .. }));

        let err = registry
            .get_or_create(identity(Some("s1"), None))
            .err()
            .unwrap();
        assert!(matches!(err, ServiceError::SessionConflict { .. }));

        let marker = store.get("request_owner:request_chat:s1").unwrap().unwrap();
        assert_eq!(marker.len(), 64);
        assert!(!marker.contains("alice-token"));
    }

    #[test]
    fn test_owner_survives_eviction() {
        let store = Arc::new(MemoryStore::new());
        let registry = registry(store.clone());
        registry
            .get_or_create(identity(Some("s1"), Some("alice-token")))
            .unwrap();
        store
            .set("request_chat:s1", r#"[{"id":"m1","role":"user","content":"need cement"}]"#)
            .unwrap();

        assert_eq!(registry.evict_idle(Duration::ZERO), 1);

        let err = registry
            .get_or_create(identity(Some("s1"), Some("bob-token")))
            .err()
            .unwrap();
        assert!(matches!(err, ServiceError::SessionConflict { .. }));
        assert_eq!(registry.len(), 0);

        let alice = registry
            .get_or_create(identity(Some("s1"), Some("alice-token")))
            .unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(alice.engine.snapshot().messages.len(), 1);
    }

    #[test]
    fn test_identity_required() {
        let registry = registry(Arc::new(MemoryStore::new()));

        let err = registry
            .get_or_create(identity(Some(" "), None))
            .err()
            .unwrap();
        assert!(matches!(err, ServiceError::SessionRequired));
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_preferences_stay_in_their_session() {
        let store = Arc::new(MemoryStore::new());
        let registry = registry_with(store.clone(), DEFAULT_WEBHOOK);

        let alice = registry
            .get_or_create(identity(Some("s1"), Some("alice-token")))
            .unwrap();
        let bob = registry
            .get_or_create(identity(Some("s2"), Some("bob-token")))
            .unwrap();

        let stored = registry
            .update_preferences(
                &alice,
                &Preferences {
                    base_url: Some(" http://localhost:5678/webhook/requests ".to_string()),
                    ..Preferences::default()
                },
            )
            .unwrap();
        assert_eq!(
            stored.base_url.as_deref(),
            Some("http://localhost:5678/webhook/requests")
        );

        assert_eq!(
            alice.engine.endpoint().as_deref(),
            Some("http://localhost:5678/webhook/requests")
        );
        assert_eq!(bob.engine.endpoint().as_deref(), Some(DEFAULT_WEBHOOK));
        assert_eq!(bob.engine.preferences(), Preferences::default());

        let carol = registry
            .get_or_create(identity(Some("s3"), Some("carol-token")))
            .unwrap();
        assert_eq!(carol.engine.endpoint().as_deref(), Some(DEFAULT_WEBHOOK));
    }

    #[test]
    fn test_preferences_reload_after_eviction() {
        let store = Arc::new(MemoryStore::new());
        let registry = registry_with(store.clone(), DEFAULT_WEBHOOK);

        let session = registry.get_or_create(identity(Some("s1"), None)).unwrap();
        registry
            .update_preferences(
                &session,
                &Preferences {
                    user_type: Some(UserType::ServiceProvider),
                    ..Preferences::default()
                },
            )
            .unwrap();
        registry.evict_idle(Duration::ZERO);

        let session = registry.get_or_create(identity(Some("s1"), None)).unwrap();
        assert_eq!(session.engine.user_type(), UserType::ServiceProvider);
    }

    #[tokio::test]
    async fn test_observer_errors_are_drained() {
        let registry = registry(Arc::new(MemoryStore::new()));
        let session = registry.get_or_create(identity(Some("s1"), None)).unwrap();

        session.engine.quick_action().await;

        let errors = session.observer.drain_errors();
        assert_eq!(errors, vec!["The assistant endpoint is not configured."]);
        assert!(session.observer.drain_errors().is_empty());
    }

    #[test]
    fn test_evict_idle() {
        let registry = registry(Arc::new(MemoryStore::new()));
        registry.get_or_create(identity(Some("s1"), None)).unwrap();
        registry.get_or_create(identity(Some("s2"), None)).unwrap();

        assert_eq!(registry.evict_idle(Duration::from_secs(3600)), 0);
        assert_eq!(registry.evict_idle(Duration::ZERO), 2);
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_purge_only_touches_transcripts_and_owners() {
        let store = Arc::new(MemoryStore::new());
        store.set("request_chat:s1", "[]").unwrap();
        store.set("request_owner:request_chat:s1", "").unwrap();
        store.set("keyman.environment:request_chat:s1", "staging").unwrap();
        std::thread::sleep(Duration::from_millis(5));

        let registry = registry(store.clone());
        assert_eq!(registry.purge_transcripts(Duration::from_secs(3600)).unwrap(), 0);
        assert_eq!(registry.purge_transcripts(Duration::ZERO).unwrap(), 1);

        assert_eq!(store.get("request_chat:s1").unwrap(), None);
        assert_eq!(store.get("request_owner:request_chat:s1").unwrap(), None);
        assert_eq!(
            store
                .get("keyman.environment:request_chat:s1")
                .unwrap()
                .as_deref(),
            Some("staging")
        );
    }
}
