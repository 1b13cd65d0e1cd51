//! Transcript persistence keyed by session identity.
//!
//! Every operation here is best-effort: storage and serialization failures
//! are logged and the conversation carries on in memory.

use std::sync::Arc;

use tracing::{debug, warn};

use super::models::{Message, PersistedMessage};
use crate::store::KeyValueStore;

/// Key prefix shared by all persisted transcripts
pub const TRANSCRIPT_KEY_PREFIX: &str = "request_chat:";

/// Storage key for a conversation.
///
/// Prefers the session id, falls back to the user token, and returns `None`
/// (persistence disabled) when neither is usable.
pub fn resolve_session_key(session_id: Option<&str>, user_token: Option<&str>) -> Option<String> {
    [session_id, user_token]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|identity| !identity.is_empty())
        .map(|identity| format!("{TRANSCRIPT_KEY_PREFIX}{identity}"))
}

/// Transcript storage for one conversation
#[derive(Clone)]
pub struct TranscriptStore {
    store: Arc<dyn KeyValueStore>,
    key: Option<String>,
}

impl TranscriptStore {
    pub fn new(store: Arc<dyn KeyValueStore>, key: Option<String>) -> Self {
        Self { store, key }
    }

    /// Overwrite the stored transcript with the reduced projection
    pub fn save(&self, transcript: &[Message]) {
        let Some(key) = &self.key else {
            return;
        };

        let projection: Vec<PersistedMessage> =
            transcript.iter().map(PersistedMessage::from).collect();

        let json = match serde_json::to_string(&projection) {
            Ok(json) => json,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to serialize transcript");
                return;
            }
        };

        if let Err(e) = self.store.set(key, &json) {
            warn!(key = %key, error = %e, "Failed to persist transcript");
        }
    }

    /// Load the stored transcript; anything unreadable yields an empty one
    pub fn restore(&self) -> Vec<Message> {
        let Some(key) = &self.key else {
            return Vec::new();
        };

        let raw = match self.store.get(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to read transcript");
                return Vec::new();
            }
        };

        match serde_json::from_str::<Vec<PersistedMessage>>(&raw) {
            Ok(messages) => {
                debug!(key = %key, count = messages.len(), "Restored transcript");
                messages.into_iter().map(Message::from).collect()
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Discarding unreadable transcript");
                Vec::new()
            }
        }
    }

    /// Remove the stored transcript
    pub fn clear(&self) {
        let Some(key) = &self.key else {
            return;
        };

        if let Err(e) = self.store.remove(key) {
            warn!(key = %key, error = %e, "Failed to remove transcript");
        }
    }
}
