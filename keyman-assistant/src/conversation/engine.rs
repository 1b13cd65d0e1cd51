//! Conversation engine.
//!
//! Owns one session's transcript, stage state, project candidates and
//! composer. Every entry point resolves normally; user-facing failures go to
//! the [`ConversationObserver`].

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::composer::{Composer, Recorder, Staged};
use super::models::{Action, Attachment, FilePayload, Message, Project, UserType};
use super::normalizer::{RawResponse, normalize};
use super::persistence::{TranscriptStore, resolve_session_key};
use super::state::{ConversationEvent, ConversationState, reduce};
use super::surface::{self, PROCEED_TEXT, SupplierMode};
use crate::error::TransportError;
use crate::i18n::I18n;
use crate::store::{KeyValueStore, Preferences};
use crate::webhook::{AssistantTransport, OutboundTurn};

const LOCALE: &str = "en";

/// Host callbacks
pub trait ConversationObserver: Send + Sync {
    /// A user-facing failure, already translated
    fn on_error(&self, message: &str);

    /// An assistant message with the `request_items` action arrived
    fn on_request_submitted(&self, _message: &Message) {}
}

/// Who the conversation belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIdentity {
    pub session_id: Option<String>,
    pub user_token: Option<String>,
    pub user_type: UserType,
}

impl SessionIdentity {
    /// Transcript key, `None` when there is no usable identity
    pub fn storage_key(&self) -> Option<String> {
        resolve_session_key(self.session_id.as_deref(), self.user_token.as_deref())
    }

    fn non_blank(value: &Option<String>) -> Option<&str> {
        value.as_deref().map(str::trim).filter(|v| !v.is_empty())
    }
}

/// Where a turn came from; only composer sends clear the composer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOrigin {
    Composer,
    Resend,
    QuickAction,
}

/// A programmatic turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendRequest {
    pub text: String,
    pub file: Option<FilePayload>,
    pub origin: SendOrigin,
}

impl SendRequest {
    pub fn quick_action(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            file: None,
            origin: SendOrigin::QuickAction,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Another send is outstanding
    AlreadyPending,
    /// No text, file or recording
    EmptyInput,
    /// No webhook endpoint
    NotConfigured,
    /// The recording could not be finished
    RecordingFailed,
}

/// Result of one send attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// The assistant's normalized reply, already appended
    Replied(Message),
    /// Nothing was sent
    Skipped(SkipReason),
    /// The assistant could not be reached
    Failed,
    /// The reply arrived after a clear and was dropped
    Discarded,
}

/// Point-in-time copy of a conversation
#[derive(Debug, Clone)]
pub struct EngineSnapshot {
    pub conversation_id: String,
    pub messages: Vec<Message>,
    pub state: ConversationState,
    pub projects: Vec<Project>,
    pub pending: bool,
    pub composer_text: String,
    pub staged_attachment: Option<Attachment>,
    pub recording: bool,
}

struct EngineState {
    messages: Vec<Message>,
    state: ConversationState,
    projects: Vec<Project>,
    composer: Composer,
    preferences: Preferences,
    pending: bool,
    /// Bumped by every clear; replies carry the epoch they were sent in
    epoch: u64,
    last_active: Instant,
}

enum TurnInput {
    Composer,
    Request(SendRequest),
}

struct InFlight {
    turn: OutboundTurn,
    epoch: u64,
}

/// One session's request conversation
pub struct ConversationEngine<T> {
    transport: Arc<T>,
    transcript: TranscriptStore,
    identity: SessionIdentity,
    conversation_id: String,
    observer: Arc<dyn ConversationObserver>,
    i18n: Arc<I18n>,
    discard_stale_replies: bool,
    inner: Mutex<EngineState>,
}

impl<T: AssistantTransport> ConversationEngine<T> {
    /// Create the engine and restore any persisted transcript
    pub fn new(
        transport: Arc<T>,
        store: Arc<dyn KeyValueStore>,
        identity: SessionIdentity,
        observer: Arc<dyn ConversationObserver>,
        i18n: Arc<I18n>,
    ) -> Self {
        let transcript = TranscriptStore::new(store, identity.storage_key());
        let conversation_id = SessionIdentity::non_blank(&identity.session_id)
            .or_else(|| SessionIdentity::non_blank(&identity.user_token))
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let messages = transcript.restore();
        let (state, projects) = replay(&messages);

        debug!(
            conversation_id = %conversation_id,
            restored = messages.len(),
            stage = state.stage,
            "Conversation engine created"
        );

        Self {
            transport,
            transcript,
            identity,
            conversation_id,
            observer,
            i18n,
            discard_stale_replies: true,
            inner: Mutex::new(EngineState {
                messages,
                state,
                projects,
                composer: Composer::default(),
                preferences: Preferences::default(),
                pending: false,
                epoch: 0,
                last_active: Instant::now(),
            }),
        }
    }

    /// Whether replies to turns sent before the last clear are dropped
    pub fn with_stale_reply_guard(mut self, enabled: bool) -> Self {
        self.discard_stale_replies = enabled;
        self
    }

    /// Attach a capture device; the HTTP service runs without one
    #[allow(dead_code)]
    pub fn with_recorder(self, recorder: Box<dyn Recorder>) -> Self {
        self.lock().composer = Composer::new(Some(recorder));
        self
    }

    pub fn with_preferences(self, preferences: Preferences) -> Self {
        self.lock().preferences = preferences;
        self
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn last_active(&self) -> Instant {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last_active
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        let inner = self.lock();
        let staged_attachment = match inner.composer.staged() {
            Some(Staged::File(file)) => Some(file.attachment()),
            _ => None,
        };

        EngineSnapshot {
            conversation_id: self.conversation_id.clone(),
            messages: inner.messages.clone(),
            state: inner.state.clone(),
            projects: inner.projects.clone(),
            pending: inner.pending,
            composer_text: inner.composer.text().to_string(),
            staged_attachment,
            recording: inner.composer.is_recording(),
        }
    }

    pub fn preferences(&self) -> Preferences {
        self.lock().preferences.clone()
    }

    /// Replace this session's preferences; later sends use them
    pub fn set_preferences(&self, preferences: Preferences) {
        self.lock().preferences = preferences;
    }

    /// Webhook this session's turns go to
    pub fn endpoint(&self) -> Option<String> {
        let inner = self.lock();
        self.transport.endpoint(&inner.preferences)
    }

    /// Actor role sent with each turn; the preference overrides the identity's
    pub fn user_type(&self) -> UserType {
        self.lock().preferences.user_type.unwrap_or(self.identity.user_type)
    }

    // ==================== Composer ====================

    pub fn set_text(&self, text: impl Into<String>) {
        self.lock().composer.set_text(text);
    }

    pub fn attach_file(&self, file: FilePayload) {
        self.lock().composer.attach_file(file);
    }

    pub fn discard_staged(&self) {
        self.lock().composer.discard_staged();
    }

    /// Start recording; device failures are reported and leave the composer idle
    pub fn start_recording(&self) -> bool {
        let result = self.lock().composer.start_recording();
        match result {
            Ok(()) => true,
            Err(e) => {
                warn!(conversation_id = %self.conversation_id, error = %e, "Recording failed to start");
                self.report("microphone-unavailable");
                false
            }
        }
    }

    /// Stop recording and stage the clip
    pub fn stop_recording(&self) -> bool {
        let result = self.lock().composer.stop_recording();
        match result {
            Ok(()) => true,
            Err(e) => {
                warn!(conversation_id = %self.conversation_id, error = %e, "Recording failed to stop");
                self.report("microphone-unavailable");
                false
            }
        }
    }

    pub fn cancel_recording(&self) {
        self.lock().composer.cancel_recording();
    }

    // ==================== Sending ====================

    /// Send whatever the composer holds and clear it
    pub async fn send_from_composer(&self) -> SendOutcome {
        self.dispatch(TurnInput::Composer, |_| {}).await
    }

    /// Send a programmatic turn
    pub async fn send(&self, request: SendRequest) -> SendOutcome {
        self.dispatch(TurnInput::Request(request), |_| {}).await
    }

    /// Replay the resendable user message; `None` if it is not resendable
    pub async fn resend(&self, message_id: &str) -> Option<SendOutcome> {
        let payload = {
            let inner = self.lock();
            inner
                .messages
                .iter()
                .find(|m| m.id == message_id && m.is_user() && m.can_resend)
                .and_then(|m| m.resend_payload.clone())
        }?;

        let request = SendRequest {
            text: payload.text,
            file: payload.file,
            origin: SendOrigin::Resend,
        };
        Some(self.send(request).await)
    }

    /// Generic "Yes, proceed"
    pub async fn quick_action(&self) -> SendOutcome {
        self.send(SendRequest::quick_action(PROCEED_TEXT)).await
    }

    pub async fn final_confirm(&self, proceed: bool) -> SendOutcome {
        self.send(SendRequest::quick_action(surface::confirmation_text(proceed)))
            .await
    }

    pub async fn choose_supplier_mode(&self, mode: SupplierMode) -> SendOutcome {
        let request = SendRequest::quick_action(mode.prompt());
        self.dispatch(TurnInput::Request(request), move |inner| {
            inner.state = reduce(&inner.state, ConversationEvent::SupplierModeChosen(mode));
        })
        .await
    }

    /// Pick a cached project candidate; `None` if the id is unknown
    pub async fn choose_project(&self, project_id: &str) -> Option<SendOutcome> {
        let project = {
            let inner = self.lock();
            inner.projects.iter().find(|p| p.id == project_id).cloned()
        }?;

        let request = SendRequest::quick_action(surface::project_choice_text(&project));
        let outcome = self
            .dispatch(TurnInput::Request(request), move |inner| {
                inner.state = reduce(&inner.state, ConversationEvent::ProjectChosen(project));
            })
            .await;
        Some(outcome)
    }

    // ==================== Item picker ====================

    pub fn toggle_item(&self, message_id: &str, index: usize) -> bool {
        self.edit_items(message_id, |message| surface::toggle_item(message, index))
    }

    pub fn adjust_quantity(&self, message_id: &str, index: usize, delta: i64) -> bool {
        self.edit_items(message_id, |message| {
            surface::adjust_quantity(message, index, delta)
        })
    }

    /// Send the selection summary of one item message; `None` if the id is unknown
    pub async fn submit_selection(&self, message_id: &str) -> Option<SendOutcome> {
        let selected = {
            let inner = self.lock();
            inner
                .messages
                .iter()
                .find(|m| m.id == message_id && !m.is_user())
                .map(|m| m.selected_items.clone())
        }?;

        let Some(summary) = surface::selection_summary(&selected) else {
            return Some(SendOutcome::Skipped(SkipReason::EmptyInput));
        };

        let message_id = message_id.to_string();
        let outcome = self
            .dispatch(TurnInput::Request(SendRequest::quick_action(summary)), move |inner| {
                if let Some(message) = inner.messages.iter_mut().find(|m| m.id == message_id) {
                    message.user_selected_items = true;
                }
                inner.state = reduce(&inner.state, ConversationEvent::ItemsSubmitted(selected));
            })
            .await;
        Some(outcome)
    }

    // ==================== Reset ====================

    /// Empty the transcript, reset the stage and remove the stored copy.
    ///
    /// An outstanding send is not aborted.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.messages.clear();
        inner.projects.clear();
        inner.state = reduce(&inner.state, ConversationEvent::Cleared);
        inner.epoch += 1;
        self.transcript.clear();

        info!(
            conversation_id = %self.conversation_id,
            pending = inner.pending,
            "Conversation cleared"
        );
    }

    // ==================== Internals ====================

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.last_active = Instant::now();
        inner
    }

    fn report(&self, key: &str) {
        self.observer.on_error(&self.i18n.get(LOCALE, key, None));
    }

    fn edit_items(&self, message_id: &str, edit: impl FnOnce(&mut Message) -> bool) -> bool {
        let mut inner = self.lock();
        let Some(message) = inner
            .messages
            .iter_mut()
            .find(|m| m.id == message_id && !m.is_user())
        else {
            return false;
        };

        let changed = edit(message);
        if changed {
            self.transcript.save(&inner.messages);
        }
        changed
    }

    async fn dispatch(
        &self,
        input: TurnInput,
        commit: impl FnOnce(&mut EngineState) + Send,
    ) -> SendOutcome {
        let in_flight = match self.begin_turn(input, commit) {
            Ok(in_flight) => in_flight,
            Err(reason) => {
                match reason {
                    SkipReason::NotConfigured => self.report("assistant-not-configured"),
                    SkipReason::RecordingFailed => self.report("microphone-unavailable"),
                    SkipReason::AlreadyPending | SkipReason::EmptyInput => {}
                }
                debug!(conversation_id = %self.conversation_id, reason = ?reason, "Send skipped");
                return SendOutcome::Skipped(reason);
            }
        };

        let epoch = in_flight.epoch;
        let result = self.transport.send(in_flight.turn).await;
        self.finish_turn(epoch, result)
    }

    /// Check preconditions, append the user message and mark the send pending
    fn begin_turn(
        &self,
        input: TurnInput,
        commit: impl FnOnce(&mut EngineState),
    ) -> Result<InFlight, SkipReason> {
        let mut inner = self.lock();

        if inner.pending {
            return Err(SkipReason::AlreadyPending);
        }

        let has_input = match &input {
            TurnInput::Composer => inner.composer.has_input(),
            TurnInput::Request(request) => {
                !request.text.trim().is_empty() || request.file.is_some()
            }
        };
        if !has_input {
            return Err(SkipReason::EmptyInput);
        }

        let Some(endpoint) = self.transport.endpoint(&inner.preferences) else {
            return Err(SkipReason::NotConfigured);
        };

        let (text, file, origin) = match input {
            TurnInput::Composer => {
                let draft = inner.composer.take().map_err(|e| {
                    warn!(conversation_id = %self.conversation_id, error = %e, "Failed to finish recording");
                    SkipReason::RecordingFailed
                })?;
                (draft.text, draft.file, SendOrigin::Composer)
            }
            TurnInput::Request(request) => {
                if request.origin == SendOrigin::Composer {
                    inner.composer.set_text("");
                    inner.composer.discard_staged();
                }
                (request.text.trim().to_string(), request.file, request.origin)
            }
        };

        for message in inner.messages.iter_mut().filter(|m| m.is_user()) {
            message.can_resend = false;
            message.resend_payload = None;
        }

        commit(&mut *inner);
        inner.messages.push(Message::user(text.clone(), file.clone()));
        inner.pending = true;
        self.transcript.save(&inner.messages);

        debug!(
            conversation_id = %self.conversation_id,
            origin = ?origin,
            has_file = file.is_some(),
            "Sending turn"
        );

        Ok(InFlight {
            turn: OutboundTurn {
                endpoint,
                chat_input: text,
                file,
                session_id: self.conversation_id.clone(),
                user_type: inner.preferences.user_type.unwrap_or(self.identity.user_type),
                user_token: self.identity.user_token.clone().unwrap_or_default(),
            },
            epoch: inner.epoch,
        })
    }

    /// Apply the transport result to the conversation
    fn finish_turn(
        &self,
        epoch: u64,
        result: Result<RawResponse, TransportError>,
    ) -> SendOutcome {
        let reply = {
            let mut inner = self.lock();
            inner.pending = false;

            if inner.epoch != epoch && self.discard_stale_replies {
                info!(
                    conversation_id = %self.conversation_id,
                    "Discarding assistant reply to a turn sent before the last clear"
                );
                return SendOutcome::Discarded;
            }

            let raw = match result {
                Ok(raw) => raw,
                Err(e) => {
                    drop(inner);
                    warn!(conversation_id = %self.conversation_id, error = %e, "Assistant request failed");
                    match e {
                        TransportError::NotConfigured => self.report("assistant-not-configured"),
                        _ => self.report("assistant-unreachable"),
                    }
                    return SendOutcome::Failed;
                }
            };

            let reply = normalize(&raw);
            if !reply.projects.is_empty() {
                inner.projects = reply.projects.clone();
            }
            inner.state = reduce(
                &inner.state,
                ConversationEvent::AssistantReplied {
                    action: reply.action.clone(),
                    delivery_date: reply.delivery_date.clone(),
                },
            );
            inner.messages.push(reply.clone());
            self.transcript.save(&inner.messages);

            debug!(
                conversation_id = %self.conversation_id,
                action = %reply.action,
                stage = inner.state.stage,
                items = reply.items.len(),
                projects = reply.projects.len(),
                "Assistant replied"
            );
            reply
        };

        if reply.known_action() == Some(Action::RequestItems) {
            info!(conversation_id = %self.conversation_id, "Request submitted");
            self.observer.on_request_submitted(&reply);
        }

        SendOutcome::Replied(reply)
    }
}

/// Rebuild stage state and project candidates from a restored transcript
fn replay(messages: &[Message]) -> (ConversationState, Vec<Project>) {
    let mut state = ConversationState::default();
    let mut projects = Vec::new();

    for message in messages.iter().filter(|m| !m.is_user()) {
        if !message.projects.is_empty() {
            projects = message.projects.clone();
        }
        state = reduce(
            &state,
            ConversationEvent::AssistantReplied {
                action: message.action.clone(),
                delivery_date: message.delivery_date.clone(),
            },
        );
        if message.user_selected_items && !message.selected_items.is_empty() {
            state = reduce(
                &state,
                ConversationEvent::ItemsSubmitted(message.selected_items.clone()),
            );
        }
    }

    (state, projects)
}
