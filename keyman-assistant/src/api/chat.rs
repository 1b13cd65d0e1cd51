//! Conversation API endpoints.
//!
//! Every handler resolves the caller's session from the identity headers and
//! answers with a full conversation snapshot.

use axum::{
    Json,
    extract::{Multipart, Path, State},
    http::HeaderMap,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::conversation::{
    Affordance, Attachment, ConversationState, EngineSnapshot, FilePayload, Message, Project,
    SafeHtml, SendOutcome, SkipReason, SupplierMode, render_safe,
};
use crate::error::{I18nError, ServiceError};
use crate::sessions::Session;
use crate::webhook::WebhookClient;

use super::{AppState, session};

type ChatSession = Session<WebhookClient>;

/// Conversation snapshot returned by every chat endpoint
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub conversation_id: String,
    pub messages: Vec<MessageView>,
    pub state: ConversationState,
    /// The request reached its final stage
    pub submitted: bool,
    pub projects: Vec<Project>,
    pub pending: bool,
    pub composer: ComposerView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<OutcomeView>,
    /// Messages reported through `on_error` while handling this request
    pub errors: Vec<String>,
}

/// A transcript message with what the client should render for it
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    #[serde(flatten)]
    pub message: Message,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html: Option<SafeHtml>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub affordance: Option<Affordance>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComposerView {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
    pub recording: bool,
}

/// What the request did
#[derive(Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OutcomeView {
    Replied { message_id: String },
    Skipped { reason: SkipReason },
    Failed,
    Discarded,
}

impl From<&SendOutcome> for OutcomeView {
    fn from(outcome: &SendOutcome) -> Self {
        match outcome {
            SendOutcome::Replied(message) => OutcomeView::Replied {
                message_id: message.id.clone(),
            },
            SendOutcome::Skipped(reason) => OutcomeView::Skipped { reason: *reason },
            SendOutcome::Failed => OutcomeView::Failed,
            SendOutcome::Discarded => OutcomeView::Discarded,
        }
    }
}

impl MessageView {
    fn new(message: Message) -> Self {
        if message.is_user() {
            return Self {
                message,
                html: None,
                affordance: None,
            };
        }

        Self {
            html: Some(render_safe(&message.content)),
            affordance: Some(Affordance::for_action(&message.action)),
            message,
        }
    }
}

/// Build the response body from an engine snapshot
pub fn chat_response(
    snapshot: EngineSnapshot,
    outcome: Option<&SendOutcome>,
    errors: Vec<String>,
) -> ChatResponse {
    ChatResponse {
        conversation_id: snapshot.conversation_id,
        messages: snapshot.messages.into_iter().map(MessageView::new).collect(),
        submitted: snapshot.state.is_submitted(),
        state: snapshot.state,
        projects: snapshot.projects,
        pending: snapshot.pending,
        composer: ComposerView {
            text: snapshot.composer_text,
            attachment: snapshot.staged_attachment,
            recording: snapshot.recording,
        },
        outcome: outcome.map(OutcomeView::from),
        errors,
    }
}


fn respond(session: &ChatSession, outcome: Option<&SendOutcome>) -> Json<ChatResponse> {
    Json(chat_response(
        session.engine.snapshot(),
        outcome,
        session.observer.drain_errors(),
    ))
}

fn message_not_found(state: &AppState, message_id: String) -> I18nError {
    state.i18n_error(ServiceError::MessageNotFound { message_id })
}

/// GET /api/chat - current conversation
pub async fn get_chat_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<ChatResponse>, I18nError> {
    let session = session(&state, &headers)?;
    Ok(respond(&session, None))
}

/// POST /api/chat/messages - send text and/or a file from the composer
pub async fn send_message_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<ChatResponse>, I18nError> {
    let session = session(&state, &headers)?;
    let invalid = |message: String| state.i18n_error(ServiceError::InvalidRequest { message });

    let mut chat_input: Option<String> = None;
    let mut file: Option<FilePayload> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| invalid(e.to_string()))?
    {
        let name = field.name().unwrap_or("").to_string();

        match name.as_str() {
            "file" => {
                let file_name = field.file_name().unwrap_or("attachment").to_string();
                let mime = field
                    .content_type()
                    .map(str::to_string)
                    .unwrap_or_else(|| mime::APPLICATION_OCTET_STREAM.to_string());
                let bytes = field.bytes().await.map_err(|e| invalid(e.to_string()))?;
                if !bytes.is_empty() {
                    file = Some(FilePayload::new(file_name, mime, bytes));
                }
            }
            "chatInput" => {
                chat_input = Some(field.text().await.map_err(|e| invalid(e.to_string()))?);
            }
            _ => {}
        }
    }

    if let Some(text) = chat_input {
        session.engine.set_text(text);
    }
    if let Some(file) = file {
        session.engine.attach_file(file);
    }

    let outcome = session.engine.send_from_composer().await;
    Ok(respond(&session, Some(&outcome)))
}

/// POST /api/chat/messages/{id}/resend - replay the latest user message
pub async fn resend_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(message_id): Path<String>,
) -> Result<Json<ChatResponse>, I18nError> {
    let session = session(&state, &headers)?;
    let outcome = session
        .engine
        .resend(&message_id)
        .await
        .ok_or_else(|| message_not_found(&state, message_id))?;
    Ok(respond(&session, Some(&outcome)))
}

/// POST /api/chat/messages/{id}/items/{index}/toggle
pub async fn toggle_item_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path((message_id, index)): Path<(String, usize)>,
) -> Result<Json<ChatResponse>, I18nError> {
    let session = session(&state, &headers)?;
    if !session.engine.toggle_item(&message_id, index) {
        return Err(message_not_found(&state, message_id));
    }
    Ok(respond(&session, None))
}

/// Request body for quantity changes
#[derive(Debug, Deserialize)]
pub struct QuantityRequest {
    pub delta: i64,
}

/// POST /api/chat/messages/{id}/items/{index}/quantity
pub async fn adjust_quantity_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path((message_id, index)): Path<(String, usize)>,
    Json(request): Json<QuantityRequest>,
) -> Result<Json<ChatResponse>, I18nError> {
    let session = session(&state, &headers)?;
    if !session
        .engine
        .adjust_quantity(&message_id, index, request.delta)
    {
        return Err(message_not_found(&state, message_id));
    }
    Ok(respond(&session, None))
}

/// POST /api/chat/messages/{id}/items/submit - send the selection summary
pub async fn submit_items_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(message_id): Path<String>,
) -> Result<Json<ChatResponse>, I18nError> {
    let session = session(&state, &headers)?;
    let outcome = session
        .engine
        .submit_selection(&message_id)
        .await
        .ok_or_else(|| message_not_found(&state, message_id))?;
    Ok(respond(&session, Some(&outcome)))
}

/// POST /api/chat/projects/{project_id} - choose the delivery project
pub async fn choose_project_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(project_id): Path<String>,
) -> Result<Json<ChatResponse>, I18nError> {
    let session = session(&state, &headers)?;
    let outcome = session
        .engine
        .choose_project(&project_id)
        .await
        .ok_or_else(|| state.i18n_error(ServiceError::ProjectNotFound { project_id }))?;
    Ok(respond(&session, Some(&outcome)))
}

/// Request body for the supplier sourcing choice
#[derive(Debug, Deserialize)]
pub struct SupplierModeRequest {
    pub mode: SupplierMode,
}

/// POST /api/chat/supplier-mode
pub async fn supplier_mode_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<SupplierModeRequest>,
) -> Result<Json<ChatResponse>, I18nError> {
    let session = session(&state, &headers)?;
    let outcome = session.engine.choose_supplier_mode(request.mode).await;
    Ok(respond(&session, Some(&outcome)))
}

/// Request body for the final confirmation
#[derive(Debug, Deserialize)]
pub struct ConfirmRequest {
    pub proceed: bool,
}

/// POST /api/chat/confirm - submit or go back and modify
pub async fn confirm_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<ConfirmRequest>,
) -> Result<Json<ChatResponse>, I18nError> {
    let session = session(&state, &headers)?;
    let outcome = session.engine.final_confirm(request.proceed).await;
    Ok(respond(&session, Some(&outcome)))
}

/// POST /api/chat/quick-action - "Yes, proceed"
pub async fn quick_action_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<ChatResponse>, I18nError> {
    let session = session(&state, &headers)?;
    let outcome = session.engine.quick_action().await;
    Ok(respond(&session, Some(&outcome)))
}

/// POST /api/chat/recording - start capturing audio into the composer
pub async fn start_recording_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<ChatResponse>, I18nError> {
    let session = session(&state, &headers)?;
    session.engine.start_recording();
    Ok(respond(&session, None))
}

/// POST /api/chat/recording/stop - stage the captured audio
pub async fn stop_recording_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<ChatResponse>, I18nError> {
    let session = session(&state, &headers)?;
    session.engine.stop_recording();
    Ok(respond(&session, None))
}

/// DELETE /api/chat/recording
pub async fn cancel_recording_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<ChatResponse>, I18nError> {
    let session = session(&state, &headers)?;
    session.engine.cancel_recording();
    Ok(respond(&session, None))
}

/// DELETE /api/chat/attachment - drop the staged file or recording
pub async fn discard_attachment_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<ChatResponse>, I18nError> {
    let session = session(&state, &headers)?;
    session.engine.discard_staged();
    Ok(respond(&session, None))
}

/// DELETE /api/chat - clear the conversation
pub async fn clear_chat_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<ChatResponse>, I18nError> {
    let session = session(&state, &headers)?;
    session.engine.clear();
    Ok(respond(&session, None))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::MaterialItem;
    use serde_json::json;

    fn snapshot(messages: Vec<Message>) -> EngineSnapshot {
        EngineSnapshot {
            conversation_id: "sess-1".to_string(),
            messages,
            state: ConversationState::default(),
            projects: Vec::new(),
            pending: false,
            composer_text: String::new(),
            staged_attachment: None,
            recording: false,
        }
    }

    #[test]
    fn test_assistant_messages_are_rendered() {
        let user = Message::user("**need** cement", None);
        let mut assistant = Message::assistant_text("Pick **one**");
        assistant.action = "show_items".to_string();
        assistant.items = vec![MaterialItem {
            name: "Cement".to_string(),
            description: String::new(),
            photo: None,
            selected: false,
            desired_quantity: 1,
        }];

        let response = chat_response(snapshot(vec![user, assistant]), None, Vec::new());
        let body = serde_json::to_value(&response).unwrap();

        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages[0]["role"], "user");
        assert!(messages[0].get("html").is_none());
        assert_eq!(messages[1]["affordance"], "item_picker");
        let html = messages[1]["html"].as_str().unwrap();
        assert!(html.contains("<strong>one</strong>"));
        assert_eq!(messages[1]["items"][0]["desiredQuantity"], 1);
        assert_eq!(body["state"]["stage"], 1);
        assert!(body.get("outcome").is_none());
    }

    #[test]
    fn test_outcome_and_errors() {
        let outcome = SendOutcome::Skipped(SkipReason::NotConfigured);
        let response = chat_response(
            snapshot(Vec::new()),
            Some(&outcome),
            vec!["The assistant endpoint is not configured.".to_string()],
        );
        let body = serde_json::to_value(&response).unwrap();

        assert_eq!(
            body["outcome"],
            json!({"status": "skipped", "reason": "not_configured"})
        );
        assert_eq!(body["errors"][0], "The assistant endpoint is not configured.");
        assert_eq!(body["conversationId"], "sess-1");
    }

    #[test]
    fn test_replied_outcome_carries_message_id() {
        let reply = Message::assistant_text("ok");
        let view = OutcomeView::from(&SendOutcome::Replied(reply.clone()));
        assert_eq!(view, OutcomeView::Replied { message_id: reply.id });
    }
}
