//! HTTP API for the Keyman assistant service.
//!
//! This module provides the REST API endpoints for:
//! - Health monitoring
//! - Request conversations (send, resend, item picker, project and supplier choices)
//! - Client preferences

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, State},
    http::HeaderMap,
    routing::{delete, get, post},
};
use axum_extra::headers::{Authorization, HeaderMapExt, authorization::Bearer};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::RuntimeConfig;
use crate::conversation::{SessionIdentity, UserType};
use crate::error::{I18nError, ServiceError};
use crate::i18n::I18n;
use crate::sessions::{Session, SessionRegistry};
use crate::store::Preferences;
use crate::webhook::WebhookClient;

pub mod chat;
pub mod preferences;
use chat::{
    adjust_quantity_handler, cancel_recording_handler, choose_project_handler,
    clear_chat_handler, confirm_handler, discard_attachment_handler, get_chat_handler,
    quick_action_handler, resend_handler, send_message_handler, start_recording_handler,
    stop_recording_handler, submit_items_handler, supplier_mode_handler, toggle_item_handler,
};
use preferences::{get_preferences_handler, update_preferences_handler};

pub const SESSION_ID_HEADER: &str = "x-session-id";
pub const USER_TOKEN_HEADER: &str = "x-user-token";
pub const USER_TYPE_HEADER: &str = "x-user-type";

/// Application state
pub struct AppState {
    pub sessions: Arc<SessionRegistry<WebhookClient>>,
    pub config: Arc<RuntimeConfig>,
    pub i18n: Arc<I18n>,
    pub start_time: Instant,
}

impl AppState {
    /// Create an i18n-aware error from a service error
    pub fn i18n_error(&self, error: ServiceError) -> I18nError {
        I18nError::new(error, self.i18n.clone(), "en")
    }
}

/// Build the API router
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Attachments travel in the message upload
    let max_body_size = state.config.dynamic().limits.max_upload_bytes as usize;

    let api_routes = Router::new()
        // Conversation endpoints
        .route("/chat", get(get_chat_handler).delete(clear_chat_handler))
        .route(
            "/chat/messages",
            post(send_message_handler).layer(DefaultBodyLimit::max(max_body_size)),
        )
        .route("/chat/messages/{id}/resend", post(resend_handler))
        .route(
            "/chat/messages/{id}/items/{index}/toggle",
            post(toggle_item_handler),
        )
        .route(
            "/chat/messages/{id}/items/{index}/quantity",
            post(adjust_quantity_handler),
        )
        .route("/chat/messages/{id}/items/submit", post(submit_items_handler))
        .route("/chat/projects/{project_id}", post(choose_project_handler))
        .route("/chat/supplier-mode", post(supplier_mode_handler))
        .route("/chat/confirm", post(confirm_handler))
        .route("/chat/quick-action", post(quick_action_handler))
        .route(
            "/chat/recording",
            post(start_recording_handler).delete(cancel_recording_handler),
        )
        .route("/chat/recording/stop", post(stop_recording_handler))
        .route("/chat/attachment", delete(discard_attachment_handler))
        // Preferences endpoints
        .route(
            "/preferences",
            get(get_preferences_handler).put(update_preferences_handler),
        );

    Router::new()
        .route("/health", get(health_handler))
        .nest("/api", api_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Resolve the caller's session from the identity headers
pub fn session(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<Arc<Session<WebhookClient>>, I18nError> {
    let default_user_type = state.config.dynamic().assistant.default_user_type;
    state
        .sessions
        .get_or_create(session_identity(headers, default_user_type))
        .map_err(|e| state.i18n_error(e))
}

/// Session identity from request headers.
///
/// The token comes from `Authorization: Bearer`, else `X-User-Token`. An
/// unknown or missing `X-User-Type` falls back to `default_user_type`.
pub fn session_identity(headers: &HeaderMap, default_user_type: UserType) -> SessionIdentity {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    };

    let user_token = headers
        .typed_get::<Authorization<Bearer>>()
        .map(|auth| auth.token().to_string())
        .or_else(|| header(USER_TOKEN_HEADER));

    let user_type = header(USER_TYPE_HEADER)
        .and_then(|raw| raw.parse::<UserType>().ok())
        .unwrap_or(default_user_type);

    SessionIdentity {
        session_id: header(SESSION_ID_HEADER),
        user_token,
        user_type,
    }
}

// === Health ===

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let webhook_configured = state
        .config
        .dynamic()
        .webhook_url(&Preferences::default())
        .is_some();

    let status = if webhook_configured {
        state.i18n.get("en", "health-status-healthy", None)
    } else {
        state.i18n.format(
            "en",
            "health-status-degraded",
            &[("reason", "assistant webhook not configured")],
        )
    };

    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        webhook_configured,
        active_sessions: state.sessions.len(),
    })
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    uptime_seconds: u64,
    webhook_configured: bool,
    active_sessions: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_identity_from_bearer() {
        let mut headers = HeaderMap::new();
        headers.insert(SESSION_ID_HEADER, HeaderValue::from_static("sess-42"));
        headers.insert(
            "authorization",
            HeaderValue::from_static("Bearer tok-abc"),
        );
        headers.insert(USER_TYPE_HEADER, HeaderValue::from_static("service_provider"));

        let identity = session_identity(&headers, UserType::Client);
        assert_eq!(identity.session_id.as_deref(), Some("sess-42"));
        assert_eq!(identity.user_token.as_deref(), Some("tok-abc"));
        assert_eq!(identity.user_type, UserType::ServiceProvider);
        assert_eq!(identity.storage_key().as_deref(), Some("request_chat:sess-42"));
    }

    #[test]
    fn test_identity_fallbacks() {
        let mut headers = HeaderMap::new();
        headers.insert(SESSION_ID_HEADER, HeaderValue::from_static("   "));
        headers.insert(USER_TOKEN_HEADER, HeaderValue::from_static("tok-xyz"));
        headers.insert(USER_TYPE_HEADER, HeaderValue::from_static("ADMIN"));

        let identity = session_identity(&headers, UserType::ServiceProvider);
        assert_eq!(identity.session_id, None);
        assert_eq!(identity.user_token.as_deref(), Some("tok-xyz"));
        assert_eq!(identity.user_type, UserType::ServiceProvider);
        assert_eq!(identity.storage_key().as_deref(), Some("request_chat:tok-xyz"));
    }

    #[test]
    fn test_no_identity() {
        let identity = session_identity(&HeaderMap::new(), UserType::Client);
        assert_eq!(identity.storage_key(), None);
    }
}
