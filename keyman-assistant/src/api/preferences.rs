//! Preference endpoints: environment, user type and webhook base URL of the
//! caller's session.

use axum::{Json, extract::State, http::HeaderMap};
use serde::Serialize;
use std::sync::Arc;

use crate::conversation::UserType;
use crate::error::I18nError;
use crate::sessions::Session;
use crate::store::Preferences;
use crate::webhook::WebhookClient;

use super::{AppState, session};

/// Response for GET/PUT /api/preferences
#[derive(Debug, Serialize)]
pub struct PreferencesResponse {
    pub preferences: Preferences,
    /// Webhook the session's turns go to
    pub webhook_url: Option<String>,
    /// Actor role sent with the session's turns
    pub user_type: UserType,
}

fn current(session: &Session<WebhookClient>) -> PreferencesResponse {
    PreferencesResponse {
        preferences: session.engine.preferences(),
        webhook_url: session.engine.endpoint(),
        user_type: session.engine.user_type(),
    }
}

/// GET /api/preferences
pub async fn get_preferences_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<PreferencesResponse>, I18nError> {
    let session = session(&state, &headers)?;
    Ok(Json(current(&session)))
}

/// PUT /api/preferences - store the session's preferences.
///
/// Omitted or blank values are cleared. Other sessions are unaffected.
pub async fn update_preferences_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<Preferences>,
) -> Result<Json<PreferencesResponse>, I18nError> {
    let session = session(&state, &headers)?;
    state
        .sessions
        .update_preferences(&session, &request)
        .map_err(|e| state.i18n_error(e.into()))?;

    Ok(Json(current(&session)))
}
