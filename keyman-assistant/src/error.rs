use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::i18n::I18n;

/// Main service error type
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Session identity required (session id or user token)")]
    SessionRequired,

    #[error("Session belongs to another user: {key}")]
    SessionConflict { key: String },

    #[error("Message not found: {message_id}")]
    MessageNotFound { message_id: String },

    #[error("Project not found: {project_id}")]
    ProjectNotFound { project_id: String },

    #[error("Storage error")]
    Store(#[from] StoreError),

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },
}

/// Assistant webhook transport errors
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("No assistant endpoint configured")]
    NotConfigured,

    #[error("Failed to build HTTP client")]
    Client(#[source] reqwest::Error),

    #[error("Connection failed to assistant at {url}")]
    Connection {
        url: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Failed to read assistant response body from {url}")]
    Body {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

/// Key-value store errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database connection failed")]
    Connection(#[source] rusqlite::Error),

    #[error("Query failed")]
    Query(#[source] rusqlite::Error),

    #[error("Migration failed: {message}")]
    Migration { message: String },
}

/// Audio capture errors
#[derive(Error, Debug)]
pub enum MediaError {
    #[error("Audio recording is not supported here")]
    Unsupported,

    // Raised by capture devices
    #[allow(dead_code)]
    #[error("Microphone permission denied")]
    PermissionDenied,

    #[allow(dead_code)]
    #[error("Recording device failed: {message}")]
    Device { message: String },
}

/// API error response
#[derive(Serialize)]
pub struct ErrorResponse {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ServiceError {
    fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::MessageNotFound { .. } | ServiceError::ProjectNotFound { .. } => {
                StatusCode::NOT_FOUND
            }
            ServiceError::SessionRequired | ServiceError::InvalidRequest { .. } => {
                StatusCode::BAD_REQUEST
            }
            ServiceError::SessionConflict { .. } => StatusCode::FORBIDDEN,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            ServiceError::SessionRequired => "session_required",
            ServiceError::SessionConflict { .. } => "session_conflict",
            ServiceError::MessageNotFound { .. } => "message_not_found",
            ServiceError::ProjectNotFound { .. } => "project_not_found",
            ServiceError::Store(_) => "storage_error",
            ServiceError::InvalidRequest { .. } => "invalid_request",
            ServiceError::Config { .. } => "config_error",
        }
    }

    /// Get a user-friendly translated message
    pub fn user_message(&self, i18n: &I18n, locale: &str) -> String {
        match self {
            ServiceError::SessionRequired => i18n.get(locale, "error-session-required", None),
            ServiceError::SessionConflict { .. } => {
                i18n.get(locale, "error-session-conflict", None)
            }
            ServiceError::MessageNotFound { message_id } => {
                i18n.format(locale, "error-message-not-found", &[("id", message_id)])
            }
            ServiceError::ProjectNotFound { project_id } => {
                i18n.format(locale, "error-project-not-found", &[("id", project_id)])
            }
            // For other errors, fall back to the technical message
            _ => self.to_string(),
        }
    }

    /// Convert to an error response with i18n support
    pub fn into_response_with_i18n(self, i18n: &I18n, locale: &str) -> Response {
        let status = self.status_code();
        let response = ErrorResponse {
            message: self.user_message(i18n, locale),
            code: Some(self.error_code().to_string()),
        };

        (status, Json(response)).into_response()
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let response = ErrorResponse {
            message: self.to_string(),
            code: Some(self.error_code().to_string()),
        };

        (status, Json(response)).into_response()
    }
}

/// Result type alias for service operations
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Result type alias for key-value store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Error wrapper with i18n support for API responses
pub struct I18nError {
    pub error: ServiceError,
    pub i18n: std::sync::Arc<I18n>,
    pub locale: String,
}

impl I18nError {
    pub fn new(error: ServiceError, i18n: std::sync::Arc<I18n>, locale: impl Into<String>) -> Self {
        Self {
            error,
            i18n,
            locale: locale.into(),
        }
    }
}

impl IntoResponse for I18nError {
    fn into_response(self) -> Response {
        self.error.into_response_with_i18n(&self.i18n, &self.locale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_and_codes() {
        let err = ServiceError::MessageNotFound {
            message_id: "m1".to_string(),
        };
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(err.error_code(), "message_not_found");

        let err = ServiceError::SessionRequired;
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.error_code(), "session_required");

        let err = ServiceError::SessionConflict {
            key: "request_chat:s1".to_string(),
        };
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(err.error_code(), "session_conflict");

        let err = ServiceError::from(StoreError::Migration {
            message: "boom".to_string(),
        });
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.error_code(), "storage_error");
    }

    #[test]
    fn test_user_message_is_translated() {
        let i18n = I18n::new();
        let err = ServiceError::ProjectNotFound {
            project_id: "p9".to_string(),
        };
        let msg = err.user_message(&i18n, "en");
        assert!(msg.starts_with("Project not found"));
        assert!(msg.contains("p9"));
    }
}
