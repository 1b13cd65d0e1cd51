//! Client for the conversational request webhook.

use std::future::Future;
use std::sync::Arc;

use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use tracing::{debug, warn};

use crate::config::RuntimeConfig;
use crate::conversation::{FilePayload, RawResponse, UserType};
use crate::error::TransportError;
use crate::store::Preferences;

/// One user turn as the webhook receives it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundTurn {
    /// Resolved from the sending session's preferences
    pub endpoint: String,
    pub chat_input: String,
    pub file: Option<FilePayload>,
    pub session_id: String,
    pub user_type: UserType,
    pub user_token: String,
}

/// Sends turns to the assistant and returns its raw reply
pub trait AssistantTransport: Send + Sync + 'static {
    /// The endpoint a session with these preferences posts to, `None` when
    /// unconfigured
    fn endpoint(&self, preferences: &Preferences) -> Option<String>;

    /// Post one turn. Exactly one attempt is made.
    fn send(
        &self,
        turn: OutboundTurn,
    ) -> impl Future<Output = Result<RawResponse, TransportError>> + Send;
}

/// Multipart webhook client
#[derive(Clone)]
pub struct WebhookClient {
    client: Client,
    config: Arc<RuntimeConfig>,
}

impl WebhookClient {
    pub fn new(config: Arc<RuntimeConfig>) -> Result<Self, TransportError> {
        let client = Client::builder().build().map_err(TransportError::Client)?;

        Ok(Self { client, config })
    }

    fn form(&self, turn: OutboundTurn) -> Form {
        let workflow = self.config.dynamic().assistant.workflow.clone();

        let mut form = Form::new();
        if let Some(file) = turn.file {
            form = form.part("file", file_part(file));
        }

        form.text("chatInput", turn.chat_input)
            .text("sessionId", turn.session_id)
            .text("workflow", workflow)
            .text("user_type", turn.user_type.to_string())
            .text("user_token", turn.user_token)
    }
}

impl AssistantTransport for WebhookClient {
    fn endpoint(&self, preferences: &Preferences) -> Option<String> {
        self.config.dynamic().webhook_url(preferences).map(str::to_string)
    }

    async fn send(&self, turn: OutboundTurn) -> Result<RawResponse, TransportError> {
        let url = turn.endpoint.trim().to_string();
        if url.is_empty() {
            return Err(TransportError::NotConfigured);
        }

        debug!(
            url = %url,
            session_id = %turn.session_id,
            has_file = turn.file.is_some(),
            "Posting turn to assistant"
        );

        let timeout = self.config.dynamic().assistant.request_timeout();
        let mut request = self.client.post(&url).multipart(self.form(turn));
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        let response = request
            .send()
            .await
            .map_err(|e| TransportError::Connection {
                url: url.clone(),
                source: Box::new(e),
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::Body {
                url: url.clone(),
                source: e,
            })?;

        Ok(decode_response(status, &body))
    }
}

/// Interpret a webhook reply; non-success statuses become a plain message
pub fn decode_response(status: StatusCode, body: &str) -> RawResponse {
    if !status.is_success() {
        warn!(
            status = status.as_u16(),
            body_preview = %format!("{:.200}", body),
            "Assistant returned non-success status"
        );
        return RawResponse::fallback(body);
    }

    RawResponse::from_body(body)
}

fn file_part(file: FilePayload) -> Part {
    let named = |file: &FilePayload| {
        Part::bytes(file.bytes.to_vec()).file_name(file.file_name.clone())
    };

    match named(&file).mime_str(&file.mime) {
        Ok(part) => part,
        Err(e) => {
            warn!(mime = %file.mime, error = %e, "Sending attachment without content type");
            named(&file)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DynamicConfig, StaticConfig};
    use crate::conversation::normalize;
    use bytes::Bytes;

    fn runtime(webhook_url: &str) -> Arc<RuntimeConfig> {
        let static_config: StaticConfig = serde_json::from_str("{}").unwrap();
        let mut dynamic = DynamicConfig::default();
        dynamic.assistant.webhook_url = webhook_url.to_string();
        Arc::new(RuntimeConfig::new(static_config, dynamic))
    }

    #[test]
    fn test_success_body_is_parsed() {
        let raw = decode_response(StatusCode::OK, r#"{"content":"Hi","action":"detect_intent"}"#);
        let msg = normalize(&raw);
        assert_eq!(msg.content, "Hi");
        assert_eq!(msg.action, "detect_intent");
    }

    #[test]
    fn test_non_json_success_is_text() {
        let raw = decode_response(StatusCode::OK, "Workflow was started");
        assert_eq!(raw, RawResponse::Text("Workflow was started".to_string()));
    }

    #[test]
    fn test_error_status_becomes_message() {
        let raw = decode_response(StatusCode::BAD_GATEWAY, "upstream down");
        let msg = normalize(&raw);
        assert_eq!(msg.content, "upstream down");
        assert_eq!(msg.action, "message");
        assert!(msg.items.is_empty());
    }

    #[test]
    fn test_endpoint_follows_config() {
        let prefs = Preferences::default();
        let client = WebhookClient::new(runtime("")).unwrap();
        assert_eq!(client.endpoint(&prefs), None);

        let client = WebhookClient::new(runtime("http://localhost:5678/webhook/requests")).unwrap();
        assert_eq!(
            client.endpoint(&prefs).as_deref(),
            Some("http://localhost:5678/webhook/requests")
        );
    }

    #[test]
    fn test_endpoint_uses_session_preferences() {
        let client = WebhookClient::new(runtime("https://n8n.example/webhook/requests")).unwrap();
        let custom = Preferences {
            base_url: Some("http://localhost:5678/webhook/requests".to_string()),
            ..Preferences::default()
        };

        assert_eq!(
            client.endpoint(&custom).as_deref(),
            Some("http://localhost:5678/webhook/requests")
        );
        assert_eq!(
            client.endpoint(&Preferences::default()).as_deref(),
            Some("https://n8n.example/webhook/requests")
        );
    }

    #[tokio::test]
    async fn test_send_without_endpoint_fails_fast() {
        let client = WebhookClient::new(runtime("https://n8n.example/webhook/requests")).unwrap();
        let turn = OutboundTurn {
            endpoint: "  ".to_string(),
            chat_input: "need cement".to_string(),
            file: Some(FilePayload::new(
                "site.png",
                "image/png",
                Bytes::from_static(b"png"),
            )),
            session_id: "s1".to_string(),
            user_type: UserType::Client,
            user_token: "tok".to_string(),
        };

        let err = client.send(turn).await.unwrap_err();
        assert!(matches!(err, TransportError::NotConfigured));
    }
}
