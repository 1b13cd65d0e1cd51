use arc_swap::ArcSwap;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::conversation::UserType;
use crate::error::{ServiceError, ServiceResult};
use crate::store::Preferences;

// ==================== Static Configuration (startup-only) ====================

/// Static configuration that cannot be changed at runtime
#[derive(Debug, Clone, Deserialize)]
pub struct StaticConfig {
    #[serde(default = "default_server")]
    pub server: ServerConfig,

    #[serde(default = "default_storage")]
    pub storage: StorageConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

/// Where transcripts and preferences live
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    #[default]
    Sqlite,
    /// Nothing survives a restart
    Memory,
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,

    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Transcripts untouched for this long are purged. 0 keeps them forever.
    #[serde(default)]
    pub transcript_ttl_secs: u64,
}

impl StorageConfig {
    pub fn transcript_ttl(&self) -> Option<Duration> {
        (self.transcript_ttl_secs > 0).then(|| Duration::from_secs(self.transcript_ttl_secs))
    }
}

// ==================== Dynamic Configuration (hot-reloadable) ====================

/// Dynamic configuration, reloaded from file/env on demand
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DynamicConfig {
    #[serde(default = "default_assistant")]
    pub assistant: AssistantConfig,

    #[serde(default = "default_sessions")]
    pub sessions: SessionsConfig,

    #[serde(default = "default_limits")]
    pub limits: LimitsConfig,
}

/// Conversational webhook configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantConfig {
    /// Default webhook; empty means not configured
    #[serde(default)]
    pub webhook_url: String,

    /// Webhook per environment name, selected by the environment preference
    #[serde(default)]
    pub environments: HashMap<String, String>,

    /// Routing tag sent as `workflow`
    #[serde(default = "default_workflow")]
    pub workflow: String,

    /// Per-request timeout. 0 waits for the assistant indefinitely.
    #[serde(default)]
    pub request_timeout_secs: u64,

    #[serde(default)]
    pub default_user_type: UserType,

    /// Drop replies to requests sent before the last clear
    #[serde(default = "default_discard_stale_replies")]
    pub discard_stale_replies: bool,
}

/// In-memory session registry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    #[serde(default = "default_idle_ttl_secs")]
    pub idle_ttl_secs: u64,

    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

impl SessionsConfig {
    pub fn idle_ttl(&self) -> Duration {
        Duration::from_secs(self.idle_ttl_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs.max(1))
    }
}

/// Size limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,
}

impl AssistantConfig {
    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_secs > 0).then(|| Duration::from_secs(self.request_timeout_secs))
    }
}

impl DynamicConfig {
    /// Webhook endpoint for a session: its base URL preference, then its
    /// preferred environment's entry, then the default. `None` when all are
    /// blank.
    pub fn webhook_url<'a>(&'a self, preferences: &'a Preferences) -> Option<&'a str> {
        let from_environment = preferences
            .environment
            .as_deref()
            .and_then(|env| self.assistant.environments.get(env))
            .map(String::as_str);

        [
            preferences.base_url.as_deref(),
            from_environment,
            Some(self.assistant.webhook_url.as_str()),
        ]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|url| !url.is_empty())
    }
}

// ==================== RuntimeConfig (combines static + dynamic) ====================

/// Static config plus hot-swappable dynamic config
pub struct RuntimeConfig {
    /// Never changes after startup
    pub static_config: StaticConfig,
    dynamic: ArcSwap<DynamicConfig>,
}

impl RuntimeConfig {
    pub fn new(static_config: StaticConfig, dynamic: DynamicConfig) -> Self {
        Self {
            static_config,
            dynamic: ArcSwap::from_pointee(dynamic),
        }
    }

    /// Current dynamic config snapshot (lock-free read)
    pub fn dynamic(&self) -> arc_swap::Guard<Arc<DynamicConfig>> {
        self.dynamic.load()
    }

    pub fn update_dynamic(&self, new_config: DynamicConfig) {
        self.dynamic.store(Arc::new(new_config));
    }

    /// Load dynamic config from file/env
    pub fn load(static_config: StaticConfig) -> ServiceResult<Self> {
        Ok(Self::new(static_config, load_dynamic_config()?))
    }

    /// Re-read the dynamic config from file/env; the old snapshot stays on error
    pub fn reload(&self) -> ServiceResult<()> {
        self.update_dynamic(load_dynamic_config()?);
        Ok(())
    }
}

// ==================== Config Loading Functions ====================

fn builder() -> ServiceResult<Config> {
    Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(
            Environment::with_prefix("KEYMAN")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .map_err(|e| ServiceError::Config {
            message: format!("Failed to build config: {}", e),
        })
}

/// Load static configuration from file and env vars
pub fn load_static_config() -> ServiceResult<StaticConfig> {
    builder()?
        .try_deserialize()
        .map_err(|e| ServiceError::Config {
            message: format!("Failed to deserialize static config: {}", e),
        })
}

/// Load dynamic configuration from file and env vars (without preferences)
fn load_dynamic_config() -> ServiceResult<DynamicConfig> {
    builder()?
        .try_deserialize()
        .map_err(|e| ServiceError::Config {
            message: format!("Failed to deserialize dynamic config: {}", e),
        })
}

// ==================== Default Value Functions ====================

fn default_server() -> ServerConfig {
    ServerConfig {
        host: default_host(),
        port: default_port(),
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_storage() -> StorageConfig {
    StorageConfig {
        backend: StorageBackend::default(),
        data_dir: default_data_dir(),
        transcript_ttl_secs: 0,
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_assistant() -> AssistantConfig {
    AssistantConfig {
        webhook_url: String::new(),
        environments: HashMap::new(),
        workflow: default_workflow(),
        request_timeout_secs: 0,
        default_user_type: UserType::default(),
        discard_stale_replies: default_discard_stale_replies(),
    }
}

fn default_workflow() -> String {
    "requests".to_string()
}

fn default_discard_stale_replies() -> bool {
    true
}

fn default_sessions() -> SessionsConfig {
    SessionsConfig {
        idle_ttl_secs: default_idle_ttl_secs(),
        cleanup_interval_secs: default_cleanup_interval_secs(),
    }
}

fn default_idle_ttl_secs() -> u64 {
    60 * 60 // 1 hour
}

fn default_cleanup_interval_secs() -> u64 {
    5 * 60 // 5 minutes
}

fn default_limits() -> LimitsConfig {
    LimitsConfig {
        max_upload_bytes: default_max_upload_bytes(),
    }
}

fn default_max_upload_bytes() -> u64 {
    26_214_400 // 25MB
}

impl Default for DynamicConfig {
    fn default() -> Self {
        Self {
            assistant: default_assistant(),
            sessions: default_sessions(),
            limits: default_limits(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_webhooks() -> DynamicConfig {
        let mut config = DynamicConfig::default();
        config.assistant.webhook_url = "https://n8n.example/webhook/requests".to_string();
        config.assistant.environments.insert(
            "staging".to_string(),
            "https://staging.n8n.example/webhook/requests".to_string(),
        );
        config
    }

    #[test]
    fn test_defaults() {
        let config = DynamicConfig::default();
        assert_eq!(config.assistant.workflow, "requests");
        assert!(config.assistant.discard_stale_replies);
        assert_eq!(config.assistant.request_timeout(), None);
        assert_eq!(config.webhook_url(&Preferences::default()), None);
        assert_eq!(config.assistant.default_user_type, UserType::Client);
    }

    #[test]
    fn test_webhook_resolution_order() {
        let config = with_webhooks();
        let mut prefs = Preferences::default();
        assert_eq!(
            config.webhook_url(&prefs),
            Some("https://n8n.example/webhook/requests")
        );

        prefs.environment = Some("staging".to_string());
        assert_eq!(
            config.webhook_url(&prefs),
            Some("https://staging.n8n.example/webhook/requests")
        );

        prefs.environment = Some("unknown".to_string());
        assert_eq!(
            config.webhook_url(&prefs),
            Some("https://n8n.example/webhook/requests")
        );

        prefs.base_url = Some("http://localhost:5678/webhook/requests".to_string());
        assert_eq!(
            config.webhook_url(&prefs),
            Some("http://localhost:5678/webhook/requests")
        );

        prefs.base_url = Some("   ".to_string());
        prefs.environment = None;
        assert_eq!(
            config.webhook_url(&prefs),
            Some("https://n8n.example/webhook/requests")
        );
    }

    #[test]
    fn test_update_dynamic_swaps_snapshot() {
        let runtime = RuntimeConfig::new(default_static(), DynamicConfig::default());
        let before = runtime.dynamic();

        runtime.update_dynamic(with_webhooks());

        assert_eq!(before.webhook_url(&Preferences::default()), None);
        assert_eq!(
            runtime.dynamic().webhook_url(&Preferences::default()),
            Some("https://n8n.example/webhook/requests")
        );
    }

    #[test]
    fn test_request_timeout() {
        let mut config = DynamicConfig::default();
        config.assistant.request_timeout_secs = 30;
        assert_eq!(
            config.assistant.request_timeout(),
            Some(Duration::from_secs(30))
        );
    }

    #[test]
    fn test_static_config_from_json() {
        let config: StaticConfig = serde_json::from_str(
            r#"{"server":{"port":9000},"storage":{"backend":"memory","transcript_ttl_secs":60}}"#,
        )
        .unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.storage.transcript_ttl(), Some(Duration::from_secs(60)));
    }

    fn default_static() -> StaticConfig {
        StaticConfig {
            server: default_server(),
            storage: default_storage(),
        }
    }
}
