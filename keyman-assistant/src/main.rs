use std::sync::Arc;
use std::time::Instant;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

mod api;
mod config;
mod conversation;
mod error;
mod i18n;
mod sessions;
mod store;
mod webhook;

use crate::api::AppState;
use crate::config::{RuntimeConfig, StorageBackend, load_static_config};
use crate::i18n::I18n;
use crate::sessions::SessionRegistry;
use crate::store::{KeyValueStore, MemoryStore, Preferences, SqliteStore};
use crate::webhook::WebhookClient;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    init_logging();

    info!(
        "Starting Keyman assistant service v{}",
        env!("CARGO_PKG_VERSION")
    );

    // Static configuration decides where transcripts live
    let static_config = load_static_config()?;

    info!(
        host = %static_config.server.host,
        port = static_config.server.port,
        backend = ?static_config.storage.backend,
        "Static configuration loaded"
    );

    let store: Arc<dyn KeyValueStore> = match static_config.storage.backend {
        StorageBackend::Sqlite => {
            std::fs::create_dir_all(&static_config.storage.data_dir)?;
            let db_path = static_config.storage.data_dir.join("keyman-assistant.db");
            let store = SqliteStore::open(&db_path)?;
            info!(path = %db_path.display(), "Transcript store initialized");
            Arc::new(store)
        }
        StorageBackend::Memory => {
            warn!("Using in-memory store; transcripts will not survive a restart");
            Arc::new(MemoryStore::new())
        }
    };

    // Load runtime config (static + dynamic)
    let runtime_config = Arc::new(RuntimeConfig::load(static_config)?);
    log_default_webhook(&runtime_config);

    let i18n = Arc::new(I18n::new());
    let transport = Arc::new(WebhookClient::new(runtime_config.clone())?);
    let sessions = Arc::new(SessionRegistry::new(
        transport,
        store.clone(),
        runtime_config.clone(),
        i18n.clone(),
    ));

    // Build the router
    let app = api::router(Arc::new(AppState {
        sessions: sessions.clone(),
        config: runtime_config.clone(),
        i18n,
        start_time: Instant::now(),
    }));

    // Start session cleanup background task
    let shutdown = CancellationToken::new();
    tokio::spawn(run_cleanup(
        sessions,
        runtime_config.clone(),
        shutdown.clone(),
    ));
    tokio::spawn(reload_on_hangup(runtime_config.clone(), shutdown.clone()));

    // Start the server
    let addr = format!(
        "{}:{}",
        runtime_config.static_config.server.host, runtime_config.static_config.server.port
    );
    let listener = TcpListener::bind(&addr).await?;
    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    info!("Server stopped");
    Ok(())
}

/// Periodically evict idle sessions and purge expired transcripts
async fn run_cleanup(
    sessions: Arc<SessionRegistry<WebhookClient>>,
    runtime_config: Arc<RuntimeConfig>,
    shutdown: CancellationToken,
) {
    let cleanup_interval = runtime_config.dynamic().sessions.cleanup_interval();
    let transcript_ttl = runtime_config.static_config.storage.transcript_ttl();
    let mut interval = tokio::time::interval(cleanup_interval);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {}
        }

        let idle_ttl = runtime_config.dynamic().sessions.idle_ttl();
        sessions.evict_idle(idle_ttl);

        if let Some(ttl) = transcript_ttl
            && let Err(e) = sessions.purge_transcripts(ttl)
        {
            warn!(error = %e, "Transcript purge failed");
        }
    }

    info!("Session cleanup stopped");
}

fn log_default_webhook(runtime_config: &RuntimeConfig) {
    match runtime_config.dynamic().webhook_url(&Preferences::default()) {
        Some(url) => info!(webhook = %url, "Assistant webhook configured"),
        None => warn!("No default assistant webhook configured; sessions need a base URL"),
    }
}

/// Re-read the dynamic config from file/env on SIGHUP
#[cfg(unix)]
async fn reload_on_hangup(runtime_config: Arc<RuntimeConfig>, shutdown: CancellationToken) {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(hangup) => hangup,
        Err(e) => {
            warn!(error = %e, "Failed to listen for SIGHUP; config reload disabled");
            return;
        }
    };

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            received = hangup.recv() => {
                if received.is_none() {
                    break;
                }
            }
        }

        match runtime_config.reload() {
            Ok(()) => {
                info!("Dynamic configuration reloaded");
                log_default_webhook(&runtime_config);
            }
            Err(e) => warn!(error = %e, "Config reload failed; keeping previous settings"),
        }
    }
}

#[cfg(not(unix))]
async fn reload_on_hangup(_runtime_config: Arc<RuntimeConfig>, _shutdown: CancellationToken) {}

/// Resolve on Ctrl+C and stop background tasks
async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
    shutdown.cancel();
}

fn init_logging() {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let format = fmt::format()
        .with_target(true)
        .with_thread_ids(true)
        .compact();

    // Use RUST_LOG if set, otherwise default to info level for our crate
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("keyman_assistant=info"));

    tracing_subscriber::registry()
        .with(fmt::layer().event_format(format))
        .with(filter)
        .init();
}
