//! Startup orchestration.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use notify::RecommendedWatcher;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use crate::config::watcher::ConfigWatcher;
use crate::config::{load_config, ConfigError, RelayConfig};
use crate::error::ProxyError;
use crate::http::HttpServer;
use crate::lifecycle::shutdown::Shutdown;
use crate::lifecycle::signals::termination_signal;
use crate::observability::{logging, metrics};

/// Fatal startup failures.
#[derive(Error, Debug)]
pub enum StartupError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("invalid bind address override '{0}'")]
    BindOverride(String),

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("server setup: {0}")]
    Setup(#[from] ProxyError),

    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),
}

/// What the command line asked for.
#[derive(Debug, Clone, Default)]
pub struct StartupOptions {
    pub config_path: Option<PathBuf>,
    pub bind_address: Option<String>,
}

/// Load the config file (or defaults) and apply command-line overrides.
pub fn resolve_config(options: &StartupOptions) -> Result<RelayConfig, StartupError> {
    let mut config = match &options.config_path {
        Some(path) => load_config(path)?,
        None => RelayConfig::default(),
    };
    if let Some(bind) = &options.bind_address {
        if bind.parse::<SocketAddr>().is_err() {
            return Err(StartupError::BindOverride(bind.clone()));
        }
        config.listener.bind_address = bind.clone();
    }
    Ok(config)
}

/// Run the relay until a termination signal arrives.
pub async fn launch(options: StartupOptions) -> Result<(), StartupError> {
    let config = resolve_config(&options)?;
    logging::init_logging(&config.observability.log_level);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        bind_address = %config.listener.bind_address,
        tunnel_prefix = %config.tunnel.prefix,
        max_connections = config.listener.max_connections,
        "relay-gate starting"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => {
                if let Err(e) = metrics::init_metrics(addr) {
                    tracing::error!(error = %e, "Failed to start metrics exporter");
                }
            }
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let (config_updates, _watcher) = watch_config(options.config_path.as_deref());

    let server = HttpServer::new(config.clone())?;
    let listener = TcpListener::bind(&config.listener.bind_address)
        .await
        .map_err(|source| StartupError::Bind {
            address: config.listener.bind_address.clone(),
            source,
        })?;

    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();
    tokio::spawn(async move {
        termination_signal().await;
        shutdown.trigger();
    });

    server
        .run(listener, config_updates, server_shutdown)
        .await
        .map_err(StartupError::Serve)?;

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Start the hot-reload watcher when a config file is in use.
///
/// The watcher must stay alive for updates to flow.
fn watch_config(
    path: Option<&Path>,
) -> (mpsc::UnboundedReceiver<RelayConfig>, Option<RecommendedWatcher>) {
    let Some(path) = path else {
        let (_tx, rx) = mpsc::unbounded_channel();
        return (rx, None);
    };

    let (watcher, updates) = ConfigWatcher::new(path);
    match watcher.run() {
        Ok(watcher) => (updates, Some(watcher)),
        Err(e) => {
            tracing::warn!(error = %e, "Config watcher unavailable, hot reload disabled");
            (updates, None)
        }
    }
}
