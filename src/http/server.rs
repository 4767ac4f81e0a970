//! HTTP server setup.
//!
//! # Responsibilities
//! - Build the Axum router: every path and method goes to the dispatcher
//! - Wire up middleware (request IDs, tracing, concurrency limit, timeout,
//!   panic recovery)
//! - Apply config reloads by swapping in a freshly built dispatcher
//! - Drain gracefully on shutdown and close live relays

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use axum::{
    extract::{Request, State},
    response::Response,
    routing::any,
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::{catch_panic::CatchPanicLayer, timeout::TimeoutLayer, trace::TraceLayer};

use crate::config::RelayConfig;
use crate::error::Result;
use crate::http::request::{propagate_request_id_layer, set_request_id_layer};
use crate::http::response::panic_response;
use crate::net::connection::RelayTracker;
use crate::routing::Dispatcher;

/// How long shutdown waits for upgraded relays to wind down.
const RELAY_DRAIN_LIMIT: Duration = Duration::from_secs(5);

/// Application state injected into the handler.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<ArcSwap<Dispatcher>>,
}

/// HTTP front of the relay.
pub struct HttpServer {
    router: Router,
    config: RelayConfig,
    state: AppState,
    relays: RelayTracker,
}

impl HttpServer {
    /// Create a server from a validated configuration.
    pub fn new(config: RelayConfig) -> Result<Self> {
        let relays = RelayTracker::new();
        let dispatcher = Dispatcher::from_config(&config, relays.clone())?;
        let state = AppState {
            dispatcher: Arc::new(ArcSwap::from_pointee(dispatcher)),
        };
        let router = Self::build_router(&config, state.clone());
        Ok(Self {
            router,
            config,
            state,
            relays,
        })
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &RelayConfig, state: AppState) -> Router {
        Router::new()
            .route("/", any(relay_handler))
            .route("/{*path}", any(relay_handler))
            .with_state(state)
            .layer(CatchPanicLayer::custom(panic_response))
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(GlobalConcurrencyLimitLayer::new(config.listener.max_connections))
            .layer(propagate_request_id_layer())
            .layer(TraceLayer::new_for_http())
            .layer(set_request_id_layer())
    }

    /// The full middleware stack, for in-process use.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn relays(&self) -> &RelayTracker {
        &self.relays
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Serve until `shutdown` fires, applying configs from `config_updates`.
    pub async fn run(
        self,
        listener: TcpListener,
        mut config_updates: mpsc::UnboundedReceiver<RelayConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> std::io::Result<()> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            tunnel_prefix = %self.config.tunnel.prefix,
            "HTTP server starting"
        );

        let reload_state = self.state.clone();
        let reload_relays = self.relays.clone();
        let mut current = self.config.clone();
        let reloader = tokio::spawn(async move {
            while let Some(next) = config_updates.recv().await {
                if apply_reload(&reload_state, &reload_relays, &current, &next) {
                    current = next;
                }
            }
        });

        let relays = self.relays.clone();
        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!(active_relays = relays.active_count(), "Shutdown requested, draining");
                relays.close_all();
            })
            .await?;

        reloader.abort();
        if !self.relays.wait_for_drain(RELAY_DRAIN_LIMIT).await {
            tracing::warn!(
                active_relays = self.relays.active_count(),
                "Relays still open after drain limit"
            );
        }
        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Swap in a dispatcher built from `next`. Returns whether it was applied.
fn apply_reload(state: &AppState, relays: &RelayTracker, current: &RelayConfig, next: &RelayConfig) -> bool {
    // The inbound timeout layer keeps the startup value.
    if next.timeouts.upstream_secs >= current.timeouts.request_secs {
        tracing::error!(
            upstream_secs = next.timeouts.upstream_secs,
            request_secs = current.timeouts.request_secs,
            "Reloaded upstream deadline is not below the running request timeout, keeping current"
        );
        return false;
    }
    if next.listener != current.listener
        || next.timeouts.request_secs != current.timeouts.request_secs
    {
        tracing::warn!("Listener and request timeout changes take effect after a restart");
    }
    match Dispatcher::from_config(next, relays.clone()) {
        Ok(dispatcher) => {
            state.dispatcher.store(Arc::new(dispatcher));
            tracing::info!(tunnel_prefix = %next.tunnel.prefix, "Configuration reloaded");
            true
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to apply reloaded configuration, keeping current");
            false
        }
    }
}

/// Every request, whatever its path or method, goes through the dispatcher.
async fn relay_handler(State(state): State<AppState>, request: Request) -> Response {
    let dispatcher = state.dispatcher.load_full();
    dispatcher.dispatch(request).await
}
