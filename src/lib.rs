//! relay-gate: a web-unblocking relay.
//!
//! Two strategies share one origin. Requests under the reserved tunnel prefix are
//! relayed transparently (including websocket upgrades); everything else is
//! fetched on the client's behalf and rewritten so the page keeps talking to the
//! relay.

// Core subsystems
pub mod config;
pub mod error;
pub mod http;
pub mod net;
pub mod routing;
pub mod upstream;

// Proxying strategies
pub mod rewrite;
pub mod tunnel;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod security;

pub use config::schema::RelayConfig;
pub use error::{ProxyError, Result};
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use routing::{Dispatcher, ProxyHandler, RouteDecision};
