//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the relay.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the relay.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct RelayConfig {
    /// Listener configuration (bind address, concurrency).
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Tunnel handler settings.
    pub tunnel: TunnelConfig,

    /// Rewriting handler settings.
    pub rewrite: RewriteConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum concurrent in-flight requests (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_connections: 10_000,
        }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Inbound request timeout (until response head) in seconds.
    pub request_secs: u64,

    /// Outbound connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Outbound deadline (until the destination's response head) in seconds.
    pub upstream_secs: u64,

    /// Maximum lifetime of an upgraded relay in seconds.
    pub relay_max_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_secs: 30,
            connect_secs: 5,
            upstream_secs: 20,
            relay_max_secs: 3600,
        }
    }
}

/// Tunnel handler configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct TunnelConfig {
    /// Reserved path prefix. Must start and end with '/'.
    pub prefix: String,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            prefix: "/bare/".to_string(),
        }
    }
}

/// Rewriting handler configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RewriteConfig {
    /// Query parameter carrying the encoded destination.
    pub query_param: String,

    /// Search URL used when the target is not an absolute URL. `%s` is replaced
    /// by the encoded phrase.
    pub search_template: String,

    /// Redirects followed on behalf of the client.
    pub max_redirects: usize,

    /// Textual bodies larger than this stream through unmodified.
    pub max_document_bytes: usize,

    /// Inject the client-side hook script into HTML documents.
    pub inject_runtime: bool,
}

impl Default for RewriteConfig {
    fn default() -> Self {
        Self {
            query_param: "url".to_string(),
            search_template: "https://duckduckgo.com/?q=%s".to_string(),
            max_redirects: 10,
            max_document_bytes: 8 * 1024 * 1024,
            inject_runtime: true,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
