//! Error taxonomy for the proxying boundary.
//!
//! Every failure that can reach a client is one of four kinds. Handlers translate
//! outbound failures into this taxonomy before anything is written back, so the
//! client can always tell a malformed request from a dead destination from a
//! broken proxy.

use std::time::Duration;

use axum::http::StatusCode;
use thiserror::Error;

/// Errors surfaced by the dispatcher and both proxy handlers.
#[derive(Error, Debug)]
pub enum ProxyError {
    /// Malformed path, envelope, or target.
    #[error("malformed request: {0}")]
    ClientRequest(String),

    /// DNS failure, refused connection, reset mid-response.
    #[error("destination {destination} unavailable: {reason}")]
    UpstreamUnreachable { destination: String, reason: String },

    /// The outbound deadline elapsed before the destination answered.
    #[error("destination {destination} did not answer within {after:?}")]
    UpstreamTimeout { destination: String, after: Duration },

    /// Anything else. The message is logged, never sent to the client.
    #[error("internal proxy error: {0}")]
    Internal(String),
}

/// Result type alias for proxy operations.
pub type Result<T> = std::result::Result<T, ProxyError>;

impl ProxyError {
    pub fn client(msg: impl Into<String>) -> Self {
        ProxyError::ClientRequest(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        ProxyError::Internal(msg.into())
    }

    /// HTTP status reported to the client.
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::ClientRequest(_) => StatusCode::BAD_REQUEST,
            ProxyError::UpstreamUnreachable { .. } => StatusCode::BAD_GATEWAY,
            ProxyError::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code, sent in the `x-relay-error` header.
    pub fn code(&self) -> &'static str {
        match self {
            ProxyError::ClientRequest(_) => "CLIENT_REQUEST",
            ProxyError::UpstreamUnreachable { .. } => "UPSTREAM_UNREACHABLE",
            ProxyError::UpstreamTimeout { .. } => "UPSTREAM_TIMEOUT",
            ProxyError::Internal(_) => "INTERNAL",
        }
    }

    /// Message safe to show to the client.
    pub fn public_message(&self) -> String {
        match self {
            ProxyError::Internal(_) => "The proxy encountered an internal error.".to_string(),
            ProxyError::UpstreamUnreachable { destination, .. } => {
                format!("Destination unavailable: {}", destination)
            }
            other => other.to_string(),
        }
    }

    /// Log at the severity matching the error class.
    pub fn log(&self, request_id: &str) {
        match self {
            ProxyError::ClientRequest(_) => {
                tracing::debug!(request_id = %request_id, error = %self, "Rejected client request");
            }
            ProxyError::UpstreamUnreachable { .. } | ProxyError::UpstreamTimeout { .. } => {
                tracing::warn!(request_id = %request_id, error = %self, "Upstream failure");
            }
            ProxyError::Internal(_) => {
                tracing::error!(request_id = %request_id, error = %self, "Proxy internal error");
            }
        }
    }
}

impl From<reqwest::Error> for ProxyError {
    fn from(err: reqwest::Error) -> Self {
        let destination = err
            .url()
            .map(|u| u.to_string())
            .unwrap_or_else(|| "unknown".to_string());

        if err.is_builder() {
            ProxyError::ClientRequest(format!("invalid destination {}", destination))
        } else if err.is_timeout() {
            ProxyError::UpstreamTimeout {
                destination,
                after: Duration::ZERO,
            }
        } else {
            ProxyError::UpstreamUnreachable {
                destination,
                reason: err.to_string(),
            }
        }
    }
}
