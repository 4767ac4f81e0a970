//! Request dispatch.
//!
//! # Responsibilities
//! - Reject malformed paths before any handler runs
//! - Decide between the tunnel and the rewriting handler from the path alone
//! - Hand the untouched request (body included) to the chosen handler
//!
//! # Design Decisions
//! - The reserved prefix is checked first and nothing else is consulted, so the
//!   two routes partition the path space exhaustively and disjointly
//! - Immutable after construction; a config reload builds a new dispatcher
//! - Each handler owns its response; the dispatcher never rewrites it

use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::http::Request;
use axum::response::Response;
use futures_util::future::BoxFuture;

use crate::config::RelayConfig;
use crate::error::Result;
use crate::http::request::RequestIdExt;
use crate::http::response::error_text;
use crate::net::connection::RelayTracker;
use crate::observability::metrics;
use crate::rewrite::RewriteHandler;
use crate::routing::matcher::{validate_path, PathPrefixMatcher};
use crate::tunnel::TunnelHandler;

/// An inbound request as received from the client, body not yet read.
pub type IncomingRequest = Request<Body>;

/// A proxying strategy. Implementations must always produce exactly one
/// response, translating their own failures into error responses.
pub trait ProxyHandler: Send + Sync {
    fn handle(&self, request: IncomingRequest) -> BoxFuture<'static, Response>;
}

/// Which strategy serves a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteDecision {
    Tunnel,
    Rewrite,
}

impl RouteDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteDecision::Tunnel => "tunnel",
            RouteDecision::Rewrite => "rewrite",
        }
    }
}

/// Single entry point that routes every request to one of the two handlers.
pub struct Dispatcher {
    tunnel_prefix: PathPrefixMatcher,
    tunnel: Arc<dyn ProxyHandler>,
    rewrite: Arc<dyn ProxyHandler>,
}

impl Dispatcher {
    pub fn new(
        tunnel_prefix: PathPrefixMatcher,
        tunnel: Arc<dyn ProxyHandler>,
        rewrite: Arc<dyn ProxyHandler>,
    ) -> Self {
        Self {
            tunnel_prefix,
            tunnel,
            rewrite,
        }
    }

    /// Build the dispatcher and both handlers from a validated config.
    pub fn from_config(config: &RelayConfig, relays: RelayTracker) -> Result<Self> {
        let tunnel_prefix = PathPrefixMatcher::new(config.tunnel.prefix.clone());
        let tunnel = TunnelHandler::new(
            tunnel_prefix.clone(),
            &config.timeouts,
            relays,
        )?;
        let rewrite = RewriteHandler::new(
            &config.rewrite,
            &config.timeouts,
            tunnel_prefix.prefix(),
        )?;
        Ok(Self::new(tunnel_prefix, Arc::new(tunnel), Arc::new(rewrite)))
    }

    /// Pure function of the path.
    pub fn decide(&self, path: &str) -> RouteDecision {
        if self.tunnel_prefix.matches(path) {
            RouteDecision::Tunnel
        } else {
            RouteDecision::Rewrite
        }
    }

    /// Route a request and return the chosen handler's response.
    pub async fn dispatch(&self, request: IncomingRequest) -> Response {
        let start = Instant::now();
        let request_id = request.request_id();
        let path = request.uri().path().to_string();

        if let Err(err) = validate_path(&path) {
            err.log(&request_id);
            metrics::record_request("rejected", err.status().as_u16(), start);
            return error_text(&err);
        }

        let decision = self.decide(&path);
        tracing::debug!(
            request_id = %request_id,
            method = %request.method(),
            path = %path,
            route = decision.as_str(),
            "Dispatching request"
        );

        let response = match decision {
            RouteDecision::Tunnel => self.tunnel.handle(request).await,
            RouteDecision::Rewrite => self.rewrite.handle(request).await,
        };

        metrics::record_request(decision.as_str(), response.status().as_u16(), start);
        response
    }
}
