//! Transparent tunnel handler.
//!
//! # Responsibilities
//! - Decode the envelope into a destination and header set
//! - Forward method, headers and streamed body; never follow redirects
//! - Relay status, headers and body back untouched (hop-by-hop aside)
//! - Hand websocket handshakes to the upgrade relay
//! - Serve the tunnel manifest on the bare prefix

use std::sync::Arc;
use std::time::Duration;

use axum::http::Method;
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::future::BoxFuture;

use crate::config::TimeoutConfig;
use crate::error::{ProxyError, Result};
use crate::http::request::RequestIdExt;
use crate::http::response::error_json;
use crate::http::websocket::relay_upgrade;
use crate::net::connection::RelayTracker;
use crate::observability::metrics;
use crate::routing::{IncomingRequest, PathPrefixMatcher, ProxyHandler};
use crate::security::headers::is_upgrade_request;
use crate::tunnel::envelope::decode_envelope;
use crate::tunnel::manifest::Manifest;
use crate::upstream::{has_body, stream_back, OutboundRequest, Upstream};

struct Inner {
    prefix: PathPrefixMatcher,
    upstream: Upstream,
    upgrader: Upstream,
    relays: RelayTracker,
    relay_max: Duration,
}

/// Tunnel strategy: byte-for-byte relay to the envelope's destination.
#[derive(Clone)]
pub struct TunnelHandler {
    inner: Arc<Inner>,
}

impl TunnelHandler {
    pub fn new(
        prefix: PathPrefixMatcher,
        timeouts: &TimeoutConfig,
        relays: RelayTracker,
    ) -> Result<Self> {
        Ok(Self {
            inner: Arc::new(Inner {
                prefix,
                upstream: Upstream::passthrough(timeouts)?,
                upgrader: Upstream::upgrading(timeouts)?,
                relays,
                relay_max: Duration::from_secs(timeouts.relay_max_secs),
            }),
        })
    }

    async fn serve(self, request: IncomingRequest) -> Response {
        let request_id = request.request_id();
        match self.try_serve(request, &request_id).await {
            Ok(response) => response,
            Err(err) => {
                err.log(&request_id);
                if matches!(
                    err,
                    ProxyError::UpstreamUnreachable { .. } | ProxyError::UpstreamTimeout { .. }
                ) {
                    metrics::record_upstream_error("tunnel", err.code());
                }
                error_json(&err)
            }
        }
    }

    async fn try_serve(&self, request: IncomingRequest, request_id: &str) -> Result<Response> {
        let inner = &self.inner;
        let remainder = inner
            .prefix
            .remainder(request.uri().path())
            .ok_or_else(|| ProxyError::internal("tunnel handler got a path outside its prefix"))?;

        if remainder.is_empty() {
            return if request.method() == Method::GET || request.method() == Method::HEAD {
                Ok(Json(Manifest::current()).into_response())
            } else {
                Err(ProxyError::client("empty tunnel envelope"))
            };
        }

        let envelope = decode_envelope(remainder, request.uri().query(), request.headers())?;
        tracing::debug!(
            request_id = %request_id,
            method = %request.method(),
            destination = %envelope.destination,
            "Tunneling request"
        );

        if is_upgrade_request(request.headers()) {
            return relay_upgrade(
                request,
                envelope.destination,
                envelope.headers,
                &inner.upgrader,
                inner.relays.clone(),
                inner.relay_max,
                request_id.to_string(),
            )
            .await;
        }

        let body_present = has_body(request.headers());
        let (parts, body) = request.into_parts();
        let response = inner
            .upstream
            .send(OutboundRequest {
                method: parts.method,
                url: envelope.destination,
                headers: envelope.headers,
                body: body_present.then_some(body),
            })
            .await?;

        tracing::debug!(
            request_id = %request_id,
            status = %response.status(),
            "Tunnel response"
        );
        Ok(stream_back(response))
    }
}

impl ProxyHandler for TunnelHandler {
    fn handle(&self, request: IncomingRequest) -> BoxFuture<'static, Response> {
        Box::pin(self.clone().serve(request))
    }
}
