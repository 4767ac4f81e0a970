//! WebSocket (protocol upgrade) relay.
//!
//! # Data Flow
//! ```text
//! Client ──handshake──→ Relay ──handshake──→ Destination
//! Client ←────101───── Relay ←────101────── Destination
//! Client ←──── raw bytes ────→ Relay ←──── raw bytes ────→ Destination
//! ```
//!
//! # Design Decisions
//! - Byte-level forwarding; frames are never parsed, so extensions and
//!   subprotocols negotiated end-to-end keep working
//! - The relay ends as soon as either direction ends, the lifetime deadline
//!   passes, or shutdown is signalled; both sockets are then dropped so no
//!   half-dead connection lingers
//! - A destination that refuses the upgrade gets its answer relayed verbatim

use std::time::Duration;

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::Response;
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use url::Url;

use crate::error::{ProxyError, Result};
use crate::net::connection::RelayTracker;
use crate::routing::IncomingRequest;
use crate::upstream::{stream_back, OutboundRequest, Upstream};

/// Why a relay ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayEnd {
    ClientClosed,
    OriginClosed,
    Deadline,
    Shutdown,
}

impl std::fmt::Display for RelayEnd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RelayEnd::ClientClosed => "client closed",
            RelayEnd::OriginClosed => "origin closed",
            RelayEnd::Deadline => "lifetime deadline",
            RelayEnd::Shutdown => "shutdown",
        };
        f.write_str(s)
    }
}

/// Copy bytes in both directions until one of them ends.
pub async fn relay<C, O>(
    client: C,
    origin: O,
    max_lifetime: Duration,
    mut close: watch::Receiver<bool>,
) -> RelayEnd
where
    C: AsyncRead + AsyncWrite,
    O: AsyncRead + AsyncWrite,
{
    let (mut client_rd, mut client_wr) = tokio::io::split(client);
    let (mut origin_rd, mut origin_wr) = tokio::io::split(origin);

    let end = tokio::select! {
        _ = tokio::io::copy(&mut client_rd, &mut origin_wr) => RelayEnd::ClientClosed,
        _ = tokio::io::copy(&mut origin_rd, &mut client_wr) => RelayEnd::OriginClosed,
        _ = tokio::time::sleep(max_lifetime) => RelayEnd::Deadline,
        _ = close.wait_for(|closed| *closed) => RelayEnd::Shutdown,
    };

    // Best effort FIN on both sides; the halves are dropped right after.
    let _ = origin_wr.shutdown().await;
    let _ = client_wr.shutdown().await;
    end
}

/// Forward an upgrade handshake and, on 101, relay the upgraded connection.
pub async fn relay_upgrade(
    mut inbound: IncomingRequest,
    destination: Url,
    mut headers: HeaderMap,
    upstream: &Upstream,
    relays: RelayTracker,
    max_lifetime: Duration,
    request_id: String,
) -> Result<Response> {
    let client_upgrade = hyper::upgrade::on(&mut inbound);

    let protocol = inbound
        .headers()
        .get(header::UPGRADE)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static("websocket"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("upgrade"));
    headers.insert(header::UPGRADE, protocol);

    let handshake = upstream
        .send(OutboundRequest {
            method: Method::GET,
            url: destination.clone(),
            headers,
            body: None,
        })
        .await?;

    if handshake.status() != StatusCode::SWITCHING_PROTOCOLS {
        tracing::debug!(
            request_id = %request_id,
            destination = %destination,
            status = %handshake.status(),
            "Destination declined upgrade"
        );
        return Ok(stream_back(handshake));
    }

    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::SWITCHING_PROTOCOLS;
    *response.headers_mut() = handshake.headers().clone();
    response.headers_mut().remove(header::CONTENT_LENGTH);

    let origin_io = handshake.upgrade().await.map_err(|e| ProxyError::UpstreamUnreachable {
        destination: destination.to_string(),
        reason: format!("upgrade failed: {}", e),
    })?;

    let guard = relays.track();
    let close = relays.close_signal();
    tokio::spawn(async move {
        let client_io = match client_upgrade.await {
            Ok(upgraded) => TokioIo::new(upgraded),
            Err(e) => {
                tracing::warn!(request_id = %request_id, error = %e, "Client upgrade failed");
                return;
            }
        };
        tracing::debug!(
            request_id = %request_id,
            relay_id = %guard.id(),
            destination = %destination,
            "Relay established"
        );

        let end = relay(client_io, origin_io, max_lifetime, close).await;
        tracing::debug!(
            request_id = %request_id,
            relay_id = %guard.id(),
            reason = %end,
            "Relay finished"
        );
        drop(guard);
    });

    Ok(response)
}
