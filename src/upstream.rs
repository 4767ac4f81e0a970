//! Outbound requests to destinations.
//!
//! Both handlers describe what they want to send as an [`OutboundRequest`] and
//! hand it to an [`Upstream`], which owns a `reqwest` client configured for that
//! handler's needs (redirect policy, protocol) and enforces the upstream deadline.

use std::time::Duration;

use axum::body::Body;
use axum::http::{header, HeaderMap, Method};
use axum::response::Response;
use reqwest::redirect::Policy;
use url::Url;

use crate::config::TimeoutConfig;
use crate::error::{ProxyError, Result};
use crate::resilience::timeouts::with_deadline;
use crate::security::headers::inbound_response_headers;

/// A request about to be sent to a destination.
#[derive(Debug)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    /// `None` when the inbound request carried no body.
    pub body: Option<Body>,
}

/// True if the inbound request announces a body.
pub fn has_body(headers: &HeaderMap) -> bool {
    let declared_length = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(|len| len > 0)
        .unwrap_or(false);
    declared_length || headers.contains_key(header::TRANSFER_ENCODING)
}

/// Outbound client plus the deadline applied to every call.
#[derive(Clone, Debug)]
pub struct Upstream {
    client: reqwest::Client,
    deadline: Duration,
}

impl Upstream {
    fn builder(timeouts: &TimeoutConfig) -> reqwest::ClientBuilder {
        reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(timeouts.connect_secs))
            .pool_idle_timeout(Duration::from_secs(90))
            .no_proxy()
    }

    fn build(builder: reqwest::ClientBuilder, timeouts: &TimeoutConfig) -> Result<Self> {
        let client = builder
            .build()
            .map_err(|e| ProxyError::internal(format!("outbound client: {}", e)))?;
        Ok(Self {
            client,
            deadline: Duration::from_secs(timeouts.upstream_secs),
        })
    }

    /// Never follows redirects; responses are relayed as-is.
    pub fn passthrough(timeouts: &TimeoutConfig) -> Result<Self> {
        Self::build(Self::builder(timeouts).redirect(Policy::none()), timeouts)
    }

    /// HTTP/1.1 only, so `Connection: upgrade` handshakes can be forwarded.
    pub fn upgrading(timeouts: &TimeoutConfig) -> Result<Self> {
        Self::build(
            Self::builder(timeouts)
                .redirect(Policy::none())
                .http1_only(),
            timeouts,
        )
    }

    /// Follows up to `max_redirects` redirects; the response URL is the final one.
    pub fn following(timeouts: &TimeoutConfig, max_redirects: usize) -> Result<Self> {
        Self::build(
            Self::builder(timeouts).redirect(Policy::limited(max_redirects)),
            timeouts,
        )
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Send the request and wait for the response head.
    pub async fn send(&self, request: OutboundRequest) -> Result<reqwest::Response> {
        let destination = request.url.to_string();
        let mut builder = self
            .client
            .request(request.method, request.url)
            .headers(request.headers);
        if let Some(body) = request.body {
            builder = builder.body(reqwest::Body::wrap_stream(body.into_data_stream()));
        }

        with_deadline(&destination, self.deadline, async move {
            builder.send().await.map_err(ProxyError::from)
        })
        .await
    }
}

/// Relay a destination response to the client unmodified, body streamed.
///
/// Only hop-by-hop headers are dropped; status and every other header survive.
pub fn stream_back(response: reqwest::Response) -> Response {
    let status = response.status();
    let headers = inbound_response_headers(response.headers());
    let mut relayed = Response::new(Body::from_stream(response.bytes_stream()));
    *relayed.status_mut() = status;
    *relayed.headers_mut() = headers;
    relayed
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn body_detection() {
        let mut headers = HeaderMap::new();
        assert!(!has_body(&headers));

        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("0"));
        assert!(!has_body(&headers));

        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("12"));
        assert!(has_body(&headers));

        let mut chunked = HeaderMap::new();
        chunked.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        assert!(has_body(&chunked));
    }

    #[tokio::test]
    async fn refused_connection_is_unreachable() {
        // Bind then drop to get a port nobody listens on.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let upstream = Upstream::passthrough(&TimeoutConfig::default()).unwrap();
        let err = upstream
            .send(OutboundRequest {
                method: Method::GET,
                url: Url::parse(&format!("http://127.0.0.1:{}/", port)).unwrap(),
                headers: HeaderMap::new(),
                body: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::UpstreamUnreachable { .. }), "{:?}", err);
    }
}
