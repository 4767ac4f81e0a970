//! Tunnel envelope decoding.
//!
//! Envelope layout, after the reserved prefix:
//!
//! ```text
//! /bare/<percent-encoded absolute URL>[?<query>]
//! ```
//!
//! The remainder is percent-decoded into the destination. When the decoded
//! destination carries no query of its own, the inbound query belongs to it.
//! `ws`/`wss` destinations are fetched over `http`/`https` with an upgrade
//! handshake. Forwarded headers are the inbound ones minus hop-by-hop and relay
//! identity, unless an `x-bare-headers` JSON object supplies the full set.

use std::collections::BTreeMap;

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use serde::Deserialize;
use url::Url;

use crate::error::{ProxyError, Result};
use crate::security::headers::outbound_headers;

/// Header holding an explicit forwarding header set.
pub const X_BARE_HEADERS: &str = "x-bare-headers";

/// A decoded tunnel request target.
#[derive(Debug, Clone)]
pub struct Envelope {
    /// Absolute `http`/`https` URL to contact.
    pub destination: Url,
    /// Headers to send to the destination.
    pub headers: HeaderMap,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum HeaderValues {
    One(String),
    Many(Vec<String>),
}

/// Decode the envelope that follows the reserved prefix.
pub fn decode_envelope(remainder: &str, query: Option<&str>, inbound: &HeaderMap) -> Result<Envelope> {
    if remainder.is_empty() {
        return Err(ProxyError::client("empty tunnel envelope"));
    }

    let decoded = urlencoding::decode(remainder)
        .map_err(|_| ProxyError::client("tunnel envelope is not valid UTF-8"))?;
    let mut target = decoded.into_owned();
    if let Some(query) = query.filter(|q| !q.is_empty()) {
        if !target.contains('?') {
            target.push('?');
            target.push_str(query);
        }
    }

    let destination = parse_destination(&target)?;
    let headers = match inbound.get(X_BARE_HEADERS) {
        Some(explicit) => explicit_headers(explicit)?,
        None => outbound_headers(inbound),
    };

    Ok(Envelope {
        destination,
        headers,
    })
}

fn parse_destination(target: &str) -> Result<Url> {
    let mut url = Url::parse(target)
        .map_err(|e| ProxyError::client(format!("invalid destination '{}': {}", target, e)))?;

    let scheme = match url.scheme() {
        "http" | "ws" => "http",
        "https" | "wss" => "https",
        other => {
            return Err(ProxyError::client(format!(
                "unsupported destination scheme '{}'",
                other
            )))
        }
    };
    if url.host_str().map_or(true, str::is_empty) {
        return Err(ProxyError::client("destination has no host"));
    }
    if url.scheme() != scheme && url.set_scheme(scheme).is_err() {
        return Err(ProxyError::client("destination scheme cannot be tunneled"));
    }
    url.set_fragment(None);
    Ok(url)
}

fn explicit_headers(value: &HeaderValue) -> Result<HeaderMap> {
    let json = value
        .to_str()
        .map_err(|_| ProxyError::client("x-bare-headers is not valid text"))?;
    let parsed: BTreeMap<String, HeaderValues> = serde_json::from_str(json)
        .map_err(|e| ProxyError::client(format!("x-bare-headers is not a header object: {}", e)))?;

    let mut headers = HeaderMap::new();
    for (name, values) in parsed {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| ProxyError::client(format!("invalid header name '{}'", name)))?;
        let values = match values {
            HeaderValues::One(v) => vec![v],
            HeaderValues::Many(vs) => vs,
        };
        for v in values {
            let v = HeaderValue::from_str(&v)
                .map_err(|_| ProxyError::client(format!("invalid value for header '{}'", name)))?;
            headers.append(name.clone(), v);
        }
    }
    Ok(outbound_headers(&headers))
}
