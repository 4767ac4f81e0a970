//! Header manipulation for both proxying strategies.
//!
//! # Responsibilities
//! - Strip hop-by-hop headers (fixed list plus anything named in `Connection`)
//! - Strip headers that would reveal the relay to the destination
//! - Detect websocket upgrade handshakes
//! - Response hygiene for rewritten documents (CSP, framing, cookies)

use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};

/// Headers meaningful for a single hop only (RFC 9110 §7.6.1).
pub const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Headers describing the relay itself rather than the client.
pub const IDENTITY: &[&str] = &[
    "host",
    "forwarded",
    "via",
    "x-forwarded-for",
    "x-forwarded-host",
    "x-forwarded-proto",
    "x-forwarded-port",
    "x-real-ip",
    "x-request-id",
];

/// Prefix of envelope headers consumed by the tunnel.
pub const ENVELOPE_PREFIX: &str = "x-bare-";

/// Headers that stop rewritten documents from working inside the relay.
const DOCUMENT_POLICIES: &[&str] = &[
    "content-security-policy",
    "content-security-policy-report-only",
    "x-frame-options",
    "cross-origin-embedder-policy",
    "cross-origin-opener-policy",
];

/// Remove hop-by-hop headers, including any listed in `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|token| HeaderName::from_bytes(token.trim().as_bytes()).ok())
        .collect();

    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(*name);
    }
}

/// Build the header set forwarded to a destination from the inbound headers.
///
/// Duplicates and order are preserved for everything that survives.
pub fn outbound_headers(inbound: &HeaderMap) -> HeaderMap {
    let mut headers = inbound.clone();
    strip_hop_by_hop(&mut headers);
    for name in IDENTITY {
        headers.remove(*name);
    }

    let envelope: Vec<HeaderName> = headers
        .keys()
        .filter(|k| k.as_str().starts_with(ENVELOPE_PREFIX))
        .cloned()
        .collect();
    for name in envelope {
        headers.remove(name);
    }
    headers
}

/// Build the header set returned to the client from a destination response.
pub fn inbound_response_headers(upstream: &HeaderMap) -> HeaderMap {
    let mut headers = upstream.clone();
    strip_hop_by_hop(&mut headers);
    headers
}

/// True when the request asks to switch to the websocket protocol.
pub fn is_upgrade_request(headers: &HeaderMap) -> bool {
    let connection_upgrade = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"));

    let upgrade_websocket = headers
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().eq_ignore_ascii_case("websocket"))
        .unwrap_or(false);

    connection_upgrade && upgrade_websocket
}

/// Remove policies that would block the injected runtime or framing by the shell.
pub fn strip_document_policies(headers: &mut HeaderMap) {
    for name in DOCUMENT_POLICIES {
        headers.remove(*name);
    }
}

/// Re-scope every `Set-Cookie` to the relay's own origin.
pub fn rescope_cookies(headers: &mut HeaderMap) {
    let cookies: Vec<HeaderValue> = headers
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| HeaderValue::from_str(&rescope_cookie(v)).ok())
        .collect();

    if cookies.is_empty() {
        return;
    }
    headers.remove(header::SET_COOKIE);
    for cookie in cookies {
        headers.append(header::SET_COOKIE, cookie);
    }
}

/// Drop `Domain` and `Path` attributes from a single `Set-Cookie` value.
pub fn rescope_cookie(value: &str) -> String {
    value
        .split(';')
        .map(str::trim)
        .filter(|attr| {
            let name = attr.split('=').next().unwrap_or("").trim();
            !name.eq_ignore_ascii_case("domain") && !name.eq_ignore_ascii_case("path")
        })
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.append(
                HeaderName::from_bytes(k.as_bytes()).unwrap(),
                HeaderValue::from_str(v).unwrap(),
            );
        }
        map
    }

    #[test]
    fn outbound_strips_hop_identity_and_envelope() {
        let inbound = headers(&[
            ("host", "relay.local"),
            ("connection", "keep-alive, x-secret"),
            ("x-secret", "1"),
            ("keep-alive", "timeout=5"),
            ("x-forwarded-for", "10.0.0.1"),
            ("x-request-id", "abc"),
            ("x-bare-headers", "{}"),
            ("accept", "text/html"),
            ("cookie", "a=1"),
            ("cookie", "b=2"),
        ]);
        let out = outbound_headers(&inbound);
        assert_eq!(out.len(), 3);
        assert_eq!(out.get("accept").unwrap(), "text/html");
        let cookies: Vec<_> = out.get_all("cookie").iter().collect();
        assert_eq!(cookies, vec!["a=1", "b=2"]);
    }

    #[test]
    fn response_keeps_end_to_end_headers() {
        let upstream = headers(&[
            ("content-type", "image/png"),
            ("transfer-encoding", "chunked"),
            ("x-origin", "yes"),
        ]);
        let out = inbound_response_headers(&upstream);
        assert!(out.get("transfer-encoding").is_none());
        assert_eq!(out.get("x-origin").unwrap(), "yes");
        assert_eq!(out.get("content-type").unwrap(), "image/png");
    }

    #[test]
    fn detects_websocket_upgrade() {
        assert!(is_upgrade_request(&headers(&[
            ("connection", "keep-alive, Upgrade"),
            ("upgrade", "websocket"),
        ])));
        assert!(!is_upgrade_request(&headers(&[("upgrade", "websocket")])));
        assert!(!is_upgrade_request(&headers(&[
            ("connection", "upgrade"),
            ("upgrade", "h2c"),
        ])));
    }

    #[test]
    fn cookie_loses_domain_and_path() {
        assert_eq!(
            rescope_cookie("sid=42; Domain=.example.com; Path=/account; Secure; HttpOnly"),
            "sid=42; Secure; HttpOnly"
        );
    }

    #[test]
    fn rescopes_every_cookie() {
        let mut map = headers(&[
            ("set-cookie", "a=1; Path=/x"),
            ("set-cookie", "b=2; domain=example.com"),
        ]);
        rescope_cookies(&mut map);
        let cookies: Vec<_> = map.get_all("set-cookie").iter().collect();
        assert_eq!(cookies, vec!["a=1", "b=2"]);
    }
}
