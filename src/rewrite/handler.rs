//! Rewriting handler.
//!
//! # Responsibilities
//! - Resolve the destination from the `/?url=` convention, the search fallback,
//!   or the `Referer` of a stray relative request
//! - Fetch it with redirects followed, identity encoding and translated
//!   `Referer`/`Origin`
//! - Rewrite HTML, CSS and scripts so follow-up requests come back here;
//!   stream everything else through untouched
//! - Clean response headers that would break the rewritten document
//!
//! # Design Decisions
//! - Documents are buffered up to `max_document_bytes`; anything larger is
//!   streamed unmodified rather than rejected
//! - Fetching the head and buffering the body share one outbound deadline
//! - Documents are decoded from their declared or sniffed charset and encoded
//!   back into it after rewriting
//! - Rewriting runs on the blocking pool, so a large document never stalls the
//!   reactor, and a panic there surfaces as an internal error

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use bytes::{Bytes, BytesMut};
use futures_util::future::BoxFuture;
use futures_util::stream::{self, BoxStream};
use futures_util::StreamExt;
use tokio::time::Instant;
use url::Url;

use super::charset;
use super::css::rewrite_css;
use super::html::rewrite_html;
use super::js::rewrite_js;
use super::runtime::bootstrap;
use super::target::{RewriteConvention, Target};
use crate::config::{RewriteConfig, TimeoutConfig};
use crate::error::{ProxyError, Result};
use crate::http::request::RequestIdExt;
use crate::http::response::error_page;
use crate::observability::metrics;
use crate::resilience::timeouts::with_budget;
use crate::routing::{IncomingRequest, ProxyHandler};
use crate::security::headers::{
    inbound_response_headers, outbound_headers, rescope_cookies, strip_document_policies,
};
use crate::upstream::{has_body, OutboundRequest, Upstream};

/// Body classes the handler knows how to rewrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Html,
    Css,
    Script,
    Other,
}

impl ContentKind {
    /// Classify a `Content-Type` value by its essence, parameters ignored.
    pub fn classify(content_type: Option<&str>) -> Self {
        let Some(content_type) = content_type else {
            return ContentKind::Other;
        };
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase();
        match essence.as_str() {
            "text/html" | "application/xhtml+xml" => ContentKind::Html,
            "text/css" => ContentKind::Css,
            e if e.ends_with("/javascript")
                || e.ends_with("/ecmascript")
                || e.ends_with("/x-javascript") =>
            {
                ContentKind::Script
            }
            _ => ContentKind::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Html => "html",
            ContentKind::Css => "css",
            ContentKind::Script => "script",
            ContentKind::Other => "other",
        }
    }
}

/// What to do with an inbound request before any outbound traffic.
#[derive(Debug, PartialEq, Eq)]
enum Resolution {
    Fetch(Url),
    Redirect(String),
}

enum Collected {
    Complete(Bytes),
    /// The limit was exceeded; the already-read prefix is chained in front of
    /// the rest of the body.
    Overflow(BoxStream<'static, reqwest::Result<Bytes>>),
}

struct Inner {
    convention: RewriteConvention,
    upstream: Upstream,
    search_template: String,
    max_document_bytes: usize,
    inject_runtime: bool,
}

/// Rewrite strategy: fetch on behalf of the client and rewrite the document so
/// every reference it contains points back at the relay.
#[derive(Clone)]
pub struct RewriteHandler {
    inner: Arc<Inner>,
}

impl RewriteHandler {
    pub fn new(config: &RewriteConfig, timeouts: &TimeoutConfig, tunnel_prefix: &str) -> Result<Self> {
        Ok(Self {
            inner: Arc::new(Inner {
                convention: RewriteConvention::new(config.query_param.clone(), tunnel_prefix),
                upstream: Upstream::following(timeouts, config.max_redirects)?,
                search_template: config.search_template.clone(),
                max_document_bytes: config.max_document_bytes,
                inject_runtime: config.inject_runtime,
            }),
        })
    }

    pub fn convention(&self) -> &RewriteConvention {
        &self.inner.convention
    }

    async fn serve(self, request: IncomingRequest) -> Response {
        let request_id = request.request_id();

        let target = match self.resolve(&request) {
            Ok(Resolution::Fetch(target)) => target,
            Ok(Resolution::Redirect(location)) => {
                tracing::debug!(request_id = %request_id, location = %location, "Redirecting to relay address");
                return Redirect::temporary(&location).into_response();
            }
            Err(err) => {
                err.log(&request_id);
                return error_page(&err, None);
            }
        };

        match self.fetch(request, &target, &request_id).await {
            Ok(response) => response,
            Err(err) => {
                err.log(&request_id);
                if matches!(
                    err,
                    ProxyError::UpstreamUnreachable { .. } | ProxyError::UpstreamTimeout { .. }
                ) {
                    metrics::record_upstream_error("rewrite", err.code());
                }
                error_page(&err, Some(target.as_str()))
            }
        }
    }

    fn resolve(&self, request: &IncomingRequest) -> Result<Resolution> {
        let inner = &self.inner;
        let uri = request.uri();

        if uri.path() == "/" {
            match inner
                .convention
                .target_from_query(uri.query(), &inner.search_template)?
            {
                Some(Target::Fetch(url)) => return Ok(Resolution::Fetch(url)),
                Some(Target::Search(url)) => {
                    return Ok(Resolution::Redirect(inner.convention.proxied(&url)))
                }
                None => {}
            }
        }

        let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
        let stray = request
            .headers()
            .get(header::REFERER)
            .and_then(|v| v.to_str().ok())
            .and_then(|referer| inner.convention.resolve_stray(referer, path_and_query));
        if let Some(url) = stray {
            return Ok(Resolution::Redirect(inner.convention.proxied(&url)));
        }

        Err(ProxyError::client(format!(
            "no destination; address pages as /?{}=<encoded URL>",
            inner.convention.param()
        )))
    }

    async fn fetch(&self, request: IncomingRequest, target: &Url, request_id: &str) -> Result<Response> {
        let inner = &self.inner;

        let mut headers = outbound_headers(request.headers());
        headers.insert(header::ACCEPT_ENCODING, HeaderValue::from_static("identity"));
        self.translate_origin_headers(&mut headers, target);

        let body_present = has_body(request.headers());
        let (parts, body) = request.into_parts();
        let skip_body = parts.method == Method::HEAD;

        tracing::debug!(
            request_id = %request_id,
            method = %parts.method,
            destination = %target,
            "Fetching document"
        );
        let started = Instant::now();
        let response = inner
            .upstream
            .send(OutboundRequest {
                method: parts.method,
                url: target.clone(),
                headers,
                body: body_present.then_some(body),
            })
            .await?;

        let status = response.status();
        let final_url = response.url().clone();
        let mut headers = inbound_response_headers(response.headers());
        self.rewrite_location(&mut headers, &final_url);
        rescope_cookies(&mut headers);

        let content_type = headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let kind = ContentKind::classify(content_type.as_deref());
        let passthrough = kind == ContentKind::Other
            || skip_body
            || status == StatusCode::NO_CONTENT
            || status == StatusCode::NOT_MODIFIED
            || !identity_encoded(&headers)
            || declared_length(&headers).is_some_and(|len| len > inner.max_document_bytes as u64);
        if passthrough {
            return Ok(respond(status, headers, Body::from_stream(response.bytes_stream())));
        }

        let collected = with_budget(
            final_url.as_str(),
            started,
            inner.upstream.deadline(),
            collect_limited(response, inner.max_document_bytes),
        )
        .await?;
        let bytes = match collected {
            Collected::Complete(bytes) => bytes,
            Collected::Overflow(stream) => {
                tracing::debug!(request_id = %request_id, "Document over size limit, streaming unmodified");
                return Ok(respond(status, headers, Body::from_stream(stream)));
            }
        };

        let Some(decoded) = charset::decode(kind, content_type.as_deref(), &bytes) else {
            tracing::debug!(request_id = %request_id, "Document encoding is not decodable, passing through");
            return Ok(respond(status, headers, Body::from(bytes)));
        };

        let rewritten = self.rewrite_body(kind, decoded.text, final_url).await?;
        let (body, used) = charset::encode(&rewritten, decoded.encoding);
        if charset::declared(content_type.as_deref()) != Some(used) {
            let relabeled = content_type
                .as_deref()
                .and_then(|ct| HeaderValue::from_str(&charset::with_charset(ct, used)).ok());
            if let Some(relabeled) = relabeled {
                headers.insert(header::CONTENT_TYPE, relabeled);
            }
        }
        headers.remove(header::CONTENT_LENGTH);
        strip_document_policies(&mut headers);
        metrics::record_rewrite(kind.as_str());
        Ok(respond(status, headers, Body::from(body)))
    }

    async fn rewrite_body(&self, kind: ContentKind, text: String, base: Url) -> Result<String> {
        let convention = self.inner.convention.clone();
        let runtime = (self.inner.inject_runtime && kind == ContentKind::Html)
            .then(|| bootstrap(&convention, &base));

        tokio::task::spawn_blocking(move || match kind {
            ContentKind::Html => rewrite_html(&text, &base, &convention, runtime.as_deref()),
            ContentKind::Css => Ok(rewrite_css(&text, &base, &convention)),
            ContentKind::Script => Ok(rewrite_js(&text, &base, &convention)),
            ContentKind::Other => Ok(text),
        })
        .await
        .map_err(|e| ProxyError::internal(format!("rewrite task failed: {}", e)))?
    }

    /// `Referer` becomes the page the client was actually on; `Origin` becomes
    /// the destination's origin.
    fn translate_origin_headers(&self, headers: &mut HeaderMap, target: &Url) {
        let referer = headers
            .get(header::REFERER)
            .and_then(|v| v.to_str().ok())
            .and_then(|r| self.inner.convention.target_of_address(r))
            .and_then(|page| HeaderValue::from_str(page.as_str()).ok());
        headers.remove(header::REFERER);
        if let Some(referer) = referer {
            headers.insert(header::REFERER, referer);
        }

        if headers.contains_key(header::ORIGIN) {
            match HeaderValue::from_str(&target.origin().ascii_serialization()) {
                Ok(origin) => {
                    headers.insert(header::ORIGIN, origin);
                }
                Err(_) => {
                    headers.remove(header::ORIGIN);
                }
            }
        }
    }

    fn rewrite_location(&self, headers: &mut HeaderMap, base: &Url) {
        let rewritten = headers
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|location| self.inner.convention.rewrite_reference(location, base))
            .and_then(|location| HeaderValue::from_str(&location).ok());
        if let Some(location) = rewritten {
            headers.insert(header::LOCATION, location);
        }
    }
}

impl ProxyHandler for RewriteHandler {
    fn handle(&self, request: IncomingRequest) -> BoxFuture<'static, Response> {
        Box::pin(self.clone().serve(request))
    }
}

fn respond(status: StatusCode, headers: HeaderMap, body: Body) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

fn identity_encoded(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().is_empty() || v.trim().eq_ignore_ascii_case("identity"))
        .unwrap_or(true)
}

fn declared_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

async fn collect_limited(response: reqwest::Response, limit: usize) -> Result<Collected> {
    let mut body = Box::pin(response.bytes_stream());
    let mut buffer = BytesMut::new();
    while let Some(chunk) = body.next().await {
        buffer.extend_from_slice(&chunk?);
        if buffer.len() > limit {
            let head = stream::once(futures_util::future::ready(Ok(buffer.freeze())));
            return Ok(Collected::Overflow(head.chain(body).boxed()));
        }
    }
    Ok(Collected::Complete(buffer.freeze()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn handler() -> RewriteHandler {
        RewriteHandler::new(&RewriteConfig::default(), &TimeoutConfig::default(), "/bare/").unwrap()
    }

    fn request(uri: &str, referer: Option<&str>) -> IncomingRequest {
        let mut builder = Request::builder().uri(uri);
        if let Some(referer) = referer {
            builder = builder.header(header::REFERER, referer);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn content_classification() {
        assert_eq!(ContentKind::classify(Some("text/html; charset=utf-8")), ContentKind::Html);
        assert_eq!(ContentKind::classify(Some("application/xhtml+xml")), ContentKind::Html);
        assert_eq!(ContentKind::classify(Some("TEXT/CSS")), ContentKind::Css);
        assert_eq!(ContentKind::classify(Some("application/javascript")), ContentKind::Script);
        assert_eq!(ContentKind::classify(Some("text/ecmascript")), ContentKind::Script);
        assert_eq!(ContentKind::classify(Some("image/png")), ContentKind::Other);
        assert_eq!(ContentKind::classify(Some("application/json")), ContentKind::Other);
        assert_eq!(ContentKind::classify(None), ContentKind::Other);
    }

    #[test]
    fn explicit_target_is_fetched() {
        let resolution = handler()
            .resolve(&request("/?url=https%3A%2F%2Fexample.com%2Fpage", None))
            .unwrap();
        assert_eq!(
            resolution,
            Resolution::Fetch(Url::parse("https://example.com/page").unwrap())
        );
    }

    #[test]
    fn search_phrase_redirects_to_search_engine() {
        let resolution = handler().resolve(&request("/?url=rust%20lang", None)).unwrap();
        assert_eq!(
            resolution,
            Resolution::Redirect(
                "/?url=https%3A%2F%2Fduckduckgo.com%2F%3Fq%3Drust%2520lang".to_string()
            )
        );
    }

    #[test]
    fn stray_request_follows_referer() {
        let resolution = handler()
            .resolve(&request(
                "/static/app.css?v=3",
                Some("http://127.0.0.1:8080/?url=https%3A%2F%2Fexample.com%2Fdocs%2F"),
            ))
            .unwrap();
        assert_eq!(
            resolution,
            Resolution::Redirect(
                "/?url=https%3A%2F%2Fexample.com%2Fstatic%2Fapp.css%3Fv%3D3".to_string()
            )
        );
    }

    #[test]
    fn no_destination_is_client_error() {
        let err = handler().resolve(&request("/favicon.ico", None)).unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        let err = handler().resolve(&request("/", None)).unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn outbound_identity_headers_are_translated() {
        let handler = handler();
        let mut headers = HeaderMap::new();
        headers.insert(
            header::REFERER,
            HeaderValue::from_static("http://127.0.0.1:8080/?url=https%3A%2F%2Fexample.com%2Fa"),
        );
        headers.insert(header::ORIGIN, HeaderValue::from_static("http://127.0.0.1:8080"));
        let target = Url::parse("https://api.example.com/v1/items").unwrap();
        handler.translate_origin_headers(&mut headers, &target);
        assert_eq!(headers[header::REFERER], "https://example.com/a");
        assert_eq!(headers[header::ORIGIN], "https://api.example.com");

        let mut shell = HeaderMap::new();
        shell.insert(header::REFERER, HeaderValue::from_static("http://127.0.0.1:8080/"));
        handler.translate_origin_headers(&mut shell, &target);
        assert!(!shell.contains_key(header::REFERER));
    }

    #[test]
    fn location_points_back_at_relay() {
        let handler = handler();
        let mut headers = HeaderMap::new();
        headers.insert(header::LOCATION, HeaderValue::from_static("/login?next=%2F"));
        let base = Url::parse("https://example.com/account").unwrap();
        handler.rewrite_location(&mut headers, &base);
        assert_eq!(
            headers[header::LOCATION],
            "/?url=https%3A%2F%2Fexample.com%2Flogin%3Fnext%3D%252F"
        );
    }

    #[tokio::test]
    async fn unreachable_destination_renders_error_page() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let target = format!("http://127.0.0.1:{}/", port);
        let uri = format!("/?url={}", urlencoding::encode(&target));
        let response = handler().handle(request(&uri, None)).await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(response.headers()["x-relay-error"], "UPSTREAM_UNREACHABLE");
        assert!(response.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/html"));
    }
}
