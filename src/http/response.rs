//! Error responses.
//!
//! # Responsibilities
//! - Render `ProxyError` for each audience: plain text for routing failures,
//!   JSON for tunnel clients, an HTML page for browser navigations
//! - Tag every error response with `x-relay-error` so clients can tell the
//!   classes apart without parsing bodies
//! - Turn handler panics into a generic 500

use std::any::Any;

use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::error::ProxyError;

pub const X_RELAY_ERROR: &str = "x-relay-error";

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

fn tagged(err: &ProxyError, mut response: Response) -> Response {
    *response.status_mut() = err.status();
    response
        .headers_mut()
        .insert(X_RELAY_ERROR, HeaderValue::from_static(err.code()));
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

/// Short plain-text diagnostic.
pub fn error_text(err: &ProxyError) -> Response {
    tagged(err, err.public_message().into_response())
}

/// `{"code": ..., "message": ...}` for tunnel clients.
pub fn error_json(err: &ProxyError) -> Response {
    let body = ErrorBody {
        code: err.code(),
        message: err.public_message(),
    };
    tagged(err, Json(body).into_response())
}

/// Proxy-originated page shown in place of a document that could not be fetched.
pub fn error_page(err: &ProxyError, destination: Option<&str>) -> Response {
    let title = match err {
        ProxyError::ClientRequest(_) => "Invalid address",
        ProxyError::UpstreamUnreachable { .. } => "Site unavailable",
        ProxyError::UpstreamTimeout { .. } => "Site took too long to respond",
        ProxyError::Internal(_) => "Proxy error",
    };
    let destination = destination
        .map(|d| format!("<p class=\"dest\">{}</p>", escape_html(d)))
        .unwrap_or_default();
    let html = format!(
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>{title}</title>\
         <style>body{{font-family:sans-serif;background:#11110f;color:#ffd700;margin:4em}}\
         .dest{{opacity:.7;word-break:break-all}}</style></head>\
         <body><h1>{title}</h1><p>{message}</p>{destination}</body></html>\n",
        title = title,
        message = escape_html(&err.public_message()),
        destination = destination,
    );

    let mut response = Response::new(Body::from(html));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/html; charset=utf-8"),
    );
    tagged(err, response)
}

/// Body used when a handler panics. Nothing about the panic is disclosed.
pub fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    };
    tracing::error!(panic = %detail, "Handler panicked");

    let mut response = error_text(&ProxyError::internal(detail));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response
}

/// Minimal escaping for text and double-quoted attribute contexts.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}
