//! Metrics collection and exposition.
//!
//! # Metrics
//! - `relay_requests_total` (counter): requests by route, status
//! - `relay_request_duration_seconds` (histogram): time to response head by route
//! - `relay_upstream_errors_total` (counter): outbound failures by route, kind
//! - `relay_active_relays` (gauge): live upgraded relays
//! - `relay_rewritten_documents_total` (counter): rewritten bodies by content kind
//!
//! Recording is a no-op until `init_metrics` installs the Prometheus recorder.

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_request(route: &'static str, status: u16, start: Instant) {
    counter!("relay_requests_total", "route" => route, "status" => status.to_string())
        .increment(1);
    histogram!("relay_request_duration_seconds", "route" => route)
        .record(start.elapsed().as_secs_f64());
}

pub fn record_upstream_error(route: &'static str, kind: &'static str) {
    counter!("relay_upstream_errors_total", "route" => route, "kind" => kind).increment(1);
}

pub fn set_active_relays(count: u64) {
    gauge!("relay_active_relays").set(count as f64);
}

pub fn record_rewrite(kind: &'static str) {
    counter!("relay_rewritten_documents_total", "kind" => kind).increment(1);
}
