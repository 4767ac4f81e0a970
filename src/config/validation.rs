//! Configuration validation.
//!
//! Serde handles the syntax; this module checks value ranges and the shape of the
//! reserved prefix. Every problem is reported, not just the first.

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::RelayConfig;

/// A single semantic problem in a configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Validate a configuration. Pure function; runs before a config is accepted.
pub fn validate_config(config: &RelayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::new("listener.max_connections", "must be > 0"));
    }

    let timeouts = [
        ("timeouts.request_secs", config.timeouts.request_secs),
        ("timeouts.connect_secs", config.timeouts.connect_secs),
        ("timeouts.upstream_secs", config.timeouts.upstream_secs),
        ("timeouts.relay_max_secs", config.timeouts.relay_max_secs),
    ];
    for (field, value) in timeouts {
        if value == 0 {
            errors.push(ValidationError::new(field, "must be > 0"));
        }
    }
    if config.timeouts.request_secs > 0
        && config.timeouts.upstream_secs >= config.timeouts.request_secs
    {
        errors.push(ValidationError::new(
            "timeouts.upstream_secs",
            format!(
                "must be below timeouts.request_secs ({}) so destination timeouts surface as 504",
                config.timeouts.request_secs
            ),
        ));
    }

    let prefix = &config.tunnel.prefix;
    if !prefix.starts_with('/') || !prefix.ends_with('/') {
        errors.push(ValidationError::new(
            "tunnel.prefix",
            "must start and end with '/'",
        ));
    } else if prefix == "/" {
        errors.push(ValidationError::new(
            "tunnel.prefix",
            "'/' would leave no path space for the rewriting handler",
        ));
    } else if prefix.contains(['?', '#', '%']) || prefix.contains("//") {
        errors.push(ValidationError::new(
            "tunnel.prefix",
            "must be a plain path without query, fragment, escapes or empty segments",
        ));
    }

    let param = &config.rewrite.query_param;
    if param.is_empty()
        || !param
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        errors.push(ValidationError::new(
            "rewrite.query_param",
            "must be a non-empty run of [A-Za-z0-9_-]",
        ));
    }
    if !config.rewrite.search_template.contains("%s") {
        errors.push(ValidationError::new(
            "rewrite.search_template",
            "must contain the %s placeholder",
        ));
    }
    if config.rewrite.max_document_bytes == 0 {
        errors.push(ValidationError::new("rewrite.max_document_bytes", "must be > 0"));
    }

    if config.observability.metrics_enabled
        && config
            .observability
            .metrics_address
            .parse::<SocketAddr>()
            .is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!(
                "'{}' is not a socket address",
                config.observability.metrics_address
            ),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
