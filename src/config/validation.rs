//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, worker count > 0)
//! - Check that addresses and filters parse
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: LayerConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;
use std::net::{IpAddr, SocketAddr};

use crate::config::schema::LayerConfig;

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
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

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Check every semantic constraint and report all violations.
pub fn validate_config(config: &LayerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.runtime.worker_threads == Some(0) {
        errors.push(ValidationError::new(
            "runtime.worker_threads",
            "must be at least 1",
        ));
    }

    for server in &config.resolver.nameservers {
        if server.parse::<SocketAddr>().is_err() && server.parse::<IpAddr>().is_err() {
            errors.push(ValidationError::new(
                "resolver.nameservers",
                format!("'{server}' is not an IP address"),
            ));
        }
    }
    if config.resolver.timeout_ms == 0 {
        errors.push(ValidationError::new("resolver.timeout_ms", "must be > 0"));
    }
    if config.resolver.attempts == 0 {
        errors.push(ValidationError::new("resolver.attempts", "must be > 0"));
    }

    if config.timeouts.connect_attempt_ms == 0 {
        errors.push(ValidationError::new("timeouts.connect_attempt_ms", "must be > 0"));
    }
    if config.timeouts.handshake_ms == 0 {
        errors.push(ValidationError::new("timeouts.handshake_ms", "must be > 0"));
    }

    if config.sockets.default_backlog == 0 {
        errors.push(ValidationError::new("sockets.default_backlog", "must be > 0"));
    }
    if config.sockets.keepalive_secs == 0 {
        errors.push(ValidationError::new("sockets.keepalive_secs", "must be > 0"));
    }
    if config.sockets.max_read_bytes == 0 {
        errors.push(ValidationError::new("sockets.max_read_bytes", "must be > 0"));
    }

    if !config.tls.use_webpki_roots && config.tls.ca_file.is_none() {
        tracing::warn!("No TLS trust anchors configured; verified client upgrades will fail");
    }

    if tracing_subscriber::EnvFilter::try_new(&config.observability.log_level).is_err() {
        errors.push(ValidationError::new(
            "observability.log_level",
            format!("'{}' is not a valid filter", config.observability.log_level),
        ));
    }
    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", config.observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(validate_config(&LayerConfig::default()).is_ok());
    }

    #[test]
    fn reports_every_violation() {
        let mut config = LayerConfig::default();
        config.runtime.worker_threads = Some(0);
        config.resolver.nameservers = vec!["dns.example".into()];
        config.timeouts.handshake_ms = 0;
        config.sockets.max_read_bytes = 0;
        config.observability.metrics_enabled = true;
        config.observability.metrics_address = "nowhere".into();

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert_eq!(
            fields,
            [
                "runtime.worker_threads",
                "resolver.nameservers",
                "timeouts.handshake_ms",
                "sockets.max_read_bytes",
                "observability.metrics_address",
            ]
        );
    }
}
