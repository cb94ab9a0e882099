//! Configuration validation.
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServerConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::ServerConfig;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// One semantic problem with a configuration value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
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

/// Check every semantic constraint and collect the violations.
pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.server.host.trim().is_empty() {
        errors.push(ValidationError::new("server.host", "must not be empty"));
    }
    if config.server.max_connections == 0 {
        errors.push(ValidationError::new("server.max_connections", "must be greater than 0"));
    }

    if config.limits.max_head_bytes < 1024 {
        errors.push(ValidationError::new("limits.max_head_bytes", "must be at least 1024"));
    }
    if config.limits.max_headers == 0 {
        errors.push(ValidationError::new("limits.max_headers", "must be greater than 0"));
    }
    if config.limits.max_requests_per_connection == 0 {
        errors.push(ValidationError::new(
            "limits.max_requests_per_connection",
            "must be greater than 0",
        ));
    }

    let timeouts = [
        ("timeouts.idle_timeout", Some(config.timeouts.idle_timeout)),
        ("timeouts.request_timeout", Some(config.timeouts.request_timeout)),
        ("timeouts.shutdown_grace_period", Some(config.timeouts.shutdown_grace_period)),
        ("lifespan.startup_timeout", config.lifespan.startup_timeout),
        ("lifespan.shutdown_timeout", Some(config.lifespan.shutdown_timeout)),
    ];
    for (field, value) in timeouts {
        if let Some(value) = value {
            if !(value.is_finite() && value > 0.0) {
                errors.push(ValidationError::new(field, format!("must be a positive number of seconds, got {value}")));
            }
        }
    }

    let level = config.observability.log_level.to_ascii_lowercase();
    if !LOG_LEVELS.contains(&level.as_str()) {
        errors.push(ValidationError::new(
            "observability.log_level",
            format!("unknown level `{}`", config.observability.log_level),
        ));
    }
    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("`{}` is not a socket address", config.observability.metrics_address),
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
        assert_eq!(validate_config(&ServerConfig::default()), Ok(()));
    }

    #[test]
    fn reports_every_error() {
        let mut config = ServerConfig::default();
        config.server.host = " ".into();
        config.server.max_connections = 0;
        config.timeouts.idle_timeout = 0.0;
        config.lifespan.startup_timeout = Some(f64::NAN);
        config.observability.log_level = "loud".into();
        config.observability.metrics_enabled = true;
        config.observability.metrics_address = "nowhere".into();

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert_eq!(
            fields,
            vec![
                "server.host",
                "server.max_connections",
                "timeouts.idle_timeout",
                "lifespan.startup_timeout",
                "observability.log_level",
                "observability.metrics_address",
            ]
        );
    }

    #[test]
    fn absent_startup_timeout_is_fine() {
        let mut config = ServerConfig::default();
        config.lifespan.startup_timeout = None;
        assert!(validate_config(&config).is_ok());
    }
}
