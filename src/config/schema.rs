//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the server.
//! All types derive Serde traits for deserialization from config files.
//! Durations are given in (fractional) seconds.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the server.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    /// Listener settings (bind address, connection limit).
    pub server: ListenerConfig,

    /// Request size limits.
    pub limits: LimitsConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Application startup/shutdown protocol settings.
    pub lifespan: LifespanConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Interface to bind (e.g., "127.0.0.1", "0.0.0.0", "::").
    pub host: String,

    /// TCP port; 0 picks an ephemeral port.
    pub port: u16,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            max_connections: 10_000,
        }
    }
}

/// Request size limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Largest accepted request body.
    pub max_body_bytes: u64,

    /// Largest accepted request line plus headers.
    pub max_head_bytes: usize,

    /// Maximum number of header lines per request.
    pub max_headers: usize,

    /// Exchanges served on one connection before it is closed.
    pub max_requests_per_connection: u32,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: 10 * 1024 * 1024,
            max_head_bytes: 64 * 1024,
            max_headers: 100,
            max_requests_per_connection: 100,
        }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Wait for the first byte of the next request on a kept-alive connection.
    pub idle_timeout: f64,

    /// Wait for the rest of a started request, and for each body read.
    pub request_timeout: f64,

    /// How long shutdown waits for open connections before closing them.
    pub shutdown_grace_period: f64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            idle_timeout: 5.0,
            request_timeout: 60.0,
            shutdown_grace_period: 30.0,
        }
    }
}

impl TimeoutConfig {
    pub fn idle(&self) -> Duration {
        secs(self.idle_timeout)
    }

    pub fn request(&self) -> Duration {
        secs(self.request_timeout)
    }

    pub fn shutdown_grace(&self) -> Duration {
        secs(self.shutdown_grace_period)
    }
}

/// Whether and how strictly the lifespan protocol is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LifespanMode {
    /// Use lifespan if the application supports it.
    #[default]
    Auto,
    /// Require lifespan support; anything else aborts startup.
    On,
    /// Never send lifespan events.
    Off,
}

/// Lifespan protocol configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LifespanConfig {
    pub mode: LifespanMode,

    /// Wait for the startup acknowledgement; unbounded when absent.
    pub startup_timeout: Option<f64>,

    /// Wait for the shutdown acknowledgement.
    pub shutdown_timeout: f64,
}

impl Default for LifespanConfig {
    fn default() -> Self {
        Self {
            mode: LifespanMode::Auto,
            startup_timeout: Some(30.0),
            shutdown_timeout: 30.0,
        }
    }
}

impl LifespanConfig {
    pub fn startup(&self) -> Option<Duration> {
        self.startup_timeout.map(secs)
    }

    pub fn shutdown(&self) -> Duration {
        secs(self.shutdown_timeout)
    }
}

/// Log line layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

/// Seconds to [`Duration`]; invalid values (rejected by validation) collapse to zero.
fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}
