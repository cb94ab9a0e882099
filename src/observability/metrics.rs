//! Metrics collection and exposition.
//!
//! # Metrics
//! - `lodge_requests_total` (counter): completed exchanges by method, status
//! - `lodge_request_duration_seconds` (histogram): time from parsed head to response end
//! - `lodge_active_connections` (gauge): current connection count
//! - `lodge_parse_errors_total` (counter): rejected requests by status
//!
//! All recorders are no-ops until an exporter is installed.

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter with its own HTTP listener.
pub fn init_metrics(addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| e.to_string())?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

/// Record one finished exchange.
pub fn record_request(method: &str, status: u16, start: Instant) {
    counter!(
        "lodge_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("lodge_request_duration_seconds").record(start.elapsed().as_secs_f64());
}

pub fn record_parse_error(status: u16) {
    counter!("lodge_parse_errors_total", "status" => status.to_string()).increment(1);
}

pub fn set_active_connections(count: usize) {
    gauge!("lodge_active_connections").set(count as f64);
}
