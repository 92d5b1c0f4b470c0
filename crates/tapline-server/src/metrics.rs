//! Metrics collection and export for Tapline.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "tapline_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "tapline_connections_active";
    pub const CONNECTIONS_BOUND: &str = "tapline_connections_bound";
    pub const MESSAGES_TOTAL: &str = "tapline_messages_total";
    pub const MESSAGES_BYTES: &str = "tapline_messages_bytes";
    pub const TAPS_TOTAL: &str = "tapline_taps_total";
    pub const PUSH_TOTAL: &str = "tapline_push_total";
    pub const LATENCY_SECONDS: &str = "tapline_latency_seconds";
    pub const ERRORS_TOTAL: &str = "tapline_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of realtime connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of open realtime connections"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_BOUND,
        "Current number of connections bound to a participant"
    );
    metrics::describe_counter!(names::MESSAGES_TOTAL, "Total number of realtime messages");
    metrics::describe_counter!(names::MESSAGES_BYTES, "Total bytes of realtime messages");
    metrics::describe_counter!(names::TAPS_TOTAL, "Taps relayed, by delivery path");
    metrics::describe_counter!(names::PUSH_TOTAL, "Push attempts, by outcome");
    metrics::describe_histogram!(
        names::LATENCY_SECONDS,
        "Message processing latency in seconds"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a new connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a disconnection.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Update the bound connection count.
pub fn set_bound_connections(count: usize) {
    gauge!(names::CONNECTIONS_BOUND).set(count as f64);
}

/// Record a realtime message.
pub fn record_message(bytes: usize, direction: &'static str) {
    counter!(names::MESSAGES_TOTAL, "direction" => direction).increment(1);
    counter!(names::MESSAGES_BYTES, "direction" => direction).increment(bytes as u64);
}

/// Record a relayed tap.
pub fn record_tap(path: &'static str) {
    counter!(names::TAPS_TOTAL, "path" => path).increment(1);
}

/// Record the outcome of a push attempt.
pub fn record_push(outcome: &'static str) {
    counter!(names::PUSH_TOTAL, "outcome" => outcome).increment(1);
}

/// Record message latency.
pub fn record_latency(seconds: f64) {
    histogram!(names::LATENCY_SECONDS).record(seconds);
}

/// Record an error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        record_connection();
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        record_disconnection();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recorders_without_exporter() {
        // No recorder installed: every call is a no-op.
        let _guard = ConnectionMetricsGuard::new();
        record_tap("push");
        record_push("delivered");
        set_bound_connections(1);
    }

    #[test]
    fn test_descriptions_reach_installed_recorder() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            init_metrics();
            record_tap("push");
        });

        let rendered = handle.render();
        assert!(rendered.contains("# HELP tapline_taps_total Taps relayed, by delivery path"));
        assert!(rendered.contains(r#"tapline_taps_total{path="push"} 1"#));
    }
}
