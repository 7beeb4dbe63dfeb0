//! Metrics collection and export for Parley.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use parley_core::Delivery;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "parley_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "parley_connections_active";
    pub const USERS_ONLINE: &str = "parley_users_online";
    pub const MESSAGES_TOTAL: &str = "parley_messages_total";
    pub const PUSHES_TOTAL: &str = "parley_pushes_total";
    pub const RATE_LIMITED_TOTAL: &str = "parley_rate_limited_total";
    pub const SEND_LATENCY_SECONDS: &str = "parley_send_latency_seconds";
    pub const ERRORS_TOTAL: &str = "parley_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of push connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of open push connections"
    );
    metrics::describe_gauge!(names::USERS_ONLINE, "Users with a registered connection");
    metrics::describe_counter!(names::MESSAGES_TOTAL, "Total number of messages persisted");
    metrics::describe_counter!(names::PUSHES_TOTAL, "Live push attempts by result");
    metrics::describe_counter!(
        names::RATE_LIMITED_TOTAL,
        "Requests rejected by a rate limiter stage"
    );
    metrics::describe_histogram!(
        names::SEND_LATENCY_SECONDS,
        "Send pipeline latency in seconds"
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

/// Update the online user count.
pub fn set_users_online(count: usize) {
    gauge!(names::USERS_ONLINE).set(count as f64);
}

/// Record a persisted message and what happened to its push.
pub fn record_send(delivery: Delivery, seconds: f64) {
    counter!(names::MESSAGES_TOTAL).increment(1);
    let result = match delivery {
        Delivery::Delivered => "delivered",
        Delivery::Offline => "offline",
        Delivery::Failed => "failed",
    };
    counter!(names::PUSHES_TOTAL, "result" => result).increment(1);
    histogram!(names::SEND_LATENCY_SECONDS).record(seconds);
}

/// Record a rate limiter rejection.
pub fn record_rate_limited(stage: &str) {
    counter!(names::RATE_LIMITED_TOTAL, "stage" => stage.to_string()).increment(1);
}

/// Record an error.
pub fn record_error(error_type: &str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type.to_string()).increment(1);
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
