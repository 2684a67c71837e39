//! Metrics collection and export for Parlor.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use parlor_core::EvictReason;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "parlor_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "parlor_connections_active";
    pub const ONLINE_IDENTITIES: &str = "parlor_online_identities";
    pub const MESSAGES_ROUTED: &str = "parlor_messages_routed_total";
    pub const MESSAGES_DROPPED: &str = "parlor_messages_dropped_total";
    pub const PUSHES_TOTAL: &str = "parlor_pushes_total";
    pub const EVICTIONS_TOTAL: &str = "parlor_evictions_total";
    pub const ROUTING_SECONDS: &str = "parlor_routing_seconds";
    pub const ERRORS_TOTAL: &str = "parlor_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of open WebSocket connections"
    );
    metrics::describe_gauge!(
        names::ONLINE_IDENTITIES,
        "Current number of identities with a live connection"
    );
    metrics::describe_counter!(names::MESSAGES_ROUTED, "Messages persisted and delivered");
    metrics::describe_counter!(
        names::MESSAGES_DROPPED,
        "Messages rejected before persistence"
    );
    metrics::describe_counter!(names::PUSHES_TOTAL, "Successful live pushes");
    metrics::describe_counter!(names::EVICTIONS_TOTAL, "Connections closed by eviction");
    metrics::describe_histogram!(
        names::ROUTING_SECONDS,
        "Persist-then-push latency in seconds"
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

/// Update the online identity count.
pub fn set_online(count: usize) {
    gauge!(names::ONLINE_IDENTITIES).set(count as f64);
}

/// Record a routed message and its live pushes.
pub fn record_routed(kind: &'static str, pushes: usize, seconds: f64) {
    counter!(names::MESSAGES_ROUTED, "kind" => kind).increment(1);
    counter!(names::PUSHES_TOTAL).increment(pushes as u64);
    histogram!(names::ROUTING_SECONDS).record(seconds);
}

/// Record a message dropped before persistence.
pub fn record_dropped(reason: &'static str) {
    counter!(names::MESSAGES_DROPPED, "reason" => reason).increment(1);
}

/// Record an eviction.
pub fn record_eviction(reason: EvictReason) {
    let reason = match reason {
        EvictReason::Superseded => "superseded",
        EvictReason::LoggedOut => "logged_out",
    };
    counter!(names::EVICTIONS_TOTAL, "reason" => reason).increment(1);
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
