//! Metrics helper structs for convenient metric recording

use prometheus::{Encoder, TextEncoder};

use super::{
    CONNECTIONS_ACTIVE, CONNECTIONS_CLOSED, CONNECTIONS_OPENED, CONNECTION_DURATION,
    CONNECTION_ERRORS, HTTP_REQUEST_DURATION, SHUTDOWN_DRAIN_DURATION, SHUTDOWN_FORCED_CLOSES,
    SHUTDOWN_SIGNALS,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Helper struct for recording connection metrics
pub struct ConnectionMetrics;

impl ConnectionMetrics {
    pub fn record_opened() {
        CONNECTIONS_OPENED.inc();
    }

    pub fn record_closed() {
        CONNECTIONS_CLOSED.inc();
    }

    pub fn record_error() {
        CONNECTION_ERRORS.inc();
    }

    /// Record how long a connection stayed bridged
    pub fn observe_duration(seconds: f64) {
        CONNECTION_DURATION.observe(seconds);
    }

    /// Refresh the active gauge from the registry size
    pub fn set_active(count: usize) {
        CONNECTIONS_ACTIVE.set(count as i64);
    }
}

/// Helper struct for recording shutdown metrics
pub struct ShutdownMetrics;

impl ShutdownMetrics {
    pub fn record_signal() {
        SHUTDOWN_SIGNALS.inc();
    }

    pub fn record_forced(count: u64) {
        SHUTDOWN_FORCED_CLOSES.inc_by(count);
    }

    pub fn observe_drain(seconds: f64) {
        SHUTDOWN_DRAIN_DURATION.observe(seconds);
    }
}

/// Helper struct for recording HTTP request metrics
pub struct HttpMetrics;

impl HttpMetrics {
    pub fn observe_request(method: &str, route: &str, status: u16, seconds: f64) {
        let status = status.to_string();
        HTTP_REQUEST_DURATION
            .with_label_values(&[method, route, status.as_str()])
            .observe(seconds);
    }
}
