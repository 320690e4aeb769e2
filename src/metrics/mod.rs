//! Prometheus metrics for the relay.
//!
//! - Connection metrics (active, opened, closed, errors, duration)
//! - Shutdown metrics (drains started, forced closes, drain duration)
//! - HTTP metrics (request duration by method, route and status)

mod helpers;

pub use helpers::{encode_metrics, ConnectionMetrics, HttpMetrics, ShutdownMetrics};

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_histogram_vec, register_int_counter, register_int_gauge,
    Histogram, HistogramVec, IntCounter, IntGauge,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "relay";

lazy_static! {
    // ============================================================================
    // Connection Metrics
    // ============================================================================

    /// Number of currently bridged connections
    pub static ref CONNECTIONS_ACTIVE: IntGauge = register_int_gauge!(
        format!("{}_connections_active", METRIC_PREFIX),
        "Number of currently bridged connections"
    ).unwrap();

    pub static ref CONNECTIONS_OPENED: IntCounter = register_int_counter!(
        format!("{}_connections_opened_total", METRIC_PREFIX),
        "Total connections bridged into the overlay"
    ).unwrap();

    pub static ref CONNECTIONS_CLOSED: IntCounter = register_int_counter!(
        format!("{}_connections_closed_total", METRIC_PREFIX),
        "Total bridged connections closed"
    ).unwrap();

    /// Transport errors; most are peers disappearing without a close frame
    pub static ref CONNECTION_ERRORS: IntCounter = register_int_counter!(
        format!("{}_connection_errors_total", METRIC_PREFIX),
        "Total transport errors on bridged connections"
    ).unwrap();

    pub static ref CONNECTION_DURATION: Histogram = register_histogram!(
        format!("{}_connection_duration_seconds", METRIC_PREFIX),
        "Bridged connection duration in seconds",
        vec![1.0, 5.0, 10.0, 30.0, 60.0, 300.0, 600.0, 1800.0, 3600.0]
    ).unwrap();

    // ============================================================================
    // Shutdown Metrics
    // ============================================================================

    pub static ref SHUTDOWN_SIGNALS: IntCounter = register_int_counter!(
        format!("{}_shutdown_signals_total", METRIC_PREFIX),
        "Total shutdown drains started"
    ).unwrap();

    /// Clients still connected when the grace period ran out
    pub static ref SHUTDOWN_FORCED_CLOSES: IntCounter = register_int_counter!(
        format!("{}_shutdown_forced_closes_total", METRIC_PREFIX),
        "Total connections force-closed during shutdown"
    ).unwrap();

    pub static ref SHUTDOWN_DRAIN_DURATION: Histogram = register_histogram!(
        format!("{}_shutdown_drain_seconds", METRIC_PREFIX),
        "Time from shutdown signal to drain completion in seconds",
        vec![0.01, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]
    ).unwrap();

    // ============================================================================
    // HTTP Metrics
    // ============================================================================

    /// Request duration; health and scrape routes are not recorded
    pub static ref HTTP_REQUEST_DURATION: HistogramVec = register_histogram_vec!(
        format!("{}_http_request_duration_seconds", METRIC_PREFIX),
        "HTTP request duration in seconds",
        &["method", "route", "status_code"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    ).unwrap();
}
