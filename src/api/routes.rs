use axum::{routing::get, Router};

use crate::server::AppState;

use super::health::{health, stats};
use super::metrics::prometheus_metrics;

pub fn api_routes() -> Router<AppState> {
    Router::new()
        // Health & Stats
        .route("/health", get(health))
        .route("/stats", get(stats))
        // Prometheus
        .route("/metrics", get(prometheus_metrics))
}
