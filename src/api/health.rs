//! Health check and statistics endpoints.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::relay::Readiness;
use crate::server::AppState;
use crate::shutdown::DrainPhase;

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub status: Readiness,
    pub version: String,
    pub uptime_seconds: u64,
    pub connections: ConnectionStats,
    pub shutdown: ShutdownStats,
}

#[derive(Debug, Serialize)]
pub struct ConnectionStats {
    pub active: usize,
    pub accepting: bool,
}

#[derive(Debug, Serialize)]
pub struct ShutdownStats {
    pub phase: DrainPhase,
    pub margin_seconds: u64,
}

/// GET /health - plain-text readiness: `Healthy`, `Not ready` or `Shutting down`
pub async fn health(State(state): State<AppState>) -> Response {
    match state.relay.readiness() {
        Readiness::Healthy => (StatusCode::OK, "Healthy").into_response(),
        Readiness::NotReady => (StatusCode::SERVICE_UNAVAILABLE, "Not ready").into_response(),
        Readiness::ShuttingDown => {
            (StatusCode::SERVICE_UNAVAILABLE, "Shutting down").into_response()
        }
    }
}

pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    let relay = &state.relay;

    Json(StatsResponse {
        status: relay.readiness(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        connections: ConnectionStats {
            active: relay.registry().size(),
            accepting: relay.acceptor().is_accepting(),
        },
        shutdown: ShutdownStats {
            phase: relay.drainer().phase(),
            margin_seconds: relay.drainer().margin().as_secs(),
        },
    })
}
