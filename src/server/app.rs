use std::net::SocketAddr;

use axum::{middleware, routing::get, Router};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::api::api_routes;
use crate::websocket::ws_handler;

use super::middleware::track_http_metrics;
use super::AppState;

pub fn create_app(state: AppState) -> Router {
    Router::new()
        // Relay endpoint
        .route("/", get(ws_handler))
        // Health, stats and metrics
        .merge(api_routes())
        .route_layer(middleware::from_fn(track_http_metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the app until the relay's listener gate closes.
///
/// Upgraded sockets are not tracked here; the relay drains them on its own.
pub async fn run_server(listener: TcpListener, state: AppState) -> std::io::Result<()> {
    let stopped = state.relay.gate().stopped();
    let app = create_app(state);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(stopped)
    .await
}
