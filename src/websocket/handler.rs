use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, State, WebSocketUpgrade},
    response::Response,
};

use crate::error::{RelayError, Result};
use crate::server::AppState;

/// WebSocket upgrade handler for the relay endpoint
#[tracing::instrument(
    name = "ws.upgrade",
    skip(ws, state),
    fields(remote = %addr)
)]
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Result<Response> {
    if !state.relay.opened() {
        return Err(RelayError::NotOpen.into());
    }

    let acceptor = state.relay.acceptor().clone();
    if !acceptor.is_accepting() {
        return Err(RelayError::ShuttingDown.into());
    }

    tracing::debug!("WebSocket upgrade requested");
    Ok(ws.on_upgrade(move |socket| async move { acceptor.on_accept(socket, addr).await }))
}
