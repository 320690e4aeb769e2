use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::SinkExt;
use tokio::sync::mpsc;

use crate::connection_manager::{Connection, ConnectionId, ConnectionRegistry, RegistryError};
use crate::events::{LifecycleEvent, LifecycleEvents};
use crate::metrics::ConnectionMetrics;
use crate::overlay::Overlay;
use crate::websocket::{CLOSE_GOING_AWAY, CLOSE_INTERNAL_ERROR, GOING_AWAY_REASON, GREETING};

use super::gate::ListenerGate;
use super::session::BridgeSession;

/// Turns each accepted WebSocket into a registered, bridged session.
pub struct RelayAcceptor {
    registry: Arc<ConnectionRegistry>,
    events: Arc<LifecycleEvents>,
    overlay: Arc<dyn Overlay>,
    gate: Arc<ListenerGate>,
    next_seq: AtomicU64,
    overlay_buffer: usize,
}

impl RelayAcceptor {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        events: Arc<LifecycleEvents>,
        overlay: Arc<dyn Overlay>,
        gate: Arc<ListenerGate>,
        overlay_buffer: usize,
    ) -> Self {
        Self {
            registry,
            events,
            overlay,
            gate,
            next_seq: AtomicU64::new(1),
            overlay_buffer,
        }
    }

    pub fn is_accepting(&self) -> bool {
        self.gate.is_open()
    }

    fn next_id(&self, remote: SocketAddr) -> ConnectionId {
        ConnectionId::new(remote, self.next_seq.fetch_add(1, Ordering::Relaxed))
    }

    /// Bridge an accepted socket until it closes.
    #[tracing::instrument(
        name = "relay.connection",
        skip(self, socket),
        fields(remote = %remote)
    )]
    pub async fn on_accept(&self, socket: WebSocket, remote: SocketAddr) {
        let id = self.next_id(remote);
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let connection = Arc::new(Connection::new(id.clone(), control_tx));

        // Visible to the drainer before anything can be bridged
        if let Err(e) = self.registry.register(connection.clone()) {
            tracing::error!(connection_id = %id, error = %e, "Connection rejected");
            reject(socket, CLOSE_INTERNAL_ERROR, "Connection setup failed").await;
            return;
        }

        // An upgrade that raced the listener closing is turned away here
        if !self.gate.is_open() {
            let _ = self.registry.unregister(&id);
            tracing::debug!(connection_id = %id, "Listener closed during upgrade");
            reject(socket, CLOSE_GOING_AWAY, GOING_AWAY_REASON).await;
            return;
        }

        self.events
            .emit(LifecycleEvent::ConnectionOpen { id: id.clone() });

        let session = BridgeSession::attach(
            connection.clone(),
            socket,
            control_rx,
            self.overlay.as_ref(),
            self.overlay_buffer,
        );

        if connection.send_text(GREETING).is_err() {
            tracing::debug!(connection_id = %id, "Failed to queue greeting");
        }

        session.run(self.events.clone()).await;

        connection.mark_closed();
        match self.registry.unregister(&id) {
            Ok(_) | Err(RegistryError::NotFound(_)) => {}
            Err(e) => tracing::error!(connection_id = %id, error = %e, "Unexpected unregister failure"),
        }

        let duration = (chrono::Utc::now() - connection.connected_at)
            .to_std()
            .unwrap_or_default();
        ConnectionMetrics::observe_duration(duration.as_secs_f64());

        self.events.emit(LifecycleEvent::ConnectionClose { id });
    }
}

/// Close a socket that never got bridged.
async fn reject(mut socket: WebSocket, code: u16, reason: &str) {
    let frame = CloseFrame {
        code,
        reason: reason.to_string().into(),
    };
    let _ = socket.send(Message::Close(Some(frame))).await;
}
