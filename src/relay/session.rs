use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::connection_manager::Connection;
use crate::events::{LifecycleEvent, LifecycleEvents};
use crate::overlay::{Overlay, TransportStream};
use crate::websocket::SocketCommand;

/// One accepted WebSocket wired into one overlay session.
///
/// Owns the socket until [`BridgeSession::run`] returns, at which point the
/// socket has been released.
pub struct BridgeSession {
    connection: Arc<Connection>,
    socket: WebSocket,
    control_rx: mpsc::UnboundedReceiver<SocketCommand>,
    to_overlay: mpsc::Sender<Bytes>,
    from_overlay: mpsc::Receiver<Bytes>,
}

impl BridgeSession {
    /// Hand the transport to the overlay. This is the only call into the
    /// overlay for this connection.
    pub fn attach(
        connection: Arc<Connection>,
        socket: WebSocket,
        control_rx: mpsc::UnboundedReceiver<SocketCommand>,
        overlay: &dyn Overlay,
        buffer: usize,
    ) -> Self {
        let (to_overlay, inbound) = mpsc::channel(buffer);
        let (outbound, from_overlay) = mpsc::channel(buffer);

        overlay.bridge(TransportStream {
            id: connection.id.clone(),
            inbound,
            outbound,
        });

        Self {
            connection,
            socket,
            control_rx,
            to_overlay,
            from_overlay,
        }
    }

    /// Pump frames until the transport closes or the connection is
    /// terminated.
    ///
    /// Transport errors are reported as `connection-error` and end the
    /// session; they are never propagated.
    pub async fn run(self, events: Arc<LifecycleEvents>) {
        let Self {
            connection,
            socket,
            mut control_rx,
            to_overlay,
            mut from_overlay,
        } = self;
        let (mut ws_sender, mut ws_receiver) = socket.split();

        // Task for writing control frames and overlay traffic to the socket
        let send_events = events.clone();
        let send_conn = connection.clone();
        let mut send_task = tokio::spawn(async move {
            let mut overlay_open = true;
            loop {
                let message = tokio::select! {
                    // Control frames (greeting, notice, close) go out before relayed traffic
                    biased;

                    command = control_rx.recv() => match command {
                        Some(SocketCommand::Text(text)) => Message::Text(text.into()),
                        Some(SocketCommand::Close { code, reason }) => {
                            let frame = CloseFrame {
                                code,
                                reason: reason.into(),
                            };
                            if let Err(e) = ws_sender.send(Message::Close(Some(frame))).await {
                                send_events.emit(LifecycleEvent::ConnectionError {
                                    id: send_conn.id.clone(),
                                    error: e.to_string(),
                                });
                            }
                            break;
                        }
                        None => break,
                    },
                    frame = from_overlay.recv(), if overlay_open => match frame {
                        Some(frame) => Message::Binary(frame),
                        None => {
                            tracing::debug!(connection_id = %send_conn.id, "Overlay session detached");
                            overlay_open = false;
                            continue;
                        }
                    },
                };

                if let Err(e) = ws_sender.send(message).await {
                    send_events.emit(LifecycleEvent::ConnectionError {
                        id: send_conn.id.clone(),
                        error: e.to_string(),
                    });
                    break;
                }
            }
        });

        // Task for reading client frames into the overlay
        let recv_conn = connection.clone();
        let mut recv_task = tokio::spawn(async move {
            while let Some(result) = ws_receiver.next().await {
                let frame = match result {
                    Ok(Message::Binary(data)) => data,
                    Ok(Message::Text(text)) => Bytes::copy_from_slice(text.as_str().as_bytes()),
                    Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
                    Ok(Message::Close(_)) => {
                        // Peer half-closed; the stream ends once the handshake completes
                        recv_conn.mark_closing();
                        continue;
                    }
                    Err(e) => {
                        events.emit(LifecycleEvent::ConnectionError {
                            id: recv_conn.id.clone(),
                            error: e.to_string(),
                        });
                        break;
                    }
                };

                // A detached overlay session just drops the frame
                let _ = to_overlay.send(frame).await;
            }
        });

        // Whichever side finishes first ends the session
        let terminated = connection.terminated();
        tokio::select! {
            _ = &mut send_task => {
                tracing::debug!(connection_id = %connection.id, "Send task completed");
                recv_task.abort();
                let _ = recv_task.await;
            }
            _ = &mut recv_task => {
                tracing::debug!(connection_id = %connection.id, "Receive task completed");
                send_task.abort();
                let _ = send_task.await;
            }
            _ = terminated => {
                tracing::debug!(connection_id = %connection.id, "Session terminated");
                send_task.abort();
                recv_task.abort();
                // Both halves of the socket are dropped once these resolve
                let _ = send_task.await;
                let _ = recv_task.await;
            }
        }
    }
}
