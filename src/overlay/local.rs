use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Bytes;
use tokio::sync::broadcast;

use crate::connection_manager::ConnectionId;
use crate::error::RelayError;

use super::{Overlay, TransportStream};

const HUB_CAPACITY: usize = 1024;

/// In-process overlay hub: every frame a session sends is delivered to every
/// other bridged session.
pub struct LocalOverlay {
    hub: broadcast::Sender<(ConnectionId, Bytes)>,
    shutdown_tx: broadcast::Sender<()>,
    ready: AtomicBool,
    destroyed: AtomicBool,
    sessions: Arc<AtomicUsize>,
}

impl LocalOverlay {
    pub fn new() -> Self {
        let (hub, _) = broadcast::channel(HUB_CAPACITY);
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            hub,
            shutdown_tx,
            ready: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
            sessions: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of sessions currently attached
    pub fn session_count(&self) -> usize {
        self.sessions.load(Ordering::Acquire)
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }
}

impl Default for LocalOverlay {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Overlay for LocalOverlay {
    async fn ready(&self) -> Result<(), RelayError> {
        if self.is_destroyed() {
            return Err(RelayError::Overlay("overlay already destroyed".to_string()));
        }
        self.ready.store(true, Ordering::Release);
        tracing::info!("Local overlay ready");
        Ok(())
    }

    fn bridge(&self, stream: TransportStream) {
        if self.is_destroyed() || !self.ready.load(Ordering::Acquire) {
            tracing::warn!(connection_id = %stream.id, "Overlay not available, dropping session");
            return;
        }

        let TransportStream {
            id,
            mut inbound,
            outbound,
        } = stream;
        let hub = self.hub.clone();
        let mut peers = self.hub.subscribe();
        let mut shutdown = self.shutdown_tx.subscribe();
        let sessions = self.sessions.clone();
        sessions.fetch_add(1, Ordering::AcqRel);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    frame = inbound.recv() => match frame {
                        Some(frame) => {
                            // No receivers simply means no other peers yet
                            let _ = hub.send((id.clone(), frame));
                        }
                        None => break,
                    },
                    delivered = peers.recv() => match delivered {
                        Ok((from, frame)) if from != id => {
                            if outbound.send(frame).await.is_err() {
                                break;
                            }
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(connection_id = %id, skipped, "Overlay session lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }

            sessions.fetch_sub(1, Ordering::AcqRel);
            tracing::debug!(connection_id = %id, "Overlay session ended");
        });
    }

    async fn destroy(&self) -> Result<(), RelayError> {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let _ = self.shutdown_tx.send(());
        tracing::info!("Local overlay destroyed");
        Ok(())
    }
}
