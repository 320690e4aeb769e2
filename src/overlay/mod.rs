//! Seam to the overlay network.
//!
//! The relay never inspects overlay traffic: each accepted socket is turned
//! into a [`TransportStream`] and handed to [`Overlay::bridge`] exactly once.

mod local;

pub use local::LocalOverlay;

use async_trait::async_trait;
use axum::body::Bytes;
use tokio::sync::mpsc;

use crate::connection_manager::ConnectionId;
use crate::error::RelayError;

/// Byte-frame duplex handed to the overlay for one bridged connection.
pub struct TransportStream {
    pub id: ConnectionId,
    /// Frames received from the client
    pub inbound: mpsc::Receiver<Bytes>,
    /// Frames to write to the client
    pub outbound: mpsc::Sender<Bytes>,
}

/// Overlay-network node that relayed sessions attach to.
#[async_trait]
pub trait Overlay: Send + Sync + 'static {
    /// Resolves once the node can accept sessions
    async fn ready(&self) -> Result<(), RelayError>;

    /// Take ownership of a client transport and start relaying it.
    fn bridge(&self, stream: TransportStream);

    /// Tear the node down. Called after every bridged connection is closed.
    async fn destroy(&self) -> Result<(), RelayError>;
}
