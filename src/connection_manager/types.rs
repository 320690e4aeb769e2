//! Connection handle and related types

use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use thiserror::Error;
use tokio::sync::{mpsc, watch};

use crate::websocket::SocketCommand;

/// Identity of one bridged connection.
///
/// The accept sequence number keeps ids unique even when a remote
/// address/port pair is reused right after a close.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId {
    remote: SocketAddr,
    seq: u64,
}

impl ConnectionId {
    pub fn new(remote: SocketAddr, seq: u64) -> Self {
        Self { remote, seq }
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.remote, self.seq)
    }
}

impl Serialize for ConnectionId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Open,
    Closing,
    Closed,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Open,
            1 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("Duplicate connection id: {0}")]
    DuplicateId(ConnectionId),
    #[error("Connection not found: {0}")]
    NotFound(ConnectionId),
}

/// Handle for a single bridged connection.
///
/// The socket itself is owned by the session task; this handle only carries
/// the control channel into that task's writer.
#[derive(Debug)]
pub struct Connection {
    pub id: ConnectionId,
    pub connected_at: DateTime<Utc>,
    state: AtomicU8,
    control: mpsc::UnboundedSender<SocketCommand>,
    /// Hard stop for the session task, independent of the writer
    terminate_tx: watch::Sender<bool>,
}

impl Connection {
    pub fn new(id: ConnectionId, control: mpsc::UnboundedSender<SocketCommand>) -> Self {
        let (terminate_tx, _) = watch::channel(false);
        Self {
            id,
            connected_at: Utc::now(),
            state: AtomicU8::new(ConnectionState::Open as u8),
            control,
            terminate_tx,
        }
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Open -> Closing. Returns false if the connection already left `Open`.
    pub fn mark_closing(&self) -> bool {
        self.state
            .compare_exchange(
                ConnectionState::Open as u8,
                ConnectionState::Closing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Any -> Closed. Returns false if it was already closed.
    pub fn mark_closed(&self) -> bool {
        self.state.swap(ConnectionState::Closed as u8, Ordering::AcqRel)
            != ConnectionState::Closed as u8
    }

    /// Queue a text frame. Never waits on the socket.
    pub fn send_text(
        &self,
        text: impl Into<String>,
    ) -> Result<(), mpsc::error::SendError<SocketCommand>> {
        self.control.send(SocketCommand::Text(text.into()))
    }

    /// Queue a shutdown notice and move the connection to `Closing`.
    pub fn notify_shutdown(
        &self,
        notice: impl Into<String>,
    ) -> Result<(), mpsc::error::SendError<SocketCommand>> {
        self.mark_closing();
        self.send_text(notice)
    }

    /// Queue a close frame. Does not wait for the close handshake.
    pub fn close(
        &self,
        code: u16,
        reason: impl Into<String>,
    ) -> Result<(), mpsc::error::SendError<SocketCommand>> {
        self.mark_closing();
        self.control.send(SocketCommand::Close {
            code,
            reason: reason.into(),
        })
    }

    /// Tear the session down without waiting for the close handshake.
    ///
    /// Used when a queued close frame cannot be written, e.g. the peer
    /// stopped reading and the writer is blocked on a full socket.
    pub fn terminate(&self) {
        self.mark_closing();
        self.terminate_tx.send_replace(true);
    }

    /// Resolves once [`Connection::terminate`] has been called, including
    /// when it was called before this future was created.
    pub fn terminated(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut rx = self.terminate_tx.subscribe();
        async move {
            let _ = rx.wait_for(|terminated| *terminated).await;
        }
    }
}
