//! Frames the relay itself writes to a client socket.
//!
//! Everything else on the wire belongs to the overlay session. These text
//! frames are informational only and never parsed by the service.

/// Sent once, right after a connection is bridged
pub const GREETING: &str = "You are being relayed";

/// Reason attached to the close frame of a force-closed connection
pub const GOING_AWAY_REASON: &str = "Server is going offline";

/// Close code 1001: the endpoint is going away
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// Close code 1011: the server hit an unexpected condition
pub const CLOSE_INTERNAL_ERROR: u16 = 1011;

/// Commands queued for a socket's writer task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketCommand {
    Text(String),
    Close { code: u16, reason: String },
}

/// Notice sent to every client when a shutdown with a grace period begins
pub fn shutdown_notice(margin_secs: u64) -> String {
    format!("Server closing. Socket will shut down in {}s", margin_secs)
}
