//! Bookkeeping for bridged connections.
//!
//! The registry is the single source of truth for how many clients are
//! currently bridged. It performs no I/O: sends and closes go through each
//! connection's control channel and are never issued while a map shard is
//! locked.

mod registry;
mod types;

pub use registry::ConnectionRegistry;
pub use types::{Connection, ConnectionId, ConnectionState, RegistryError};
