//! Accepting, bridging, and tearing down relayed connections.

mod acceptor;
mod gate;
mod service;
mod session;

pub use acceptor::RelayAcceptor;
pub use gate::{AcceptSource, ListenerGate};
pub use service::{Readiness, RelayService};
pub use session::BridgeSession;
