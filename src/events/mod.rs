//! Lifecycle event stream.
//!
//! Every connection transition and every shutdown phase is published here
//! exactly once. Subscribers are injected at construction time; there is no
//! global emitter.

mod observers;

pub use observers::{ChannelObserver, LoggingObserver, MetricsObserver};

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock};

use serde::Serialize;

use crate::connection_manager::ConnectionId;

/// Lifecycle events emitted by the acceptor and the shutdown drainer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum LifecycleEvent {
    ConnectionOpen {
        id: ConnectionId,
    },
    ConnectionClose {
        id: ConnectionId,
    },
    ConnectionError {
        id: ConnectionId,
        error: String,
    },
    ClosingSignal {
        clients_at_start: usize,
        margin_secs: u64,
    },
    ClosingForce {
        remaining: usize,
    },
    ClosingDone,
}

impl LifecycleEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ConnectionOpen { .. } => "connection-open",
            Self::ConnectionClose { .. } => "connection-close",
            Self::ConnectionError { .. } => "connection-error",
            Self::ClosingSignal { .. } => "closing-signal",
            Self::ClosingForce { .. } => "closing-force",
            Self::ClosingDone => "closing-done",
        }
    }
}

/// Receives lifecycle events. Called synchronously on the emitting task, so
/// implementations must not block.
pub trait LifecycleObserver: Send + Sync {
    fn on_event(&self, event: &LifecycleEvent);
}

/// Multi-subscriber, synchronous-dispatch notification channel.
#[derive(Default)]
pub struct LifecycleEvents {
    observers: RwLock<Vec<Arc<dyn LifecycleObserver>>>,
}

impl LifecycleEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, observer: Arc<dyn LifecycleObserver>) {
        self.observers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(observer);
    }

    /// Deliver `event` to every subscriber.
    ///
    /// A panicking subscriber is logged and skipped; the remaining subscribers
    /// still receive the event and the caller carries on.
    pub fn emit(&self, event: LifecycleEvent) {
        let observers = self
            .observers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();

        for observer in observers {
            if catch_unwind(AssertUnwindSafe(|| observer.on_event(&event))).is_err() {
                tracing::error!(event = event.name(), "Lifecycle observer panicked");
            }
        }
    }
}
