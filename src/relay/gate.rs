use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use tokio::sync::watch;

use crate::connection_manager::ConnectionRegistry;
use crate::error::RelayError;

/// Source of accepted transport connections, as seen by the drainer.
pub trait AcceptSource: Send + Sync {
    /// Stop admitting new connections.
    ///
    /// Admission stops as soon as this is called. The returned future resolves
    /// once every connection accepted so far has finished closing.
    fn close(&self) -> BoxFuture<'static, Result<(), RelayError>>;
}

/// Admission gate in front of the WebSocket upgrade route.
///
/// Closing the gate refuses further upgrades, stops the HTTP listener via
/// [`ListenerGate::stopped`], and yields a future tied to the registry
/// draining to zero.
pub struct ListenerGate {
    registry: Arc<ConnectionRegistry>,
    open: AtomicBool,
    stop_tx: watch::Sender<bool>,
}

impl ListenerGate {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            registry,
            open: AtomicBool::new(true),
            stop_tx,
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Resolves once the gate is closed. Suitable for
    /// `axum::serve(..).with_graceful_shutdown(..)`.
    pub fn stopped(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut rx = self.stop_tx.subscribe();
        async move {
            let _ = rx.wait_for(|stopped| *stopped).await;
        }
    }
}

impl AcceptSource for ListenerGate {
    fn close(&self) -> BoxFuture<'static, Result<(), RelayError>> {
        if self.open.swap(false, Ordering::SeqCst) {
            tracing::info!("Listener closed, no longer admitting connections");
        }
        self.stop_tx.send_replace(true);

        let registry = self.registry.clone();
        async move {
            registry.wait_empty().await;
            Ok(())
        }
        .boxed()
    }
}
