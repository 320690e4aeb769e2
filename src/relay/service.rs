use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::config::RelayConfig;
use crate::connection_manager::ConnectionRegistry;
use crate::error::RelayError;
use crate::events::LifecycleEvents;
use crate::overlay::Overlay;
use crate::shutdown::{DrainReport, ShutdownConfig, ShutdownDrainer};

use super::acceptor::RelayAcceptor;
use super::gate::ListenerGate;

/// Health as reported to readiness and liveness checks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Readiness {
    NotReady,
    Healthy,
    ShuttingDown,
}

/// The relay as a whole: overlay node, registry, acceptor and drainer.
pub struct RelayService {
    overlay: Arc<dyn Overlay>,
    registry: Arc<ConnectionRegistry>,
    events: Arc<LifecycleEvents>,
    gate: Arc<ListenerGate>,
    acceptor: Arc<RelayAcceptor>,
    drainer: ShutdownDrainer,
    opened: AtomicBool,
    closing: AtomicBool,
}

impl RelayService {
    pub fn new(config: &RelayConfig, overlay: Arc<dyn Overlay>, events: Arc<LifecycleEvents>) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let gate = Arc::new(ListenerGate::new(registry.clone()));
        let acceptor = Arc::new(RelayAcceptor::new(
            registry.clone(),
            events.clone(),
            overlay.clone(),
            gate.clone(),
            config.overlay_buffer,
        ));
        let drainer = ShutdownDrainer::new(
            registry.clone(),
            gate.clone(),
            events.clone(),
            ShutdownConfig::from(config),
        );

        Self {
            overlay,
            registry,
            events,
            gate,
            acceptor,
            drainer,
            opened: AtomicBool::new(false),
            closing: AtomicBool::new(false),
        }
    }

    /// Wait for the overlay node to become ready.
    pub async fn open(&self) -> Result<(), RelayError> {
        self.overlay.ready().await?;
        self.opened.store(true, Ordering::Release);
        tracing::info!("Relay opened");
        Ok(())
    }

    /// Drain every bridged connection, then destroy the overlay node.
    pub async fn close(&self) -> Result<DrainReport, RelayError> {
        self.closing.store(true, Ordering::Release);

        let report = self.drainer.drain().await?;

        if let Err(e) = self.overlay.destroy().await {
            tracing::error!(error = %e, "Failed to destroy overlay node");
        }

        tracing::info!(
            clients_at_start = report.clients_at_start,
            outcome = ?report.outcome,
            duration_ms = report.duration.as_millis() as u64,
            "Relay closed"
        );
        Ok(report)
    }

    pub fn opened(&self) -> bool {
        self.opened.load(Ordering::Acquire)
    }

    pub fn closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    pub fn readiness(&self) -> Readiness {
        if self.closing() {
            Readiness::ShuttingDown
        } else if self.opened() {
            Readiness::Healthy
        } else {
            Readiness::NotReady
        }
    }

    pub fn acceptor(&self) -> &Arc<RelayAcceptor> {
        &self.acceptor
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn events(&self) -> &Arc<LifecycleEvents> {
        &self.events
    }

    pub fn gate(&self) -> &Arc<ListenerGate> {
        &self.gate
    }

    pub fn drainer(&self) -> &ShutdownDrainer {
        &self.drainer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ChannelObserver, LifecycleEvent};
    use crate::overlay::LocalOverlay;
    use crate::shutdown::DrainOutcome;

    fn service() -> (RelayService, Arc<LocalOverlay>) {
        let overlay = Arc::new(LocalOverlay::new());
        let config = RelayConfig {
            shutdown_margin_secs: 1,
            ..RelayConfig::default()
        };
        let service = RelayService::new(&config, overlay.clone(), Arc::new(LifecycleEvents::new()));
        (service, overlay)
    }

    #[tokio::test]
    async fn test_readiness_follows_lifecycle() {
        let (service, overlay) = service();
        assert_eq!(service.readiness(), Readiness::NotReady);

        service.open().await.unwrap();
        assert!(service.opened());
        assert_eq!(service.readiness(), Readiness::Healthy);

        let report = service.close().await.unwrap();
        assert_eq!(report.outcome, DrainOutcome::NaturallyDrained);
        assert!(service.closing());
        assert_eq!(service.readiness(), Readiness::ShuttingDown);
        assert!(overlay.is_destroyed());
        assert!(!service.gate().is_open());
    }

    #[tokio::test]
    async fn test_close_twice_is_rejected() {
        let (service, _overlay) = service();
        let (observer, mut rx) = ChannelObserver::new();
        service.events().subscribe(Arc::new(observer));

        service.open().await.unwrap();
        service.close().await.unwrap();
        assert_eq!(service.close().await.unwrap_err(), RelayError::AlreadyDraining);

        let mut done = 0;
        while let Ok(event) = rx.try_recv() {
            if event == LifecycleEvent::ClosingDone {
                done += 1;
            }
        }
        assert_eq!(done, 1);
    }
}
