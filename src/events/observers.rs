use tokio::sync::mpsc;

use crate::metrics::{ConnectionMetrics, ShutdownMetrics};

use super::{LifecycleEvent, LifecycleObserver};

/// Writes lifecycle events to the `tracing` subscriber.
#[derive(Debug, Default)]
pub struct LoggingObserver;

impl LifecycleObserver for LoggingObserver {
    fn on_event(&self, event: &LifecycleEvent) {
        match event {
            LifecycleEvent::ConnectionOpen { id } => {
                tracing::info!(connection_id = %id, "Started relaying to {}", id);
            }
            LifecycleEvent::ConnectionClose { id } => {
                tracing::info!(connection_id = %id, "Stopped relaying to {}", id);
            }
            LifecycleEvent::ConnectionError { id, error } => {
                // Usually just a peer vanishing without a close frame
                tracing::warn!(connection_id = %id, error = %error, "Relay connection error");
            }
            LifecycleEvent::ClosingSignal {
                clients_at_start,
                margin_secs,
            } => {
                tracing::info!(
                    clients = clients_at_start,
                    margin_secs = margin_secs,
                    "Closing relay: signalled clients"
                );
            }
            LifecycleEvent::ClosingForce { remaining } => {
                tracing::warn!(
                    remaining_clients = remaining,
                    "Closing relay: force-closing remaining clients"
                );
            }
            LifecycleEvent::ClosingDone => {
                tracing::info!("Closing relay: all clients closed");
            }
        }
    }
}

/// Keeps the Prometheus collectors in step with the event stream.
#[derive(Debug, Default)]
pub struct MetricsObserver;

impl LifecycleObserver for MetricsObserver {
    fn on_event(&self, event: &LifecycleEvent) {
        match event {
            LifecycleEvent::ConnectionOpen { .. } => ConnectionMetrics::record_opened(),
            LifecycleEvent::ConnectionClose { .. } => ConnectionMetrics::record_closed(),
            LifecycleEvent::ConnectionError { .. } => ConnectionMetrics::record_error(),
            LifecycleEvent::ClosingSignal { .. } => ShutdownMetrics::record_signal(),
            LifecycleEvent::ClosingForce { remaining } => {
                ShutdownMetrics::record_forced(*remaining as u64)
            }
            LifecycleEvent::ClosingDone => {}
        }
    }
}

/// Forwards every event into an unbounded channel.
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<LifecycleEvent>,
}

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<LifecycleEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl LifecycleObserver for ChannelObserver {
    fn on_event(&self, event: &LifecycleEvent) {
        // Receiver gone means nobody is listening any more
        let _ = self.tx.send(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::events::LifecycleEvents;

    #[test]
    fn test_channel_observer_forwards_in_order() {
        let events = LifecycleEvents::new();
        let (observer, mut rx) = ChannelObserver::new();
        events.subscribe(Arc::new(observer));

        events.emit(LifecycleEvent::ClosingForce { remaining: 1 });
        events.emit(LifecycleEvent::ClosingDone);

        assert_eq!(
            rx.try_recv().unwrap(),
            LifecycleEvent::ClosingForce { remaining: 1 }
        );
        assert_eq!(rx.try_recv().unwrap(), LifecycleEvent::ClosingDone);
    }

    #[test]
    fn test_channel_observer_survives_dropped_receiver() {
        let (observer, rx) = ChannelObserver::new();
        drop(rx);
        observer.on_event(&LifecycleEvent::ClosingDone);
    }
}
