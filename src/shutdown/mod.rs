//! Graceful shutdown of the relay.
//!
//! A drain runs once per process:
//! 1. Signal: snapshot the client count, emit `closing-signal`, and stop the
//!    listener
//! 2. Send every client a shutdown notice when a grace period is configured
//! 3. Race the grace period against every connection closing on its own
//! 4. Force-close whatever is left with close code 1001
//! 5. Wait for the listener to release its sockets, terminating sessions that
//!    miss `close_timeout` and giving up after `drain_timeout`, then emit
//!    `closing-done`

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::FutureExt;
use serde::Serialize;
use tokio::time::timeout;

use crate::config::RelayConfig;
use crate::connection_manager::ConnectionRegistry;
use crate::error::RelayError;
use crate::events::{LifecycleEvent, LifecycleEvents};
use crate::metrics::ShutdownMetrics;
use crate::relay::AcceptSource;
use crate::websocket::{shutdown_notice, CLOSE_GOING_AWAY, GOING_AWAY_REASON};

/// Configuration for graceful shutdown behavior
#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// Grace period before remaining clients are force-closed (default: 5 seconds)
    pub margin: Duration,
    /// Time force-closed sockets get to complete the close handshake before
    /// their sessions are terminated (default: 2 seconds)
    pub close_timeout: Duration,
    /// Time to wait for the listener to release every socket (default: 10 seconds)
    pub drain_timeout: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            margin: Duration::from_secs(5),
            close_timeout: Duration::from_secs(2),
            drain_timeout: Duration::from_secs(10),
        }
    }
}

impl From<&RelayConfig> for ShutdownConfig {
    fn from(config: &RelayConfig) -> Self {
        Self {
            margin: config.shutdown_margin(),
            close_timeout: config.close_timeout(),
            drain_timeout: config.drain_timeout(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DrainPhase {
    Idle,
    Signaling,
    Draining,
    NaturallyDrained,
    ForceClosed,
    Done,
}

/// State of one in-flight drain.
#[derive(Debug, Clone)]
pub struct ShutdownDrain {
    pub margin: Duration,
    pub started_at: DateTime<Utc>,
    /// Snapshot taken at signal time; later disconnects do not change it
    pub clients_at_start: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    NaturallyDrained,
    ForceClosed { remaining: usize },
}

/// Result of a completed drain
#[derive(Debug, Clone)]
pub struct DrainReport {
    pub outcome: DrainOutcome,
    pub clients_at_start: usize,
    /// Clients whose shutdown notice was queued
    pub clients_notified: usize,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    /// Set when the listener failed to close cleanly
    pub listener_error: Option<RelayError>,
}

/// Coordinates the shutdown drain. Allows exactly one drain per instance.
pub struct ShutdownDrainer {
    registry: Arc<ConnectionRegistry>,
    listener: Arc<dyn AcceptSource>,
    events: Arc<LifecycleEvents>,
    config: ShutdownConfig,
    phase: Mutex<DrainPhase>,
}

impl ShutdownDrainer {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        listener: Arc<dyn AcceptSource>,
        events: Arc<LifecycleEvents>,
        config: ShutdownConfig,
    ) -> Self {
        Self {
            registry,
            listener,
            events,
            config,
            phase: Mutex::new(DrainPhase::Idle),
        }
    }

    pub fn phase(&self) -> DrainPhase {
        *self.phase.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn margin(&self) -> Duration {
        self.config.margin
    }

    /// Execute the drain.
    ///
    /// Returns `AlreadyDraining` if a drain was started before on this
    /// instance, whether or not it has finished.
    #[tracing::instrument(
        name = "relay.drain",
        skip(self),
        fields(margin_secs = self.config.margin.as_secs())
    )]
    pub async fn drain(&self) -> Result<DrainReport, RelayError> {
        self.begin()?;

        let start = Instant::now();
        let drain = ShutdownDrain {
            margin: self.config.margin,
            started_at: Utc::now(),
            clients_at_start: self.registry.size(),
        };

        // Phase 1: Signal and stop admitting. Everything registered from here
        // on is notified below.
        self.events.emit(LifecycleEvent::ClosingSignal {
            clients_at_start: drain.clients_at_start,
            margin_secs: drain.margin.as_secs(),
        });
        let closed = self.listener.close().shared();
        let mut listener_error = None;

        // Phase 2: Notify
        let clients_notified = if !drain.margin.is_zero() && !self.registry.is_empty() {
            self.notify_clients(&drain)
        } else {
            0
        };
        self.set_phase(DrainPhase::Draining);

        // Phase 3: Race the grace period against a natural drain
        if !drain.margin.is_zero() {
            tokio::select! {
                result = closed.clone() => {
                    if let Err(e) = result {
                        tracing::warn!(error = %e, "Listener close failed while draining");
                        listener_error = Some(e);
                    }
                }
                _ = tokio::time::sleep(drain.margin) => {
                    tracing::debug!("Shutdown margin elapsed");
                }
            }
        }

        // Phase 4: Resolve
        let remaining = self.registry.size();
        let outcome = if remaining == 0 {
            self.set_phase(DrainPhase::NaturallyDrained);
            DrainOutcome::NaturallyDrained
        } else {
            self.set_phase(DrainPhase::ForceClosed);
            self.events.emit(LifecycleEvent::ClosingForce { remaining });
            self.force_close();
            DrainOutcome::ForceClosed { remaining }
        };

        // Phase 5: Let the listener release everything. Sockets that cannot
        // finish the close handshake in time are torn down.
        let released = match timeout(self.config.close_timeout, closed.clone()).await {
            Ok(result) => result,
            Err(_) => {
                let terminated = self.terminate_remaining();
                tracing::warn!(
                    terminated = terminated,
                    timeout_ms = self.config.close_timeout.as_millis() as u64,
                    "Close handshake timed out, terminating sessions"
                );
                match timeout(self.config.drain_timeout, closed).await {
                    Ok(result) => result,
                    Err(_) => Err(RelayError::DrainTimeout(self.registry.size())),
                }
            }
        };
        if let Err(e) = released {
            if listener_error.is_none() {
                tracing::warn!(error = %e, "Listener did not release every socket");
                listener_error = Some(e);
            }
        }

        self.set_phase(DrainPhase::Done);
        self.events.emit(LifecycleEvent::ClosingDone);

        let duration = start.elapsed();
        ShutdownMetrics::observe_drain(duration.as_secs_f64());

        Ok(DrainReport {
            outcome,
            clients_at_start: drain.clients_at_start,
            clients_notified,
            started_at: drain.started_at,
            duration,
            listener_error,
        })
    }

    fn begin(&self) -> Result<(), RelayError> {
        let mut phase = self.phase.lock().unwrap_or_else(|e| e.into_inner());
        if *phase != DrainPhase::Idle {
            return Err(RelayError::AlreadyDraining);
        }
        *phase = DrainPhase::Signaling;
        Ok(())
    }

    fn set_phase(&self, next: DrainPhase) {
        *self.phase.lock().unwrap_or_else(|e| e.into_inner()) = next;
    }

    /// Queue the notice on every socket; nothing here waits on I/O.
    fn notify_clients(&self, drain: &ShutdownDrain) -> usize {
        let notice = shutdown_notice(drain.margin.as_secs());
        let mut notified = 0;

        self.registry.for_each(|conn| match conn.notify_shutdown(notice.clone()) {
            Ok(()) => notified += 1,
            Err(_) => {
                tracing::debug!(
                    connection_id = %conn.id,
                    "Failed to queue shutdown notice, socket already gone"
                );
            }
        });

        tracing::info!(
            notified = notified,
            total = drain.clients_at_start,
            "Shutdown notices sent"
        );
        notified
    }

    /// Hard-stop every remaining session. Returns how many were signalled.
    fn terminate_remaining(&self) -> usize {
        let mut terminated = 0;
        self.registry.for_each(|conn| {
            conn.terminate();
            terminated += 1;
        });
        terminated
    }

    fn force_close(&self) {
        self.registry.for_each(|conn| {
            if conn.close(CLOSE_GOING_AWAY, GOING_AWAY_REASON).is_err() {
                tracing::debug!(connection_id = %conn.id, "Socket already gone before force close");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use futures::future::BoxFuture;
    use tokio::sync::mpsc;

    use super::*;
    use crate::connection_manager::{Connection, ConnectionId, ConnectionState};
    use crate::events::ChannelObserver;
    use crate::relay::ListenerGate;
    use crate::websocket::SocketCommand;

    struct Harness {
        registry: Arc<ConnectionRegistry>,
        drainer: Arc<ShutdownDrainer>,
        events: mpsc::UnboundedReceiver<LifecycleEvent>,
    }

    fn harness(margin: Duration) -> Harness {
        let registry = Arc::new(ConnectionRegistry::new());
        let gate = Arc::new(ListenerGate::new(registry.clone()));
        harness_with_listener(registry, gate, margin)
    }

    fn harness_with_listener(
        registry: Arc<ConnectionRegistry>,
        listener: Arc<dyn AcceptSource>,
        margin: Duration,
    ) -> Harness {
        let events = Arc::new(LifecycleEvents::new());
        let (observer, rx) = ChannelObserver::new();
        events.subscribe(Arc::new(observer));
        let drainer = Arc::new(ShutdownDrainer::new(
            registry.clone(),
            listener,
            events,
            ShutdownConfig {
                margin,
                close_timeout: Duration::from_millis(200),
                drain_timeout: Duration::from_millis(500),
            },
        ));
        Harness {
            registry,
            drainer,
            events: rx,
        }
    }

    /// How a [`FakeClient`] reacts to being closed
    #[derive(Clone, Copy, PartialEq)]
    enum Peer {
        /// Completes the close handshake as soon as a close frame arrives
        Cooperative,
        /// Never gets the close frame out (peer stopped reading); only a
        /// terminated session goes away
        Stalled,
        /// Never goes away at all
        Stuck,
    }

    /// In-memory client that records what it was sent and unregisters its
    /// connection according to its [`Peer`] behavior.
    struct FakeClient {
        conn: Arc<Connection>,
        received: Arc<StdMutex<Vec<SocketCommand>>>,
    }

    impl FakeClient {
        fn connect(registry: &Arc<ConnectionRegistry>, port: u16) -> Self {
            Self::connect_as(registry, port, Peer::Cooperative)
        }

        fn connect_as(registry: &Arc<ConnectionRegistry>, port: u16, peer: Peer) -> Self {
            let (tx, mut rx) = mpsc::unbounded_channel();
            let id = ConnectionId::new(format!("127.0.0.1:{}", port).parse().unwrap(), port as u64);
            let conn = Arc::new(Connection::new(id, tx));
            registry.register(conn.clone()).unwrap();

            let received = Arc::new(StdMutex::new(Vec::new()));
            let log = received.clone();
            let registry = registry.clone();
            let task_conn = conn.clone();
            tokio::spawn(async move {
                let terminated = task_conn.terminated();
                tokio::pin!(terminated);
                loop {
                    tokio::select! {
                        command = rx.recv() => {
                            let Some(command) = command else { break };
                            let is_close = matches!(command, SocketCommand::Close { .. });
                            log.lock().unwrap().push(command);
                            if is_close && peer == Peer::Cooperative {
                                break;
                            }
                        }
                        _ = &mut terminated, if peer == Peer::Stalled => break,
                    }
                }
                if peer == Peer::Stuck {
                    std::future::pending::<()>().await;
                }
                task_conn.mark_closed();
                let _ = registry.unregister(&task_conn.id);
            });

            Self { conn, received }
        }

        fn received(&self) -> Vec<SocketCommand> {
            self.received.lock().unwrap().clone()
        }
    }

    fn collect(rx: &mut mpsc::UnboundedReceiver<LifecycleEvent>) -> Vec<LifecycleEvent> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    /// Listener whose close future fails immediately
    struct FailingListener;

    impl AcceptSource for FailingListener {
        fn close(&self) -> BoxFuture<'static, Result<(), RelayError>> {
            async { Err(RelayError::ListenerClose("socket reset".to_string())) }.boxed()
        }
    }

    #[tokio::test]
    async fn test_drain_with_no_connections() {
        let mut h = harness(Duration::from_secs(3));

        let start = Instant::now();
        let report = h.drainer.drain().await.unwrap();

        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(report.outcome, DrainOutcome::NaturallyDrained);
        assert_eq!(report.clients_notified, 0);
        assert_eq!(
            collect(&mut h.events),
            vec![
                LifecycleEvent::ClosingSignal {
                    clients_at_start: 0,
                    margin_secs: 3
                },
                LifecycleEvent::ClosingDone,
            ]
        );
        assert_eq!(h.drainer.phase(), DrainPhase::Done);
    }

    #[tokio::test]
    async fn test_all_clients_leave_before_margin() {
        let mut h = harness(Duration::from_secs(1));
        let a = FakeClient::connect(&h.registry, 5001);
        let b = FakeClient::connect(&h.registry, 5002);

        let registry = h.registry.clone();
        let (a_conn, b_conn) = (a.conn.clone(), b.conn.clone());
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            a_conn.mark_closed();
            let _ = registry.unregister(&a_conn.id);
            tokio::time::sleep(Duration::from_millis(100)).await;
            b_conn.mark_closed();
            let _ = registry.unregister(&b_conn.id);
        });

        let start = Instant::now();
        let report = h.drainer.drain().await.unwrap();
        let elapsed = start.elapsed();

        assert!(elapsed < Duration::from_secs(1), "drain took {:?}", elapsed);
        assert_eq!(report.outcome, DrainOutcome::NaturallyDrained);
        assert_eq!(report.clients_at_start, 2);
        assert_eq!(report.clients_notified, 2);

        let events = collect(&mut h.events);
        assert_eq!(
            events,
            vec![
                LifecycleEvent::ClosingSignal {
                    clients_at_start: 2,
                    margin_secs: 1
                },
                LifecycleEvent::ClosingDone,
            ]
        );

        for client in [&a, &b] {
            assert_eq!(
                client.received(),
                vec![SocketCommand::Text(shutdown_notice(1))]
            );
        }
    }

    #[tokio::test]
    async fn test_straggler_is_force_closed_after_margin() {
        let mut h = harness(Duration::from_secs(1));
        let leaver = FakeClient::connect(&h.registry, 5001);
        let stayer = FakeClient::connect(&h.registry, 5002);

        let registry = h.registry.clone();
        let leaver_conn = leaver.conn.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            leaver_conn.mark_closed();
            let _ = registry.unregister(&leaver_conn.id);
        });

        let start = Instant::now();
        let report = h.drainer.drain().await.unwrap();
        let elapsed = start.elapsed();

        assert!(elapsed >= Duration::from_millis(950), "drain took {:?}", elapsed);
        assert_eq!(report.outcome, DrainOutcome::ForceClosed { remaining: 1 });
        assert_eq!(
            collect(&mut h.events),
            vec![
                LifecycleEvent::ClosingSignal {
                    clients_at_start: 2,
                    margin_secs: 1
                },
                LifecycleEvent::ClosingForce { remaining: 1 },
                LifecycleEvent::ClosingDone,
            ]
        );

        assert_eq!(
            stayer.received(),
            vec![
                SocketCommand::Text(shutdown_notice(1)),
                SocketCommand::Close {
                    code: CLOSE_GOING_AWAY,
                    reason: GOING_AWAY_REASON.to_string()
                },
            ]
        );
        assert_eq!(leaver.received(), vec![SocketCommand::Text(shutdown_notice(1))]);
        assert!(h.registry.is_empty());
    }

    #[tokio::test]
    async fn test_zero_margin_force_closes_without_notice() {
        let mut h = harness(Duration::ZERO);
        let clients: Vec<_> = (0..3)
            .map(|i| FakeClient::connect(&h.registry, 6000 + i))
            .collect();

        let start = Instant::now();
        let report = h.drainer.drain().await.unwrap();

        assert!(start.elapsed() < Duration::from_millis(500));
        assert_eq!(report.outcome, DrainOutcome::ForceClosed { remaining: 3 });
        assert_eq!(report.clients_notified, 0);

        for client in &clients {
            assert_eq!(
                client.received(),
                vec![SocketCommand::Close {
                    code: CLOSE_GOING_AWAY,
                    reason: GOING_AWAY_REASON.to_string()
                }]
            );
        }

        let events = collect(&mut h.events);
        assert_eq!(events.len(), 3);
        assert_eq!(events[1], LifecycleEvent::ClosingForce { remaining: 3 });
        assert_eq!(events[2], LifecycleEvent::ClosingDone);
    }

    #[tokio::test]
    async fn test_snapshot_counts_client_leaving_during_notify() {
        let mut h = harness(Duration::from_secs(1));
        let gone = FakeClient::connect(&h.registry, 5001);
        let _stays = FakeClient::connect(&h.registry, 5002);

        // Socket already torn down but not yet unregistered
        gone.conn.mark_closed();
        let registry = h.registry.clone();
        let gone_conn = gone.conn.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let _ = registry.unregister(&gone_conn.id);
        });

        let report = h.drainer.drain().await.unwrap();
        assert_eq!(report.clients_at_start, 2);
        assert_eq!(report.outcome, DrainOutcome::ForceClosed { remaining: 1 });
        assert_eq!(
            collect(&mut h.events)[0],
            LifecycleEvent::ClosingSignal {
                clients_at_start: 2,
                margin_secs: 1
            }
        );
    }

    #[tokio::test]
    async fn test_second_drain_is_rejected() {
        let h = harness(Duration::from_secs(1));
        let _stayer = FakeClient::connect(&h.registry, 5001);

        let drainer = h.drainer.clone();
        let first = tokio::spawn(async move { drainer.drain().await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.drainer.phase(), DrainPhase::Draining);
        assert_eq!(
            h.drainer.drain().await.unwrap_err(),
            RelayError::AlreadyDraining
        );

        first.await.unwrap().unwrap();
        assert_eq!(
            h.drainer.drain().await.unwrap_err(),
            RelayError::AlreadyDraining
        );
    }

    #[tokio::test]
    async fn test_listener_failure_still_completes() {
        let registry = Arc::new(ConnectionRegistry::new());
        let mut h = harness_with_listener(
            registry.clone(),
            Arc::new(FailingListener),
            Duration::from_secs(5),
        );
        let stayer = FakeClient::connect(&registry, 5001);

        let start = Instant::now();
        let report = h.drainer.drain().await.unwrap();

        // The failed close wins the race immediately
        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(matches!(
            report.listener_error,
            Some(RelayError::ListenerClose(_))
        ));
        assert_eq!(report.outcome, DrainOutcome::ForceClosed { remaining: 1 });

        let events = collect(&mut h.events);
        assert_eq!(events.last(), Some(&LifecycleEvent::ClosingDone));
        assert!(events.contains(&LifecycleEvent::ClosingForce { remaining: 1 }));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(matches!(
            stayer.received().last(),
            Some(SocketCommand::Close { code: CLOSE_GOING_AWAY, .. })
        ));
    }

    #[tokio::test]
    async fn test_stalled_client_is_terminated_after_close_timeout() {
        let mut h = harness(Duration::from_millis(100));
        let stalled = FakeClient::connect_as(&h.registry, 5001, Peer::Stalled);

        let start = Instant::now();
        let report = tokio::time::timeout(Duration::from_secs(2), h.drainer.drain())
            .await
            .expect("drain must not hang on a stalled client")
            .unwrap();
        let elapsed = start.elapsed();

        // margin + close_timeout, well short of drain_timeout
        assert!(elapsed >= Duration::from_millis(300), "drain took {:?}", elapsed);
        assert!(elapsed < Duration::from_millis(800), "drain took {:?}", elapsed);
        assert_eq!(report.outcome, DrainOutcome::ForceClosed { remaining: 1 });
        assert!(report.listener_error.is_none());
        assert!(h.registry.is_empty());
        assert_eq!(stalled.conn.state(), ConnectionState::Closed);

        let events = collect(&mut h.events);
        assert_eq!(events.last(), Some(&LifecycleEvent::ClosingDone));
        assert_eq!(
            events
                .iter()
                .filter(|e| **e == LifecycleEvent::ClosingDone)
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn test_drain_gives_up_after_drain_timeout() {
        let mut h = harness(Duration::ZERO);
        let _stuck = FakeClient::connect_as(&h.registry, 5001, Peer::Stuck);

        let start = Instant::now();
        let report = tokio::time::timeout(Duration::from_secs(2), h.drainer.drain())
            .await
            .expect("drain must be bounded")
            .unwrap();

        // close_timeout + drain_timeout
        assert!(start.elapsed() >= Duration::from_millis(700));
        assert_eq!(report.listener_error, Some(RelayError::DrainTimeout(1)));
        assert_eq!(h.drainer.phase(), DrainPhase::Done);
        assert_eq!(collect(&mut h.events).last(), Some(&LifecycleEvent::ClosingDone));
    }

    /// Gate that admits one more connection while it is being closed
    struct LateArrivalListener {
        gate: ListenerGate,
        registry: Arc<ConnectionRegistry>,
        late: StdMutex<Option<FakeClient>>,
    }

    impl AcceptSource for LateArrivalListener {
        fn close(&self) -> BoxFuture<'static, Result<(), RelayError>> {
            *self.late.lock().unwrap() = Some(FakeClient::connect(&self.registry, 5999));
            self.gate.close()
        }
    }

    #[tokio::test]
    async fn test_connection_admitted_before_listener_stops_is_notified() {
        let registry = Arc::new(ConnectionRegistry::new());
        let listener = Arc::new(LateArrivalListener {
            gate: ListenerGate::new(registry.clone()),
            registry: registry.clone(),
            late: StdMutex::new(None),
        });
        let h = harness_with_listener(registry.clone(), listener.clone(), Duration::from_millis(100));
        let _early = FakeClient::connect(&registry, 5001);

        let report = h.drainer.drain().await.unwrap();
        assert_eq!(report.clients_at_start, 1);
        assert_eq!(report.clients_notified, 2);

        let late = listener.late.lock().unwrap().take().unwrap();
        assert_eq!(late.received()[0], SocketCommand::Text(shutdown_notice(0)));
    }

    #[test]
    fn test_shutdown_config_defaults() {
        let config = ShutdownConfig::default();
        assert_eq!(config.margin, Duration::from_secs(5));
        assert_eq!(config.close_timeout, Duration::from_secs(2));
        assert_eq!(config.drain_timeout, Duration::from_secs(10));

        let relay = RelayConfig {
            shutdown_margin_secs: 2,
            ..RelayConfig::default()
        };
        assert_eq!(ShutdownConfig::from(&relay).margin, Duration::from_secs(2));
    }
}
