use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio::signal;

use overlay_relay::config::Settings;
use overlay_relay::events::{LifecycleEvents, LoggingObserver, MetricsObserver};
use overlay_relay::overlay::LocalOverlay;
use overlay_relay::relay::RelayService;
use overlay_relay::server::{run_server, AppState};
use overlay_relay::telemetry::init_telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let settings = Settings::new()?;

    // Initialize tracing
    let _telemetry = init_telemetry(&settings.log, &settings.otel)?;
    tracing::info!(
        shutdown_margin_secs = settings.relay.shutdown_margin_secs,
        "Configuration loaded"
    );

    // Lifecycle observers
    let events = Arc::new(LifecycleEvents::new());
    events.subscribe(Arc::new(LoggingObserver));
    events.subscribe(Arc::new(MetricsObserver));

    // Overlay node and relay
    let overlay = Arc::new(LocalOverlay::new());
    let relay = Arc::new(RelayService::new(&settings.relay, overlay, events));
    relay.open().await?;

    // Start server
    let addr = settings.server_addr();
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Server listening at http://{}", listener.local_addr()?);

    let state = AppState::new(settings, relay.clone());
    let server = tokio::spawn(run_server(listener, state));

    shutdown_signal().await;

    // Drain bridged connections; this also stops the HTTP listener
    match relay.close().await {
        Ok(report) => tracing::info!(
            clients_at_start = report.clients_at_start,
            clients_notified = report.clients_notified,
            outcome = ?report.outcome,
            "Relay drained"
        ),
        Err(e) => tracing::error!(error = %e, "Relay drain failed"),
    }

    // Wait for the HTTP server to finish
    if let Err(e) = server.await? {
        tracing::error!(error = %e, "Server error");
    }

    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}
