// HTTP server wiring and shutdown signal.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::info;

use classcast_api::{create_router, AppState};
use classcast_core::room::RoomHub;
use classcast_core::Config;
use classcast_livestream::StreamOrchestrator;

/// Serve the HTTP surface until a shutdown signal arrives.
pub async fn serve(
    config: &Config,
    hub: RoomHub,
    orchestrator: Arc<StreamOrchestrator>,
) -> Result<()> {
    let state = AppState {
        hub,
        orchestrator,
        streams_dir: config.paths.streams_dir.clone(),
        send_queue_capacity: config.rooms.send_queue_capacity,
        idle_timeout: Duration::from_secs(config.rooms.idle_timeout_seconds),
    };
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(config.http_address()).await?;
    info!("HTTP server listening on http://{}", listener.local_addr()?);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        return;
    }
    info!("Shutdown signal received");
}
