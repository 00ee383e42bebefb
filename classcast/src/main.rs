mod rtmp;
mod server;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::mpsc;
use tracing::info;

use classcast_core::room::RoomHub;
use classcast_core::{logging, Config};
use classcast_livestream::{
    CleanupScheduler, FfmpegTranscoder, StreamOrchestrator, Transcoder, TranscoderExit,
};

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Load configuration (optional config file path as first argument)
    let config_file = std::env::args().nth(1);
    let config = Config::load(config_file.as_deref())?;

    // 1.5. Validate configuration (fail fast on misconfigurations)
    if let Err(errors) = config.validate() {
        for e in &errors {
            eprintln!("Config validation error: {e}");
        }
        return Err(anyhow::anyhow!(
            "Configuration validation failed with {} error(s)",
            errors.len()
        ));
    }

    // 2. Initialize logging
    logging::init_logging(&config.logging)?;
    info!("classcast origin starting...");
    info!("HTTP address: {}", config.http_address());
    info!("RTMP address: {}", config.rtmp_address());

    // 3. Ensure output directories exist before anything writes into them
    tokio::fs::create_dir_all(&config.paths.streams_dir)
        .await
        .map_err(|e| {
            anyhow::anyhow!("streams dir {} not usable: {e}", config.paths.streams_dir.display())
        })?;
    tokio::fs::create_dir_all(&config.paths.recordings_dir)
        .await
        .map_err(|e| {
            anyhow::anyhow!(
                "recordings dir {} not usable: {e}",
                config.paths.recordings_dir.display()
            )
        })?;

    // 4. Room hub
    let hub = RoomHub::new(config.rooms.chat_retention);
    info!("Room hub initialized");

    // 5. Stream lifecycle: cleanup scheduler, transcoder, orchestrator
    let cleanup = Arc::new(CleanupScheduler::new(
        config.paths.streams_dir.clone(),
        Duration::from_secs(config.cleanup.grace_seconds),
    ));
    let (exit_tx, exit_rx) = mpsc::unbounded_channel::<TranscoderExit>();
    let transcoder: Arc<dyn Transcoder> = Arc::new(FfmpegTranscoder::new(exit_tx));
    let orchestrator = StreamOrchestrator::new(config.clone(), hub.clone(), cleanup, transcoder);
    Arc::clone(&orchestrator).spawn_exit_monitor(exit_rx);

    // 6. RTMP ingest
    let ingest = rtmp::RtmpIngest::new(config.rtmp_address(), Arc::clone(&orchestrator));
    ingest.start().await?;

    // 7. HTTP server (blocks until shutdown signal)
    server::serve(&config, hub, Arc::clone(&orchestrator)).await?;

    // 8. Stop every supervised transcoder before exiting
    orchestrator.stop_all().await;
    info!("classcast origin stopped");

    Ok(())
}
