// RTMP ingest embedding.
//
// The RTMP protocol itself is off-the-shelf: xiu's RtmpServer accepts
// publishers and pushes Publish/UnPublish notifications through its
// StreamsHub event bus. This module consumes that broadcast stream and
// normalizes each notification into a single typed IngestEvent for the
// orchestrator; nothing downstream knows what shape the ingest's payloads
// had.

use anyhow::Result;
use std::sync::Arc;
use streamhub::define::BroadcastEvent;
use streamhub::stream::StreamIdentifier;
use streamhub::StreamsHub;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use classcast_livestream::{stream_key_from_path, IngestEvent, StreamOrchestrator};

pub struct RtmpIngest {
    address: String,
    orchestrator: Arc<StreamOrchestrator>,
    stream_hub: Arc<Mutex<StreamsHub>>,
}

impl RtmpIngest {
    pub fn new(address: String, orchestrator: Arc<StreamOrchestrator>) -> Self {
        Self {
            address,
            orchestrator,
            stream_hub: Arc::new(Mutex::new(StreamsHub::new(None))),
        }
    }

    /// Start the RTMP listener, the hub event loop, and the event
    /// consumer. Returns once everything is spawned.
    pub async fn start(&self) -> Result<()> {
        let (event_sender, client_event_consumer) = {
            let mut hub = self.stream_hub.lock().await;
            (hub.get_hub_event_sender(), hub.get_client_event_consumer())
        };

        let orchestrator = Arc::clone(&self.orchestrator);
        tokio::spawn(async move {
            consume_broadcast_events(client_event_consumer, orchestrator).await;
        });

        let hub = Arc::clone(&self.stream_hub);
        tokio::spawn(async move {
            let mut hub = hub.lock().await;
            hub.run().await;
            info!("StreamHub event loop ended");
        });

        let mut rtmp_server =
            rtmp::rtmp::RtmpServer::new(self.address.clone(), event_sender, 1, None);
        tokio::spawn(async move {
            if let Err(e) = rtmp_server.run().await {
                error!("RTMP server error: {}", e);
            }
        });

        info!("RTMP ingest listening on rtmp://{}", self.address);
        Ok(())
    }
}

async fn consume_broadcast_events(
    mut receiver: streamhub::define::BroadcastEventReceiver,
    orchestrator: Arc<StreamOrchestrator>,
) {
    loop {
        match receiver.recv().await {
            Ok(event) => handle_broadcast_event(event, &orchestrator).await,
            Err(e) => {
                error!("Error receiving broadcast event: {}", e);
                break;
            }
        }
    }
    warn!("RTMP event consumer stopped");
}

async fn handle_broadcast_event(event: BroadcastEvent, orchestrator: &StreamOrchestrator) {
    match event {
        BroadcastEvent::Publish { identifier, .. } => {
            let Some(stream_key) = extract_stream_key(&identifier) else {
                return;
            };
            info!(%stream_key, "RTMP publish");
            // Publish acceptance is the advisory pre-publish hook point.
            orchestrator
                .handle_event(IngestEvent::pre_publish(&stream_key))
                .await;
            orchestrator
                .handle_event(IngestEvent::post_publish(&stream_key))
                .await;
        }
        BroadcastEvent::UnPublish { identifier, .. } => {
            let Some(stream_key) = extract_stream_key(&identifier) else {
                return;
            };
            info!(%stream_key, "RTMP unpublish");
            orchestrator
                .handle_event(IngestEvent::done_publish(&stream_key))
                .await;
        }
        // Subscribe/UnSubscribe and friends are playback-side; the origin
        // serves playback over HLS, not RTMP.
        _ => {}
    }
}

fn extract_stream_key(identifier: &StreamIdentifier) -> Option<String> {
    match identifier {
        StreamIdentifier::Rtmp {
            app_name,
            stream_name,
        } => {
            let key = stream_key_from_path(&format!("{app_name}/{stream_name}"));
            if key.is_none() {
                warn!(%app_name, %stream_name, "Malformed publish path, ignoring");
            }
            key
        }
        other => {
            warn!("Ignoring non-RTMP stream identifier: {:?}", other);
            None
        }
    }
}
