//! Stream lifecycle orchestration.
//!
//! Owns the table of active streams and translates normalized ingest
//! events into transcoder start/stop, master playlist writes, room
//! notifications, and deferred cleanup. Events for one key are serialized
//! behind a per-key async lock; events for different keys run
//! concurrently.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info, warn};

use classcast_core::models::{Codec, CodecPolicy};
use classcast_core::room::RoomHub;
use classcast_core::Config;

use crate::cleanup::CleanupScheduler;
use crate::ingest::{IngestEvent, IngestEventKind};
use crate::playlist;
use crate::supervisor::{TranscodeSpec, Transcoder, TranscoderExit, TranscoderSession};

/// One currently-publishing stream key.
///
/// The row holds a handle to the supervised transcoder, never the raw
/// process; stopping always goes through the handle.
pub struct ActiveStream {
    pub stream_key: String,
    pub publisher_addr: Option<String>,
    pub started_at: Instant,
    pub started_wall: DateTime<Utc>,
    pub recording_path: PathBuf,
    pub policy: CodecPolicy,
    pub codecs: Vec<Codec>,
    session: Arc<dyn TranscoderSession>,
}

/// Wire-friendly view of an active stream for status endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct ActiveStreamSummary {
    pub stream_key: String,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publisher_addr: Option<String>,
    pub codecs: Vec<Codec>,
    pub recording_path: PathBuf,
}

pub struct StreamOrchestrator {
    config: Config,
    hub: RoomHub,
    cleanup: Arc<CleanupScheduler>,
    transcoder: Arc<dyn Transcoder>,
    streams: DashMap<String, Arc<ActiveStream>>,
    /// Per-key serialization of publish events.
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl StreamOrchestrator {
    #[must_use]
    pub fn new(
        config: Config,
        hub: RoomHub,
        cleanup: Arc<CleanupScheduler>,
        transcoder: Arc<dyn Transcoder>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            hub,
            cleanup,
            transcoder,
            streams: DashMap::new(),
            locks: DashMap::new(),
        })
    }

    /// Consume transcoder exit notifications for the lifetime of the
    /// process. Spawn once at startup with a clone of the handle.
    pub fn spawn_exit_monitor(
        self: Arc<Self>,
        mut exit_rx: mpsc::UnboundedReceiver<TranscoderExit>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(exit) = exit_rx.recv().await {
                self.handle_transcoder_exit(exit).await;
            }
        })
    }

    fn key_lock(&self, stream_key: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(stream_key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Entry point for the ingest adapter.
    pub async fn handle_event(&self, event: IngestEvent) {
        match event.kind {
            IngestEventKind::PrePublish => {
                // Advisory only; the authorization hook point.
                info!(
                    stream_key = %event.stream_key,
                    publisher_addr = ?event.publisher_addr,
                    "Pre-publish"
                );
            }
            IngestEventKind::PostPublish => self.handle_post_publish(event).await,
            IngestEventKind::DonePublish => self.handle_done_publish(&event.stream_key).await,
        }
    }

    async fn handle_post_publish(&self, event: IngestEvent) {
        let stream_key = event.stream_key.clone();
        let lock = self.key_lock(&stream_key);
        let _guard = lock.lock().await;

        if self.streams.contains_key(&stream_key) {
            // Two publishers raced on one key: first wins.
            warn!(%stream_key, "Duplicate post-publish for active stream, ignoring");
            return;
        }

        // A publisher returning within the grace window keeps its files.
        self.cleanup.cancel(&stream_key);

        let policy = self.hub.codec_policy(&stream_key).await;
        let transcode = &self.config.transcode;
        let mut ladders = vec![transcode.primary.clone()];
        if policy.secondary_codec_enabled {
            ladders.push(transcode.secondary.clone());
        }
        let codecs: Vec<Codec> = ladders.iter().map(|l| l.codec).collect();

        let started_wall = Utc::now();
        let recording_path = self.config.paths.recordings_dir.join(format!(
            "{}_{}.flv",
            stream_key,
            started_wall.timestamp_millis()
        ));

        let spec = TranscodeSpec {
            stream_key: stream_key.clone(),
            rtmp_url: self.config.rtmp_pull_url(&stream_key),
            ladders: ladders.clone(),
            hardware_accel: transcode.hardware_accel,
            segment_seconds: transcode.segment_seconds,
            playlist_window: transcode.playlist_window,
            frame_rate: transcode.frame_rate,
            streams_dir: self.config.paths.streams_dir.clone(),
            recording_path: recording_path.clone(),
        };

        let session = match self.transcoder.start(spec).await {
            Ok(session) => session,
            Err(e) => {
                // Fatal to this attempt only; no partial row, the server
                // keeps serving other streams and rooms.
                error!(%stream_key, "Failed to start transcoder: {e}");
                return;
            }
        };

        for ladder in &ladders {
            if let Err(e) = playlist::write_master_playlist(
                &self.config.paths.streams_dir,
                &stream_key,
                ladder.codec,
                &ladder.renditions,
            )
            .await
            {
                error!(%stream_key, codec = %ladder.codec, "Failed to write master playlist: {e}");
            }
        }

        self.streams.insert(
            stream_key.clone(),
            Arc::new(ActiveStream {
                stream_key: stream_key.clone(),
                publisher_addr: event.publisher_addr,
                started_at: Instant::now(),
                started_wall,
                recording_path,
                policy,
                codecs: codecs.clone(),
                session,
            }),
        );

        self.hub.stream_started(&stream_key).await;
        info!(%stream_key, ?codecs, "Stream started");
    }

    async fn handle_done_publish(&self, stream_key: &str) {
        let lock = self.key_lock(stream_key);
        let _guard = lock.lock().await;

        let Some((_, stream)) = self.streams.remove(stream_key) else {
            warn!(%stream_key, "Done-publish without active stream, ignoring");
            return;
        };

        match stream.session.stop().await {
            Ok(recording_path) => {
                info!(
                    stream_key,
                    duration_secs = stream.started_at.elapsed().as_secs(),
                    recording = %recording_path.display(),
                    "Stream ended, recording available"
                );
            }
            Err(e) => {
                error!(%stream_key, "Failed to stop transcoder cleanly: {e}");
            }
        }

        self.cleanup.schedule(stream_key);
        self.hub.stream_ended(stream_key).await;
    }

    /// The transcoder died under an active stream: mark the stream failed,
    /// tell the room, schedule cleanup. No automatic restart; a fresh
    /// post-publish for the key starts over.
    async fn handle_transcoder_exit(&self, exit: TranscoderExit) {
        let lock = self.key_lock(&exit.stream_key);
        let _guard = lock.lock().await;

        let Some((_, stream)) = self.streams.remove(&exit.stream_key) else {
            // Stopped concurrently; nothing to fail.
            return;
        };

        error!(
            stream_key = %exit.stream_key,
            uptime_secs = stream.started_at.elapsed().as_secs(),
            "Stream failed: {}",
            exit.detail
        );

        self.cleanup.schedule(&exit.stream_key);
        self.hub.stream_failed(&exit.stream_key, exit.detail).await;
    }

    #[must_use]
    pub fn is_active(&self, stream_key: &str) -> bool {
        self.streams.contains_key(stream_key)
    }

    #[must_use]
    pub fn active_stream_count(&self) -> usize {
        self.streams.len()
    }

    #[must_use]
    pub fn active_streams(&self) -> Vec<ActiveStreamSummary> {
        self.streams
            .iter()
            .map(|entry| {
                let stream = entry.value();
                ActiveStreamSummary {
                    stream_key: stream.stream_key.clone(),
                    started_at: stream.started_wall,
                    publisher_addr: stream.publisher_addr.clone(),
                    codecs: stream.codecs.clone(),
                    recording_path: stream.recording_path.clone(),
                }
            })
            .collect()
    }

    /// Stop every supervised transcoder (shutdown path).
    pub async fn stop_all(&self) {
        let keys: Vec<String> = self.streams.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            self.handle_done_publish(&key).await;
        }
    }
}
