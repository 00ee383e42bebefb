//! End-to-end orchestrator tests over a mock transcoder: publish
//! lifecycle, duplicate-event races, crash recovery, and cleanup grace
//! semantics, all against real temp directories.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use classcast_core::models::{Codec, ConnectionId, Role};
use classcast_core::room::{ClientCommand, RoomHub, ServerEvent};
use classcast_core::Config;
use classcast_livestream::orchestrator::StreamOrchestrator;
use classcast_livestream::supervisor::{
    EncoderState, TranscodeSpec, Transcoder, TranscoderExit, TranscoderSession,
};
use classcast_livestream::{CleanupScheduler, IngestEvent, StreamError, StreamResult};

const GRACE: Duration = Duration::from_millis(100);

/// Test transcoder: records what would have been spawned and lets tests
/// simulate crashes without an encoder binary.
struct MockTranscoder {
    exit_tx: mpsc::UnboundedSender<TranscoderExit>,
    fail_next_start: AtomicBool,
    specs: StdMutex<Vec<TranscodeSpec>>,
    sessions: StdMutex<Vec<Arc<MockSession>>>,
}

impl MockTranscoder {
    fn new(exit_tx: mpsc::UnboundedSender<TranscoderExit>) -> Self {
        Self {
            exit_tx,
            fail_next_start: AtomicBool::new(false),
            specs: StdMutex::new(Vec::new()),
            sessions: StdMutex::new(Vec::new()),
        }
    }

    /// Make the next `start` fail, as a spawn error would.
    fn fail_next_start(&self) {
        self.fail_next_start.store(true, Ordering::SeqCst);
    }

    fn started_specs(&self) -> Vec<TranscodeSpec> {
        self.specs.lock().unwrap().clone()
    }

    fn sessions(&self) -> Vec<Arc<MockSession>> {
        self.sessions.lock().unwrap().clone()
    }

    fn last_session(&self) -> Option<Arc<MockSession>> {
        self.sessions.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl Transcoder for MockTranscoder {
    async fn start(&self, spec: TranscodeSpec) -> StreamResult<Arc<dyn TranscoderSession>> {
        if self.fail_next_start.swap(false, Ordering::SeqCst) {
            return Err(StreamError::Spawn("mock spawn failure".to_string()));
        }

        let session = Arc::new(MockSession {
            stream_key: spec.stream_key.clone(),
            recording_path: spec.recording_path.clone(),
            state: StdMutex::new(EncoderState::Running),
            stop_calls: AtomicUsize::new(0),
            exit_tx: self.exit_tx.clone(),
        });

        self.specs.lock().unwrap().push(spec);
        self.sessions.lock().unwrap().push(Arc::clone(&session));
        Ok(session)
    }
}

struct MockSession {
    stream_key: String,
    recording_path: PathBuf,
    state: StdMutex<EncoderState>,
    stop_calls: AtomicUsize,
    exit_tx: mpsc::UnboundedSender<TranscoderExit>,
}

impl MockSession {
    /// Simulate the encoder dying out from under the orchestrator.
    fn simulate_crash(&self) {
        *self.state.lock().unwrap() = EncoderState::Exited;
        let _ = self.exit_tx.send(TranscoderExit {
            stream_key: self.stream_key.clone(),
            detail: "simulated crash".to_string(),
        });
    }

    fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TranscoderSession for MockSession {
    fn stream_key(&self) -> &str {
        &self.stream_key
    }

    fn recording_path(&self) -> &Path {
        &self.recording_path
    }

    fn state(&self) -> EncoderState {
        *self.state.lock().unwrap()
    }

    async fn stop(&self) -> StreamResult<PathBuf> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        *self.state.lock().unwrap() = EncoderState::Exited;
        Ok(self.recording_path.clone())
    }
}

struct Harness {
    hub: RoomHub,
    transcoder: Arc<MockTranscoder>,
    orchestrator: Arc<StreamOrchestrator>,
    streams_dir: tempfile::TempDir,
    _recordings_dir: tempfile::TempDir,
}

fn harness() -> Harness {
    let streams_dir = tempfile::tempdir().unwrap();
    let recordings_dir = tempfile::tempdir().unwrap();

    let mut config = Config::default();
    config.paths.streams_dir = streams_dir.path().to_path_buf();
    config.paths.recordings_dir = recordings_dir.path().to_path_buf();

    let (exit_tx, exit_rx) = mpsc::unbounded_channel::<TranscoderExit>();
    let hub = RoomHub::new(config.rooms.chat_retention);
    let cleanup = Arc::new(CleanupScheduler::new(
        config.paths.streams_dir.clone(),
        GRACE,
    ));
    let transcoder = Arc::new(MockTranscoder::new(exit_tx));
    let orchestrator = StreamOrchestrator::new(
        config,
        hub.clone(),
        cleanup,
        Arc::clone(&transcoder) as Arc<dyn Transcoder>,
    );
    Arc::clone(&orchestrator).spawn_exit_monitor(exit_rx);

    Harness {
        hub,
        transcoder,
        orchestrator,
        streams_dir,
        _recordings_dir: recordings_dir,
    }
}

async fn join_teacher(hub: &RoomHub, key: &str) -> (ConnectionId, mpsc::Receiver<ServerEvent>) {
    let (tx, mut rx) = mpsc::channel(64);
    let id = ConnectionId::new();
    hub.join(key, id.clone(), "teacher".to_string(), Role::Teacher, tx)
        .await;
    // Drain the room-state snapshot.
    rx.recv().await.expect("room-state");
    (id, rx)
}

#[tokio::test]
async fn test_publish_default_policy_produces_primary_only() {
    let h = harness();

    h.orchestrator
        .handle_event(IngestEvent::post_publish("k1"))
        .await;

    assert!(h.orchestrator.is_active("k1"));
    let specs = h.transcoder.started_specs();
    assert_eq!(specs.len(), 1);
    assert_eq!(specs[0].ladders.len(), 1);
    assert_eq!(specs[0].ladders[0].codec, Codec::H264);
    assert_eq!(specs[0].rtmp_url, "rtmp://127.0.0.1:1935/live/k1");

    // Master playlist for the primary codec only.
    assert!(h.streams_dir.path().join("k1_h264.m3u8").exists());
    assert!(!h.streams_dir.path().join("k1_hevc.m3u8").exists());

    let summaries = h.orchestrator.active_streams();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].codecs, vec![Codec::H264]);
}

#[tokio::test]
async fn test_done_publish_stops_and_cleans_after_grace() {
    let h = harness();

    h.orchestrator
        .handle_event(IngestEvent::post_publish("k1"))
        .await;
    // Simulated variant artifacts left by the transcoder.
    tokio::fs::write(h.streams_dir.path().join("k1_h264_720p.m3u8"), b"x")
        .await
        .unwrap();
    tokio::fs::write(h.streams_dir.path().join("k1_h264_720p_000.ts"), b"x")
        .await
        .unwrap();

    h.orchestrator
        .handle_event(IngestEvent::done_publish("k1"))
        .await;

    assert!(!h.orchestrator.is_active("k1"));
    let session = h.transcoder.last_session().unwrap();
    assert_eq!(session.stop_calls(), 1);

    // Files still present inside the grace window...
    assert!(h.streams_dir.path().join("k1_h264.m3u8").exists());

    // ...and gone after it.
    tokio::time::sleep(GRACE * 3).await;
    assert!(!h.streams_dir.path().join("k1_h264.m3u8").exists());
    assert!(!h.streams_dir.path().join("k1_h264_720p.m3u8").exists());
    assert!(!h.streams_dir.path().join("k1_h264_720p_000.ts").exists());
}

#[tokio::test]
async fn test_republish_within_grace_cancels_cleanup() {
    let h = harness();

    h.orchestrator
        .handle_event(IngestEvent::post_publish("k1"))
        .await;
    h.orchestrator
        .handle_event(IngestEvent::done_publish("k1"))
        .await;

    // New publisher arrives inside the grace window.
    h.orchestrator
        .handle_event(IngestEvent::post_publish("k1"))
        .await;

    tokio::time::sleep(GRACE * 3).await;
    // Master playlist survived: the pending sweep was canceled.
    assert!(h.streams_dir.path().join("k1_h264.m3u8").exists());
    assert!(h.orchestrator.is_active("k1"));
}

#[tokio::test]
async fn test_duplicate_post_publish_ignored_first_wins() {
    let h = harness();

    h.orchestrator
        .handle_event(IngestEvent::post_publish("k1"))
        .await;
    h.orchestrator
        .handle_event(IngestEvent::post_publish("k1"))
        .await;

    assert_eq!(h.transcoder.started_specs().len(), 1);
    assert_eq!(h.orchestrator.active_stream_count(), 1);
}

#[tokio::test]
async fn test_done_publish_without_stream_ignored() {
    let h = harness();
    h.orchestrator
        .handle_event(IngestEvent::done_publish("ghost"))
        .await;
    assert_eq!(h.orchestrator.active_stream_count(), 0);
}

#[tokio::test]
async fn test_pre_publish_is_advisory() {
    let h = harness();
    h.orchestrator
        .handle_event(IngestEvent::pre_publish("k1"))
        .await;
    assert!(!h.orchestrator.is_active("k1"));
    assert!(h.transcoder.started_specs().is_empty());
}

#[tokio::test]
async fn test_spawn_failure_leaves_no_row() {
    let h = harness();
    h.transcoder.fail_next_start();

    h.orchestrator
        .handle_event(IngestEvent::post_publish("k1"))
        .await;

    assert!(!h.orchestrator.is_active("k1"));

    // The key is not poisoned: the next attempt succeeds.
    h.orchestrator
        .handle_event(IngestEvent::post_publish("k1"))
        .await;
    assert!(h.orchestrator.is_active("k1"));
}

#[tokio::test]
async fn test_codec_policy_snapshot_at_publish_start() {
    let h = harness();
    let (teacher, mut rx) = join_teacher(&h.hub, "k2").await;

    h.hub
        .apply(&teacher, ClientCommand::SetCodecPolicy { secondary_enabled: true })
        .await;

    h.orchestrator
        .handle_event(IngestEvent::post_publish("k2"))
        .await;

    // Both codecs' master playlists exist.
    assert!(h.streams_dir.path().join("k2_h264.m3u8").exists());
    assert!(h.streams_dir.path().join("k2_hevc.m3u8").exists());
    let specs = h.transcoder.started_specs();
    assert_eq!(specs[0].ladders.len(), 2);

    // Flipping mid-stream changes nothing for the running transcoder.
    h.hub
        .apply(&teacher, ClientCommand::SetCodecPolicy { secondary_enabled: false })
        .await;
    assert_eq!(h.transcoder.started_specs().len(), 1);
    assert!(h.orchestrator.is_active("k2"));

    // After a stop and a fresh publish, only the primary is produced.
    h.orchestrator
        .handle_event(IngestEvent::done_publish("k2"))
        .await;
    tokio::time::sleep(GRACE * 3).await;
    h.orchestrator
        .handle_event(IngestEvent::post_publish("k2"))
        .await;

    let specs = h.transcoder.started_specs();
    assert_eq!(specs.len(), 2);
    assert_eq!(specs[1].ladders.len(), 1);
    assert_eq!(specs[1].ladders[0].codec, Codec::H264);
    assert!(!h.streams_dir.path().join("k2_hevc.m3u8").exists());

    // Drain remaining room events so the receiver outlives the asserts.
    while rx.try_recv().is_ok() {}
}

#[tokio::test]
async fn test_transcoder_crash_marks_stream_failed_and_allows_republish() {
    let h = harness();
    let (_teacher, mut rx) = join_teacher(&h.hub, "k1").await;

    h.orchestrator
        .handle_event(IngestEvent::post_publish("k1"))
        .await;
    match rx.recv().await.expect("event") {
        ServerEvent::StreamStarted { stream_key, .. } => assert_eq!(stream_key, "k1"),
        other => panic!("expected stream-started, got {}", other.event_type()),
    }

    h.transcoder.last_session().unwrap().simulate_crash();

    // The exit monitor removes the row and notifies the room.
    let failed = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timed out")
        .expect("event");
    match failed {
        ServerEvent::StreamFailed { stream_key, reason } => {
            assert_eq!(stream_key, "k1");
            assert!(reason.contains("crash"));
        }
        other => panic!("expected stream-failed, got {}", other.event_type()),
    }
    assert!(!h.orchestrator.is_active("k1"));

    // A fresh publish on the same key starts a fresh transcoder.
    h.orchestrator
        .handle_event(IngestEvent::post_publish("k1"))
        .await;
    assert!(h.orchestrator.is_active("k1"));
    assert_eq!(h.transcoder.started_specs().len(), 2);
}

#[tokio::test]
async fn test_stop_all_on_shutdown() {
    let h = harness();
    h.orchestrator
        .handle_event(IngestEvent::post_publish("k1"))
        .await;
    h.orchestrator
        .handle_event(IngestEvent::post_publish("k2"))
        .await;
    assert_eq!(h.orchestrator.active_stream_count(), 2);

    h.orchestrator.stop_all().await;
    assert_eq!(h.orchestrator.active_stream_count(), 0);
    for session in h.transcoder.sessions() {
        assert_eq!(session.stop_calls(), 1);
    }
}
