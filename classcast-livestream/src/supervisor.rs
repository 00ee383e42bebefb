//! Transcoder supervision.
//!
//! One external encoder process per active stream turns the RTMP feed into
//! per-rendition HLS variants (one set per enabled codec) plus a
//! pass-through recording. The supervisor builds the argv, spawns the
//! child, tails stderr so the pipe never blocks, and guarantees
//! termination: a graceful `q` on stop, a kill after five seconds.
//!
//! The `Transcoder` / `TranscoderSession` traits are the seam between the
//! orchestrator and the real encoder; tests drive the orchestrator with a
//! mock implementation instead of spawning ffmpeg.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use classcast_core::config::CodecLadder;
use classcast_core::models::Codec;

use crate::error::{StreamError, StreamResult};

/// Graceful-stop budget before the child is killed.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);
/// Window after spawn in which a fatal error triggers the software fallback.
const HARDWARE_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Supervision state machine. `Running → Exited` without passing through
/// `Stopping` is an unexpected exit and is reported to the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderState {
    Idle,
    Running,
    Stopping,
    Exited,
}

/// Everything the supervisor needs to encode one stream.
#[derive(Debug, Clone)]
pub struct TranscodeSpec {
    pub stream_key: String,
    /// RTMP URL the encoder reads the source from.
    pub rtmp_url: String,
    /// One ladder per codec to produce; policy gating happened upstream.
    pub ladders: Vec<CodecLadder>,
    pub hardware_accel: bool,
    pub segment_seconds: u64,
    pub playlist_window: u32,
    pub frame_rate: u32,
    pub streams_dir: PathBuf,
    /// Pass-through archival target, `<recordings>/<key>_<startMillis>.flv`.
    pub recording_path: PathBuf,
}

/// Notification that a supervised encoder exited without `stop()`.
#[derive(Debug, Clone)]
pub struct TranscoderExit {
    pub stream_key: String,
    pub detail: String,
}

/// A running (or stopped) encoder for one stream.
#[async_trait]
pub trait TranscoderSession: Send + Sync {
    fn stream_key(&self) -> &str;
    fn recording_path(&self) -> &Path;
    fn state(&self) -> EncoderState;
    /// Stop the encoder: graceful interrupt, then kill after five seconds.
    /// Idempotent; always returns the recording path.
    async fn stop(&self) -> StreamResult<PathBuf>;
}

/// Factory seam so the orchestrator can be tested without ffmpeg.
#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn start(&self, spec: TranscodeSpec) -> StreamResult<Arc<dyn TranscoderSession>>;
}

/// ffmpeg-backed implementation.
pub struct FfmpegTranscoder {
    binary_path: String,
    exit_tx: mpsc::UnboundedSender<TranscoderExit>,
}

impl FfmpegTranscoder {
    #[must_use]
    pub fn new(exit_tx: mpsc::UnboundedSender<TranscoderExit>) -> Self {
        Self::with_binary("ffmpeg", exit_tx)
    }

    #[must_use]
    pub fn with_binary(binary_path: &str, exit_tx: mpsc::UnboundedSender<TranscoderExit>) -> Self {
        Self {
            binary_path: binary_path.to_string(),
            exit_tx,
        }
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn start(&self, spec: TranscodeSpec) -> StreamResult<Arc<dyn TranscoderSession>> {
        if spec.hardware_accel {
            // The probe attempt gets its own exit channel: if the hardware
            // encoder dies inside the probe window the exit must not reach
            // the orchestrator, because the software retry below supersedes
            // the attempt.
            let (probe_tx, mut probe_rx) = mpsc::unbounded_channel();
            let session = FfmpegSession::spawn(&self.binary_path, &spec, true, probe_tx)?;

            // A hardware encoder that cannot initialize dies (or spews a
            // fatal line) almost immediately. Give it a short probe window
            // before trusting it; fall back to software otherwise.
            tokio::select! {
                () = tokio::time::sleep(HARDWARE_PROBE_TIMEOUT) => {
                    let exit_tx = self.exit_tx.clone();
                    tokio::spawn(async move {
                        while let Some(exit) = probe_rx.recv().await {
                            let _ = exit_tx.send(exit);
                        }
                    });
                    return Ok(session);
                }
                () = session.fatal.cancelled() => {}
                () = session.exited.cancelled() => {}
            }

            warn!(
                stream_key = %spec.stream_key,
                "Hardware encoder failed to initialize, falling back to software"
            );
            session.stop().await.ok();
        }

        let session = FfmpegSession::spawn(&self.binary_path, &spec, false, self.exit_tx.clone())?;
        Ok(session)
    }
}

/// One spawned ffmpeg child under supervision.
pub struct FfmpegSession {
    stream_key: String,
    recording_path: PathBuf,
    state: StdMutex<EncoderState>,
    /// Asks the wait task to stop the child gracefully.
    stop_requested: CancellationToken,
    /// Completed by the wait task once the child is gone.
    exited: CancellationToken,
    /// Completed by the stderr task on an error/fatal line.
    fatal: CancellationToken,
}

impl FfmpegSession {
    fn spawn(
        binary_path: &str,
        spec: &TranscodeSpec,
        hardware: bool,
        exit_tx: mpsc::UnboundedSender<TranscoderExit>,
    ) -> StreamResult<Arc<Self>> {
        let args = build_args(spec, hardware);
        info!(
            stream_key = %spec.stream_key,
            hardware,
            "Spawning transcoder: {} {}",
            binary_path,
            args.join(" ")
        );

        let mut child = Command::new(binary_path)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| StreamError::Spawn(format!("{}: {e}", spec.stream_key)))?;

        let mut stdin = child.stdin.take();
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| StreamError::Spawn("failed to capture transcoder stderr".to_string()))?;

        let session = Arc::new(Self {
            stream_key: spec.stream_key.clone(),
            recording_path: spec.recording_path.clone(),
            state: StdMutex::new(EncoderState::Running),
            stop_requested: CancellationToken::new(),
            exited: CancellationToken::new(),
            fatal: CancellationToken::new(),
        });

        // Stderr tail: never let the pipe fill. Error/fatal lines are
        // surfaced, everything else sampled at debug.
        {
            let stream_key = session.stream_key.clone();
            let fatal = session.fatal.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let lowered = line.to_ascii_lowercase();
                    if lowered.contains("error") || lowered.contains("fatal") {
                        warn!(stream_key = %stream_key, "Transcoder stderr: {line}");
                        fatal.cancel();
                    } else {
                        debug!(stream_key = %stream_key, "Transcoder stderr: {line}");
                    }
                }
            });
        }

        // Wait task: owns the child, handles graceful stop and the kill
        // escalation, reports unexpected exits.
        {
            let session = Arc::clone(&session);
            tokio::spawn(async move {
                let status = tokio::select! {
                    status = child.wait() => status,
                    () = session.stop_requested.cancelled() => {
                        if let Some(mut stdin) = stdin.take() {
                            let _ = stdin.write_all(b"q").await;
                            let _ = stdin.flush().await;
                            let _ = stdin.shutdown().await;
                        }
                        match tokio::time::timeout(STOP_TIMEOUT, child.wait()).await {
                            Ok(status) => status,
                            Err(_) => {
                                warn!(
                                    stream_key = %session.stream_key,
                                    "Transcoder did not exit within {STOP_TIMEOUT:?}, killing"
                                );
                                let _ = child.kill().await;
                                child.wait().await
                            }
                        }
                    }
                };

                let expected = {
                    let mut state = session.state.lock().expect("state lock");
                    let expected = *state == EncoderState::Stopping;
                    *state = EncoderState::Exited;
                    expected
                };
                session.exited.cancel();

                let detail = match status {
                    Ok(status) => format!("transcoder exited with {status}"),
                    Err(e) => format!("failed to reap transcoder: {e}"),
                };
                if expected {
                    info!(stream_key = %session.stream_key, "{detail}");
                } else {
                    error!(stream_key = %session.stream_key, "Unexpected: {detail}");
                    let _ = exit_tx.send(TranscoderExit {
                        stream_key: session.stream_key.clone(),
                        detail,
                    });
                }
            });
        }

        Ok(session)
    }
}

#[async_trait]
impl TranscoderSession for FfmpegSession {
    fn stream_key(&self) -> &str {
        &self.stream_key
    }

    fn recording_path(&self) -> &Path {
        &self.recording_path
    }

    fn state(&self) -> EncoderState {
        *self.state.lock().expect("state lock")
    }

    async fn stop(&self) -> StreamResult<PathBuf> {
        {
            let mut state = self.state.lock().expect("state lock");
            match *state {
                EncoderState::Running => *state = EncoderState::Stopping,
                // Already stopping or gone: just wait for the wait task.
                EncoderState::Stopping | EncoderState::Exited | EncoderState::Idle => {}
            }
        }
        self.stop_requested.cancel();
        self.exited.cancelled().await;
        Ok(self.recording_path.clone())
    }
}

/// Build the complete encoder argv for one stream.
///
/// Layout: global flags, the RTMP input, the pass-through recording
/// output, then one HLS output per (codec, rendition) pair. Options bind
/// to the output file that follows them.
#[must_use]
pub fn build_args(spec: &TranscodeSpec, hardware: bool) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-hide_banner".into(),
        "-y".into(),
        "-i".into(),
        spec.rtmp_url.clone(),
    ];

    // Archival pass-through: the publisher's original audio/video, no
    // re-encode.
    args.extend([
        "-map".into(),
        "0".into(),
        "-c".into(),
        "copy".into(),
        "-f".into(),
        "flv".into(),
        spec.recording_path.to_string_lossy().into_owned(),
    ]);

    // Keyframes forced at segment boundaries so every segment decodes
    // independently.
    let keyint = spec.segment_seconds * u64::from(spec.frame_rate);

    for ladder in &spec.ladders {
        for rendition in &ladder.renditions {
            let video_kbps = rendition.video_bitrate_kbps;
            args.extend(["-map".into(), "0:v:0".into(), "-map".into(), "0:a:0".into()]);
            args.extend(encoder_args(ladder.codec, hardware));
            args.extend([
                "-b:v".into(),
                format!("{video_kbps}k"),
                "-maxrate".into(),
                format!("{video_kbps}k"),
                "-bufsize".into(),
                format!("{}k", video_kbps * 2),
                "-s".into(),
                rendition.resolution(),
                "-g".into(),
                keyint.to_string(),
                "-keyint_min".into(),
                keyint.to_string(),
                "-sc_threshold".into(),
                "0".into(),
                "-c:a".into(),
                "aac".into(),
                "-ar".into(),
                "44100".into(),
                "-ac".into(),
                "2".into(),
                "-b:a".into(),
                format!("{}k", rendition.audio_bitrate_kbps),
            ]);

            let segment_pattern = spec.streams_dir.join(format!(
                "{}_{}_{}_%03d.ts",
                spec.stream_key,
                ladder.codec.tag(),
                rendition.name
            ));
            let variant_playlist = spec
                .streams_dir
                .join(rendition.variant_filename(&spec.stream_key, ladder.codec));
            args.extend([
                "-f".into(),
                "hls".into(),
                "-hls_time".into(),
                spec.segment_seconds.to_string(),
                "-hls_list_size".into(),
                spec.playlist_window.to_string(),
                "-hls_flags".into(),
                "delete_segments+independent_segments".into(),
                "-hls_segment_filename".into(),
                segment_pattern.to_string_lossy().into_owned(),
                variant_playlist.to_string_lossy().into_owned(),
            ]);
        }
    }

    args
}

/// Encoder family selection: hardware encoders with a low-latency preset,
/// software encoders tuned for zero latency.
fn encoder_args(codec: Codec, hardware: bool) -> Vec<String> {
    let args: &[&str] = match (codec, hardware) {
        (Codec::H264, true) => &["-c:v", "h264_nvenc", "-preset", "p1", "-tune", "ll"],
        (Codec::Hevc, true) => &["-c:v", "hevc_nvenc", "-preset", "p1", "-tune", "ll"],
        (Codec::H264, false) => &["-c:v", "libx264", "-preset", "veryfast", "-tune", "zerolatency"],
        (Codec::Hevc, false) => &["-c:v", "libx265", "-preset", "ultrafast", "-tune", "zerolatency"],
    };
    args.iter().map(|s| (*s).to_string()).collect()
}
