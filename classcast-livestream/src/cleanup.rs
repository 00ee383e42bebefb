//! Grace-delayed deletion of a stream's HLS artifacts.
//!
//! Players keep fetching segments for a short while after a stream ends;
//! deleting synchronously would 404 them. Each stream end schedules a
//! sweep after a grace period, and a re-publish of the same key cancels
//! the pending sweep. Deletion is best-effort: individual failures are
//! logged and skipped.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// File suffixes the sweep recognizes as HLS artifacts: playlists,
/// transport-stream segments, fragmented-MP4 segments and init files.
const ARTIFACT_SUFFIXES: [&str; 4] = [".m3u8", ".ts", ".m4s", ".mp4"];

struct PendingCleanup {
    generation: u64,
    token: CancellationToken,
}

pub struct CleanupScheduler {
    streams_dir: PathBuf,
    grace: Duration,
    pending: Arc<DashMap<String, PendingCleanup>>,
    next_generation: AtomicU64,
}

impl CleanupScheduler {
    #[must_use]
    pub fn new(streams_dir: PathBuf, grace: Duration) -> Self {
        Self {
            streams_dir,
            grace,
            pending: Arc::new(DashMap::new()),
            next_generation: AtomicU64::new(0),
        }
    }

    /// Schedule a sweep of `<key>_*` artifacts after the grace period.
    /// Replaces (and cancels) any sweep already pending for the key.
    pub fn schedule(&self, stream_key: &str) {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        if let Some(previous) = self.pending.insert(
            stream_key.to_string(),
            PendingCleanup {
                generation,
                token: token.clone(),
            },
        ) {
            previous.token.cancel();
        }

        debug!(%stream_key, grace = ?self.grace, "Cleanup scheduled");

        let pending = Arc::clone(&self.pending);
        let streams_dir = self.streams_dir.clone();
        let grace = self.grace;
        let stream_key = stream_key.to_string();
        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {
                    debug!(%stream_key, "Cleanup canceled");
                    return;
                }
                () = tokio::time::sleep(grace) => {}
            }

            let deleted = sweep(&streams_dir, &stream_key).await;
            info!(%stream_key, deleted, "Cleanup swept stream artifacts");

            pending.remove_if(&stream_key, |_, p| p.generation == generation);
        });
    }

    /// Cancel a pending sweep (a new publisher arrived within the grace
    /// window). Returns whether one was pending.
    pub fn cancel(&self, stream_key: &str) -> bool {
        if let Some((_, pending)) = self.pending.remove(stream_key) {
            pending.token.cancel();
            true
        } else {
            false
        }
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

/// Whether a directory entry belongs to the given stream key.
#[must_use]
pub fn is_stream_artifact(file_name: &str, stream_key: &str) -> bool {
    file_name.starts_with(&format!("{stream_key}_"))
        && ARTIFACT_SUFFIXES.iter().any(|s| file_name.ends_with(s))
}

/// Delete every artifact of a stream key. Best-effort; returns the number
/// of files deleted.
async fn sweep(streams_dir: &Path, stream_key: &str) -> usize {
    let mut entries = match tokio::fs::read_dir(streams_dir).await {
        Ok(entries) => entries,
        Err(e) => {
            warn!(%stream_key, "Cleanup could not read {}: {e}", streams_dir.display());
            return 0;
        }
    };

    let mut deleted = 0;
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !is_stream_artifact(name, stream_key) {
            continue;
        }
        match tokio::fs::remove_file(entry.path()).await {
            Ok(()) => deleted += 1,
            Err(e) => warn!(%stream_key, "Cleanup failed to delete {name}: {e}"),
        }
    }
    deleted
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_artifact_matching() {
        assert!(is_stream_artifact("k1_h264.m3u8", "k1"));
        assert!(is_stream_artifact("k1_h264_720p.m3u8", "k1"));
        assert!(is_stream_artifact("k1_h264_720p_001.ts", "k1"));
        assert!(is_stream_artifact("k1_hevc_480p_002.m4s", "k1"));
        assert!(is_stream_artifact("k1_hevc_480p_init.mp4", "k1"));

        // Other keys, other files, prefix collisions
        assert!(!is_stream_artifact("k2_h264.m3u8", "k1"));
        assert!(!is_stream_artifact("k10_h264.m3u8", "k1"));
        assert!(!is_stream_artifact("k1_notes.txt", "k1"));
        assert!(!is_stream_artifact("k1.m3u8", "k1"));
    }

    async fn touch(dir: &Path, name: &str) {
        tokio::fs::write(dir.join(name), b"x").await.unwrap();
    }

    #[tokio::test]
    async fn test_sweep_deletes_only_matching_files() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "k1_h264.m3u8").await;
        touch(dir.path(), "k1_h264_720p.m3u8").await;
        touch(dir.path(), "k1_h264_720p_000.ts").await;
        touch(dir.path(), "k2_h264_720p_000.ts").await;
        touch(dir.path(), "unrelated.txt").await;

        let deleted = sweep(dir.path(), "k1").await;
        assert_eq!(deleted, 3);

        assert!(!dir.path().join("k1_h264.m3u8").exists());
        assert!(dir.path().join("k2_h264_720p_000.ts").exists());
        assert!(dir.path().join("unrelated.txt").exists());
    }

    #[tokio::test]
    async fn test_scheduled_cleanup_fires_after_grace() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "k1_h264.m3u8").await;

        let scheduler = Arc::new(CleanupScheduler::new(
            dir.path().to_path_buf(),
            Duration::from_millis(50),
        ));
        scheduler.schedule("k1");
        assert_eq!(scheduler.pending_count(), 1);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!dir.path().join("k1_h264.m3u8").exists());
        assert_eq!(scheduler.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_keeps_files() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "k1_h264.m3u8").await;

        let scheduler = Arc::new(CleanupScheduler::new(
            dir.path().to_path_buf(),
            Duration::from_millis(50),
        ));
        scheduler.schedule("k1");
        assert!(scheduler.cancel("k1"));
        assert!(!scheduler.cancel("k1"));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(dir.path().join("k1_h264.m3u8").exists());
    }

    #[tokio::test]
    async fn test_reschedule_replaces_pending_sweep() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "k1_h264.m3u8").await;

        let scheduler = Arc::new(CleanupScheduler::new(
            dir.path().to_path_buf(),
            Duration::from_millis(100),
        ));
        scheduler.schedule("k1");
        tokio::time::sleep(Duration::from_millis(50)).await;
        // Re-publish + re-end: old timer must not fire early.
        scheduler.schedule("k1");
        tokio::time::sleep(Duration::from_millis(70)).await;
        assert!(dir.path().join("k1_h264.m3u8").exists());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!dir.path().join("k1_h264.m3u8").exists());
    }
}
