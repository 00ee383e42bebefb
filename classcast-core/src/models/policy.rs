use serde::{Deserialize, Serialize};

/// Per-room codec policy.
///
/// The primary codec is always produced; the secondary codec only when
/// enabled here. The orchestrator snapshots this at publish start, so
/// toggling mid-stream takes effect on the next publish.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CodecPolicy {
    pub secondary_codec_enabled: bool,
}
