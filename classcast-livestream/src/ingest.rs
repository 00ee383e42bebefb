//! Normalized ingest events.
//!
//! The RTMP server is an off-the-shelf component; whatever shape its
//! callbacks take, the adapter boundary reduces them to this one typed
//! record before the orchestrator sees them.

/// Lifecycle phase reported by the ingest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestEventKind {
    /// Advisory, fired before a publish is accepted. Logged only.
    PrePublish,
    /// A publisher is live on this key.
    PostPublish,
    /// The publisher went away.
    DonePublish,
}

/// One normalized event from the RTMP ingest.
#[derive(Debug, Clone)]
pub struct IngestEvent {
    pub kind: IngestEventKind,
    pub stream_key: String,
    /// Publisher peer address when the ingest surfaces it.
    pub publisher_addr: Option<String>,
}

impl IngestEvent {
    #[must_use]
    pub fn pre_publish(stream_key: impl Into<String>) -> Self {
        Self {
            kind: IngestEventKind::PrePublish,
            stream_key: stream_key.into(),
            publisher_addr: None,
        }
    }

    #[must_use]
    pub fn post_publish(stream_key: impl Into<String>) -> Self {
        Self {
            kind: IngestEventKind::PostPublish,
            stream_key: stream_key.into(),
            publisher_addr: None,
        }
    }

    #[must_use]
    pub fn done_publish(stream_key: impl Into<String>) -> Self {
        Self {
            kind: IngestEventKind::DonePublish,
            stream_key: stream_key.into(),
            publisher_addr: None,
        }
    }

    #[must_use]
    pub fn with_publisher_addr(mut self, addr: impl Into<String>) -> Self {
        self.publisher_addr = Some(addr.into());
        self
    }
}

/// Extract the stream key from an RTMP publish path: the last non-empty
/// path segment. Returns `None` for malformed paths or keys that could
/// escape the output directory once embedded in file names.
#[must_use]
pub fn stream_key_from_path(path: &str) -> Option<String> {
    let key = path.trim_end_matches('/').rsplit('/').next()?;
    if key.is_empty() || key.len() > 128 {
        return None;
    }
    if !key
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return None;
    }
    if key.contains("..") {
        return None;
    }
    Some(key.to_string())
}
