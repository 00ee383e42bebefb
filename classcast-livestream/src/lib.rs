//! Stream lifecycle for the classcast origin: transcoder supervision,
//! master playlist writing, grace-period cleanup, and the orchestrator
//! that ties RTMP ingest events to all of them.

pub mod cleanup;
pub mod error;
pub mod ingest;
pub mod orchestrator;
pub mod playlist;
pub mod supervisor;

pub use cleanup::CleanupScheduler;
pub use error::{StreamError, StreamResult};
pub use ingest::{stream_key_from_path, IngestEvent, IngestEventKind};
pub use orchestrator::{ActiveStreamSummary, StreamOrchestrator};
pub use supervisor::{
    EncoderState, FfmpegTranscoder, TranscodeSpec, Transcoder, TranscoderExit, TranscoderSession,
};
