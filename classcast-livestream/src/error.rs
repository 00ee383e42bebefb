use thiserror::Error;

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to spawn transcoder: {0}")]
    Spawn(String),

    #[error("Transcoder error: {0}")]
    Transcoder(String),

    #[error("Invalid stream key: {0}")]
    InvalidStreamKey(String),
}

pub type StreamResult<T> = std::result::Result<T, StreamError>;
