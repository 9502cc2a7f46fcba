use thiserror::Error;

use crate::models::AdId;

/// Failures of the chunked download engine
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DownloadError {
    #[error("Download info unavailable for {ad_id}: {message}")]
    InfoUnavailable { ad_id: AdId, message: String },

    #[error("Chunk {chunk_index} unavailable for {ad_id}: {message}")]
    ChunkUnavailable {
        ad_id: AdId,
        chunk_index: u64,
        message: String,
    },

    #[error("Integrity check failed: {0}")]
    Integrity(String),

    #[error("Storage error: {0}")]
    Io(String),

    #[error("Invalid filename: {0}")]
    InvalidFilename(String),

    #[error("Download cancelled")]
    Cancelled,
}

impl From<std::io::Error> for DownloadError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Problems with messages exchanged with the backend
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed {event} payload: {message}")]
    Malformed { event: String, message: String },

    #[error("Unknown event: {0}")]
    UnknownEvent(String),

    #[error("Not connected")]
    Disconnected,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failures while starting or monitoring an item
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlaybackError {
    #[error("Video file missing: {0}")]
    FileMissing(String),

    #[error("Player error: {0}")]
    Capability(String),
}
