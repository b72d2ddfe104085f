// Error types shared across the playback core
use std::path::PathBuf;
use thiserror::Error;

/// Failure to turn a track reference into something playable
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("file not found: {0}")]
    NotFound(PathBuf),

    #[error("track is not available: {0}")]
    Unavailable(String),

    #[error("failed to read metadata: {0}")]
    Metadata(String),

    #[error("resolution task failed: {0}")]
    Task(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Failure reported by an audio backend
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("no output device available")]
    NoDevice,

    #[error("failed to open output: {0}")]
    Output(String),

    #[error("failed to open source: {0}")]
    Source(String),

    #[error("failed to decode: {0}")]
    Decode(String),

    #[error("seek failed: {0}")]
    Seek(String),

    #[error("unknown stream handle {0}")]
    UnknownStream(u64),
}
