//! Error handling for Phoenix

use crate::downloader::task::TaskStatus;
use thiserror::Error;

/// Main error type for Phoenix
#[derive(Debug, Error)]
pub enum PhoenixError {
    #[error("yt-dlp or ffmpeg not found. Please install yt-dlp and ffmpeg")]
    ToolNotFound,

    #[error("Failed to launch yt-dlp: {0}")]
    SpawnError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Illegal status transition: {from} -> {to}")]
    InvalidTransition { from: TaskStatus, to: TaskStatus },

    #[error("Operation failed: {0}")]
    OperationFailed(String),
}
