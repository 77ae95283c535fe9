//! Error types for media operations.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur while building or running a render.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("FFmpeg not found in PATH")]
    FfmpegNotFound,

    #[error("FFmpeg command failed: {message}")]
    FfmpegFailed {
        message: String,
        log_tail: String,
        exit_code: Option<i32>,
    },

    #[error("Render produced no usable output: {0}")]
    OutputMissing(PathBuf),

    #[error("Asset download failed: {message}")]
    AssetFetch { message: String, status: Option<u16> },

    #[error("Invalid asset: {0}")]
    InvalidAsset(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MediaError {
    /// Create an FFmpeg failure error.
    pub fn ffmpeg_failed(
        message: impl Into<String>,
        log_tail: impl Into<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::FfmpegFailed {
            message: message.into(),
            log_tail: log_tail.into(),
            exit_code,
        }
    }

    /// Create an asset download failure error.
    pub fn asset_fetch(message: impl Into<String>, status: Option<u16>) -> Self {
        Self::AssetFetch {
            message: message.into(),
            status,
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}
