//! Worker error types.

use thiserror::Error;

use crate::registry::RegistryError;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Failed to fetch payload: {message}")]
    PayloadFetch { message: String, status: Option<u16> },

    #[error("Invalid payload: {0}")]
    PayloadInvalid(String),

    #[error("Building the render command timed out after {0}s")]
    BuildTimeout(u64),

    #[error("Job cancelled")]
    Cancelled,

    #[error("Worker is shutting down")]
    ShuttingDown,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Media error: {0}")]
    Media(#[from] vrender_media::MediaError),

    #[error("Storage error: {0}")]
    Storage(#[from] vrender_storage::StorageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn payload_fetch(message: impl Into<String>, status: Option<u16>) -> Self {
        Self::PayloadFetch {
            message: message.into(),
            status,
        }
    }

    pub fn payload_invalid(message: impl Into<String>) -> Self {
        Self::PayloadInvalid(message.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }
}
