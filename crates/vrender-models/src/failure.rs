//! Job-terminal failure taxonomy.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structured reason a job ended in `failed`.
///
/// Serialized with a `kind` tag so clients can tell a failed render apart
/// from a render that succeeded but could not be published.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind")]
pub enum JobFailure {
    #[error("Invalid render payload: {message}")]
    PayloadInvalid { message: String },

    #[error("Failed to fetch payload: {message}")]
    PayloadFetchError {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<u16>,
    },

    #[error("{}", render_failed_message(*exit_code))]
    RenderFailed {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exit_code: Option<i32>,
        log_tail: String,
    },

    #[error("Render exceeded the {timeout_secs}s time limit and was terminated")]
    RenderTimeout { timeout_secs: u64 },

    #[error("Render reported success but produced no usable output at {path}")]
    OutputMissing { path: String },

    #[error("Render succeeded but publishing the output failed: {message}")]
    PublishFailed { message: String },

    #[error("Job was cancelled")]
    Cancelled,
}

fn render_failed_message(exit_code: Option<i32>) -> String {
    match exit_code {
        Some(code) => format!("FFmpeg exited with {}", code),
        None => "FFmpeg could not be run to completion".to_string(),
    }
}

/// Discriminant of [`JobFailure`], used for metrics labels and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    PayloadInvalid,
    PayloadFetchError,
    RenderFailed,
    RenderTimeout,
    OutputMissing,
    PublishFailed,
    Cancelled,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::PayloadInvalid => "PayloadInvalid",
            FailureKind::PayloadFetchError => "PayloadFetchError",
            FailureKind::RenderFailed => "RenderFailed",
            FailureKind::RenderTimeout => "RenderTimeout",
            FailureKind::OutputMissing => "OutputMissing",
            FailureKind::PublishFailed => "PublishFailed",
            FailureKind::Cancelled => "Cancelled",
        }
    }
}

impl JobFailure {
    pub fn payload_invalid(message: impl Into<String>) -> Self {
        Self::PayloadInvalid {
            message: message.into(),
        }
    }

    pub fn payload_fetch(message: impl Into<String>, status: Option<u16>) -> Self {
        Self::PayloadFetchError {
            message: message.into(),
            status,
        }
    }

    pub fn publish_failed(message: impl Into<String>) -> Self {
        Self::PublishFailed {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            JobFailure::PayloadInvalid { .. } => FailureKind::PayloadInvalid,
            JobFailure::PayloadFetchError { .. } => FailureKind::PayloadFetchError,
            JobFailure::RenderFailed { .. } => FailureKind::RenderFailed,
            JobFailure::RenderTimeout { .. } => FailureKind::RenderTimeout,
            JobFailure::OutputMissing { .. } => FailureKind::OutputMissing,
            JobFailure::PublishFailed { .. } => FailureKind::PublishFailed,
            JobFailure::Cancelled => FailureKind::Cancelled,
        }
    }
}
