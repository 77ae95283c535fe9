//! Shared data models for the render job orchestrator.
//!
//! This crate provides Serde-serializable types for:
//! - Jobs, job states and the lifecycle phase variant
//! - Render requests and payload sources
//! - Resolved render specifications (timeline clips, output settings)
//! - The job failure taxonomy
//! - HTTP response schemas

pub mod failure;
pub mod job;
pub mod output;
pub mod payload;
pub mod request;
pub mod status;

// Re-export common types
pub use failure::{FailureKind, JobFailure};
pub use job::{Job, JobId, JobPhase, JobState};
pub use output::OutputLocation;
pub use payload::{ClipKind, OutputSpec, PayloadError, RenderSpec, TimelineClip};
pub use request::{is_valid_output_filename, JobRequest, PayloadSource, RenderRequest, RequestError};
pub use status::{CreateJobResponse, JobErrorBody, JobStatusResponse};
