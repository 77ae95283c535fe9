//! Job definitions and the lifecycle state machine.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::{JobFailure, JobRequest, OutputLocation};

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Externally visible job state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Waiting for a worker slot
    #[default]
    Queued,
    /// Claimed by a worker, pipeline executing
    Running,
    /// Output published
    Succeeded,
    /// Terminated with a structured failure
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
        }
    }

    /// Check if this is a terminal state (no more transitions).
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }

    /// Whether the state machine permits moving from `self` to `next`.
    ///
    /// `queued -> failed` is only used for cancelling a job that never ran.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        matches!(
            (self, next),
            (JobState::Queued, JobState::Running)
                | (JobState::Queued, JobState::Failed)
                | (JobState::Running, JobState::Succeeded)
                | (JobState::Running, JobState::Failed)
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle phase with the data that only exists in that phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobPhase {
    Queued,
    Running,
    Succeeded { output: OutputLocation },
    Failed { failure: JobFailure },
}

impl JobPhase {
    pub fn state(&self) -> JobState {
        match self {
            JobPhase::Queued => JobState::Queued,
            JobPhase::Running => JobState::Running,
            JobPhase::Succeeded { .. } => JobState::Succeeded,
            JobPhase::Failed { .. } => JobState::Failed,
        }
    }
}

/// A render job and its full lifecycle record.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Job {
    /// Unique job ID
    pub id: JobId,

    /// Original submission
    pub request: JobRequest,

    /// Current phase
    pub phase: JobPhase,

    /// Human-readable status line
    pub message: String,

    /// Bounded capture of the render process output
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logs: Option<String>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Claimed by a worker at
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    /// Reached a terminal state at
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a new queued job.
    pub fn new(id: JobId, request: JobRequest) -> Self {
        Self {
            id,
            request,
            phase: JobPhase::Queued,
            message: "Queued".to_string(),
            logs: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn state(&self) -> JobState {
        self.phase.state()
    }

    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    /// Output location, set only once the job succeeded.
    pub fn output_location(&self) -> Option<&OutputLocation> {
        match &self.phase {
            JobPhase::Succeeded { output } => Some(output),
            _ => None,
        }
    }

    /// Failure reason, set only once the job failed.
    pub fn error(&self) -> Option<&JobFailure> {
        match &self.phase {
            JobPhase::Failed { failure } => Some(failure),
            _ => None,
        }
    }
}
