//! HTTP response schemas for job creation and polling.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{Job, JobFailure, JobState};

/// Response to `POST /render`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CreateJobResponse {
    pub id: String,
    pub status: JobState,
}

/// Error details exposed for failed jobs.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct JobErrorBody {
    /// Failure kind, e.g. `RenderTimeout`
    pub kind: String,
    /// Human-readable description
    pub message: String,
    /// The full structured failure
    pub detail: JobFailure,
}

impl From<&JobFailure> for JobErrorBody {
    fn from(failure: &JobFailure) -> Self {
        Self {
            kind: failure.kind().as_str().to_string(),
            message: failure.to_string(),
            detail: failure.clone(),
        }
    }
}

/// Response to `GET /jobs/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct JobStatusResponse {
    pub id: String,
    pub status: JobState,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logs: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobErrorBody>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<&Job> for JobStatusResponse {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id.to_string(),
            status: job.state(),
            message: job.message.clone(),
            output_url: job.output_location().map(|o| o.url().to_string()),
            logs: job.logs.clone(),
            error: job.error().map(JobErrorBody::from),
            created_at: job.created_at,
            started_at: job.started_at,
            finished_at: job.finished_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{JobId, JobPhase, JobRequest, OutputLocation};

    #[test]
    fn test_succeeded_job_response() {
        let mut job = Job::new(JobId::from_string("j1"), JobRequest::inline(serde_json::json!({}), None));
        job.phase = JobPhase::Succeeded {
            output: OutputLocation::Local {
                path: "/workspace/outputs/j1.mp4".into(),
                url: "/outputs/j1.mp4".to_string(),
            },
        };
        job.logs = Some("frame=1".to_string());

        let value = serde_json::to_value(JobStatusResponse::from(&job)).unwrap();
        assert_eq!(value["status"], "succeeded");
        assert_eq!(value["output_url"], "/outputs/j1.mp4");
        assert_eq!(value["logs"], "frame=1");
        assert!(value.get("error").is_none());
    }

    #[test]
    fn test_failed_job_response() {
        let mut job = Job::new(JobId::new(), JobRequest::inline(serde_json::json!({}), None));
        job.phase = JobPhase::Failed {
            failure: JobFailure::RenderTimeout { timeout_secs: 5 },
        };

        let value = serde_json::to_value(JobStatusResponse::from(&job)).unwrap();
        assert_eq!(value["status"], "failed");
        assert_eq!(value["error"]["kind"], "RenderTimeout");
        assert_eq!(value["error"]["detail"]["timeout_secs"], 5);
        assert!(value.get("output_url").is_none());
    }
}
