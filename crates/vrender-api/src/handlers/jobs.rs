//! Job submission, polling and cancellation handlers.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;
use tracing::info;
use vrender_models::{CreateJobResponse, JobId, JobState, JobStatusResponse, RenderRequest};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Response to `POST /jobs/{id}/cancel`.
#[derive(Debug, Serialize)]
pub struct CancelJobResponse {
    #[serde(flatten)]
    pub job: JobStatusResponse,
    /// What the cancel request did
    pub cancel: &'static str,
}

/// Submit a render job.
///
/// Returns as soon as the job is queued; rendering happens in the background.
pub async fn submit_render(
    State(state): State<AppState>,
    body: Result<Json<RenderRequest>, JsonRejection>,
) -> ApiResult<Json<CreateJobResponse>> {
    let Json(body) = body.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let request = body.validate()?;

    let id = state.service.submit(request)?;
    info!(job_id = %id, "Render job submitted");

    Ok(Json(CreateJobResponse {
        id: id.to_string(),
        status: JobState::Queued,
    }))
}

/// Get the current status of a job.
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobStatusResponse>> {
    let job = state.service.status(&JobId::from_string(job_id))?;
    Ok(Json(JobStatusResponse::from(&job)))
}

/// Cancel a queued or running job.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<CancelJobResponse>> {
    let id = JobId::from_string(job_id);
    let outcome = state.service.cancel(&id)?;
    let job = state.service.status(&id)?;

    info!(job_id = %id, outcome = outcome.as_str(), "Cancel requested");

    Ok(Json(CancelJobResponse {
        job: JobStatusResponse::from(&job),
        cancel: outcome.as_str(),
    }))
}
