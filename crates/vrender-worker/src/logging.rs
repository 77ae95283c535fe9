//! Structured logging for a job's trip through the render pipeline.
//!
//! Every event carries `job_id` and `stage` fields; failures add the
//! failure `kind` so logs line up with the `jobs_failed_total` labels.

use std::fmt;

use tracing::{error, info, warn, Span};
use vrender_models::{JobFailure, JobId, OutputLocation};

/// Pipeline stage a job is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    ResolvePayload,
    BuildCommand,
    Render,
    Publish,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::ResolvePayload => "resolve_payload",
            Stage::BuildCommand => "build_command",
            Stage::Render => "render",
            Stage::Publish => "publish",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Logs one job's pipeline events.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: JobId,
    stage: Option<Stage>,
}

impl JobLogger {
    pub fn new(job_id: &JobId) -> Self {
        Self {
            job_id: job_id.clone(),
            stage: None,
        }
    }

    /// Stage most recently entered.
    pub fn stage(&self) -> Option<Stage> {
        self.stage
    }

    pub fn started(&self) {
        info!(job_id = %self.job_id, "Render job started");
    }

    /// Record entry into `stage`.
    pub fn enter(&mut self, stage: Stage, detail: &str) {
        self.stage = Some(stage);
        if detail.is_empty() {
            info!(job_id = %self.job_id, stage = %stage, "Entering stage");
        } else {
            info!(job_id = %self.job_id, stage = %stage, "Entering stage: {}", detail);
        }
    }

    pub fn succeeded(&self, output: &OutputLocation) {
        info!(
            job_id = %self.job_id,
            output_url = %output.url(),
            "Render job succeeded"
        );
    }

    /// Cancellation is expected and logged below error level.
    pub fn failed(&self, failure: &JobFailure) {
        let stage = self.stage.map(|s| s.as_str()).unwrap_or("setup");
        let kind = failure.kind().as_str();
        if matches!(failure, JobFailure::Cancelled) {
            warn!(job_id = %self.job_id, stage, kind, "Render job cancelled");
        } else {
            error!(job_id = %self.job_id, stage, kind, "Render job failed: {}", failure);
        }
    }

    /// Span covering the whole pipeline run.
    pub fn span(&self) -> Span {
        tracing::info_span!("render_job", job_id = %self.job_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enter_tracks_stage() {
        let mut logger = JobLogger::new(&JobId::new());
        assert_eq!(logger.stage(), None);

        logger.enter(Stage::ResolvePayload, "");
        logger.enter(Stage::BuildCommand, "2 clips");
        assert_eq!(logger.stage(), Some(Stage::BuildCommand));

        logger.failed(&JobFailure::Cancelled);
        assert_eq!(logger.stage(), Some(Stage::BuildCommand));
    }

    #[test]
    fn test_stage_names() {
        assert_eq!(Stage::ResolvePayload.to_string(), "resolve_payload");
        assert_eq!(Stage::Publish.as_str(), "publish");
    }
}
