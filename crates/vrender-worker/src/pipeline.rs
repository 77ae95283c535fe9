//! The per-job render pipeline.
//!
//! resolve payload -> build invocation -> run -> publish
//!
//! Each stage error is mapped to exactly one [`JobFailure`] in
//! [`failure_from`]. Every stage races against the job's cancel signal.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::Instrument;
use vrender_media::{
    BuildContext, LogBuffer, MediaError, ProcessRunner, RenderCommandBuilder,
    FAILURE_LOG_TAIL_BYTES,
};
use vrender_models::{Job, JobFailure, OutputLocation};
use vrender_storage::OutputPublisher;

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::{JobLogger, Stage};
use crate::metrics;
use crate::resolver::PayloadResolver;

/// Result of running one job through the pipeline.
#[derive(Debug, Clone)]
pub struct RenderOutcome {
    pub result: Result<OutputLocation, JobFailure>,
    /// Captured process output, if the render ran
    pub logs: Option<String>,
}

impl RenderOutcome {
    pub fn failed(failure: JobFailure) -> Self {
        Self {
            result: Err(failure),
            logs: None,
        }
    }
}

/// Collaborators a job needs to go from payload to published output.
pub struct RenderPipeline {
    resolver: PayloadResolver,
    builder: Arc<dyn RenderCommandBuilder>,
    runner: ProcessRunner,
    publisher: Arc<dyn OutputPublisher>,
    build_timeout: Duration,
    work_dir: PathBuf,
    log_buffer_bytes: usize,
}

impl RenderPipeline {
    pub fn new(
        config: &WorkerConfig,
        builder: Arc<dyn RenderCommandBuilder>,
        publisher: Arc<dyn OutputPublisher>,
    ) -> WorkerResult<Self> {
        Ok(Self {
            resolver: PayloadResolver::new(config.payload_fetch_timeout, config.payload_max_bytes)?,
            builder,
            runner: ProcessRunner::new(config.render_timeout),
            publisher,
            build_timeout: config.build_timeout,
            work_dir: config.work_dir.clone(),
            log_buffer_bytes: config.log_buffer_bytes,
        })
    }

    /// Run a claimed job to completion. Never panics on stage errors; every
    /// failure comes back as `Err` in the outcome.
    pub async fn execute(&self, job: &Job, cancel: watch::Receiver<bool>) -> RenderOutcome {
        let mut logger = JobLogger::new(&job.id);
        let logs = LogBuffer::new(self.log_buffer_bytes);

        logger.started();
        let span = logger.span();
        let result = self
            .run_stages(job, &logs, cancel, &mut logger)
            .instrument(span)
            .await
            .map_err(failure_from);

        match &result {
            Ok(output) => logger.succeeded(output),
            Err(failure) => logger.failed(failure),
        }

        RenderOutcome {
            result,
            logs: (!logs.is_empty()).then(|| logs.snapshot()),
        }
    }

    async fn run_stages(
        &self,
        job: &Job,
        logs: &LogBuffer,
        mut cancel: watch::Receiver<bool>,
        logger: &mut JobLogger,
    ) -> WorkerResult<OutputLocation> {
        tokio::fs::create_dir_all(&self.work_dir).await?;
        let scratch = tempfile::Builder::new()
            .prefix(&format!("{}-", job.id))
            .tempdir_in(&self.work_dir)?;

        logger.enter(Stage::ResolvePayload, "");
        let spec = until_cancelled(&mut cancel, self.resolver.resolve(&job.request.source)).await??;

        let ctx = BuildContext::new(
            job.id.clone(),
            scratch.path(),
            job.request.output_filename_for(&job.id),
        );
        logger.enter(Stage::BuildCommand, &format!("{} clips", spec.clips.len()));
        let built = tokio::time::timeout(
            self.build_timeout,
            until_cancelled(&mut cancel, self.builder.build(&spec, &ctx)),
        )
        .await
        .map_err(|_| WorkerError::BuildTimeout(self.build_timeout.as_secs()))?;
        let invocation = built??;

        logger.enter(Stage::Render, "");
        let started = Instant::now();
        let rendered = self.runner.run(&invocation, logs, cancel.clone()).await;
        metrics::record_render_duration(started.elapsed().as_secs_f64());
        rendered?;

        logger.enter(Stage::Publish, &ctx.output_filename);
        let started = Instant::now();
        let published = until_cancelled(
            &mut cancel,
            self.publisher.publish(&invocation.output_path, &ctx.output_filename),
        )
        .await?;
        metrics::record_publish_duration(started.elapsed().as_secs_f64());

        Ok(published?)
    }
}

/// Resolves once the cancel flag is set. Pends forever if the sender is gone.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

async fn until_cancelled<F: Future>(
    cancel: &mut watch::Receiver<bool>,
    fut: F,
) -> WorkerResult<F::Output> {
    tokio::select! {
        out = fut => Ok(out),
        _ = cancelled(cancel) => Err(WorkerError::Cancelled),
    }
}

/// Map a pipeline error to the job failure clients see.
pub fn failure_from(err: WorkerError) -> JobFailure {
    match err {
        WorkerError::PayloadFetch { message, status } => JobFailure::payload_fetch(message, status),
        WorkerError::PayloadInvalid(message) => JobFailure::payload_invalid(message),
        WorkerError::Cancelled | WorkerError::Media(MediaError::Cancelled) => JobFailure::Cancelled,
        WorkerError::BuildTimeout(secs) => JobFailure::RenderTimeout { timeout_secs: secs },
        WorkerError::Storage(e) => JobFailure::publish_failed(e.to_string()),
        WorkerError::Media(media) => match media {
            MediaError::AssetFetch { message, status } => JobFailure::payload_fetch(message, status),
            MediaError::InvalidAsset(src) => {
                JobFailure::payload_invalid(format!("unusable clip source '{}'", src))
            }
            MediaError::Timeout(secs) => JobFailure::RenderTimeout { timeout_secs: secs },
            MediaError::OutputMissing(path) => JobFailure::OutputMissing {
                path: path.display().to_string(),
            },
            MediaError::FfmpegFailed {
                message,
                log_tail,
                exit_code,
            } => JobFailure::RenderFailed {
                exit_code,
                log_tail: if log_tail.is_empty() { message } else { log_tail },
            },
            other => JobFailure::RenderFailed {
                exit_code: None,
                log_tail: other.to_string(),
            },
        },
        other => JobFailure::RenderFailed {
            exit_code: None,
            log_tail: truncate_tail(other.to_string()),
        },
    }
}

fn truncate_tail(mut message: String) -> String {
    if message.len() > FAILURE_LOG_TAIL_BYTES {
        let mut cut = message.len() - FAILURE_LOG_TAIL_BYTES;
        while !message.is_char_boundary(cut) {
            cut += 1;
        }
        message.drain(..cut);
    }
    message
}
