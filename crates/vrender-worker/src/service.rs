//! The render service: registry, scheduler and retention sweeper wired
//! together behind one handle.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;
use vrender_media::RenderCommandBuilder;
use vrender_models::{Job, JobId, JobRequest};
use vrender_storage::OutputPublisher;

use crate::config::WorkerConfig;
use crate::error::WorkerResult;
use crate::pipeline::RenderPipeline;
use crate::registry::{JobRegistry, RegistryResult, StateCounts};
use crate::retention::RetentionSweeper;
use crate::scheduler::{CancelOutcome, Scheduler};

/// Handle shared by the API handlers.
pub struct RenderService {
    config: WorkerConfig,
    registry: Arc<JobRegistry>,
    scheduler: Arc<Scheduler>,
    stop: watch::Sender<bool>,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl RenderService {
    /// Build the service and start its background tasks.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        config: WorkerConfig,
        builder: Arc<dyn RenderCommandBuilder>,
        publisher: Arc<dyn OutputPublisher>,
    ) -> WorkerResult<Self> {
        let registry = Arc::new(JobRegistry::new(config.job_retention));
        let pipeline = Arc::new(RenderPipeline::new(&config, builder, publisher)?);
        let scheduler = Scheduler::new(
            Arc::clone(&registry),
            pipeline,
            config.max_concurrent_jobs,
        );

        let (stop, stop_rx) = watch::channel(false);
        let dispatcher = scheduler.start();
        let sweeper = RetentionSweeper::new(Arc::clone(&registry), config.retention_sweep_interval)
            .spawn(stop_rx);

        info!(
            max_concurrent_jobs = config.max_concurrent_jobs,
            render_timeout_secs = config.render_timeout.as_secs(),
            work_dir = %config.work_dir.display(),
            "Render service started"
        );

        Ok(Self {
            config,
            registry,
            scheduler,
            stop,
            tasks: std::sync::Mutex::new(vec![dispatcher, sweeper]),
        })
    }

    /// Queue a validated request. Returns as soon as the job is visible.
    pub fn submit(&self, request: JobRequest) -> WorkerResult<JobId> {
        self.scheduler.submit(request)
    }

    /// Current snapshot of a job.
    pub fn status(&self, id: &JobId) -> RegistryResult<Job> {
        self.registry.get(id)
    }

    pub fn cancel(&self, id: &JobId) -> RegistryResult<CancelOutcome> {
        self.scheduler.cancel(id)
    }

    pub fn state_counts(&self) -> StateCounts {
        self.registry.state_counts()
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Stop accepting jobs, drain in-flight renders and stop background tasks.
    pub async fn shutdown(&self) {
        info!("Shutting down render service");
        self.scheduler.shutdown(self.config.shutdown_timeout).await;
        let _ = self.stop.send(true);

        let tasks: Vec<JoinHandle<()>> = self
            .tasks
            .lock()
            .map(|mut tasks| tasks.drain(..).collect())
            .unwrap_or_default();
        for task in tasks {
            let _ = task.await;
        }
        info!("Render service stopped");
    }
}
