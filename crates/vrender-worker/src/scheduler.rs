//! FIFO scheduler with a bounded worker pool.
//!
//! A single dispatcher task acquires a worker slot first and only then pops
//! the queue, so jobs are claimed in submission order and never more than
//! `max_concurrent_jobs` run at once. The claim (queue pop + `running`
//! transition) happens under the scheduler lock; the slot is held until the
//! job's terminal transition has been recorded.
//!
//! Lock order is always scheduler state, then registry.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{watch, Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use vrender_models::{Job, JobFailure, JobId, JobRequest};

use crate::error::{WorkerError, WorkerResult};
use crate::metrics;
use crate::pipeline::{RenderOutcome, RenderPipeline};
use crate::registry::{JobRegistry, RegistryResult, Transition};

/// How long shutdown waits for cancelled jobs to wind down.
pub const CANCEL_GRACE: Duration = Duration::from_secs(10);

/// What a cancel request did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// Removed from the queue and marked failed
    Dequeued,
    /// Running job signalled; it will end as failed/Cancelled
    Signalled,
    /// Already terminal, nothing to do
    AlreadyFinished,
}

impl CancelOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CancelOutcome::Dequeued => "dequeued",
            CancelOutcome::Signalled => "signalled",
            CancelOutcome::AlreadyFinished => "already_finished",
        }
    }
}

#[derive(Debug, Default)]
struct SchedulerState {
    pending: VecDeque<JobId>,
    running: HashMap<JobId, watch::Sender<bool>>,
    closed: bool,
}

/// Job scheduler and worker pool.
pub struct Scheduler {
    registry: Arc<JobRegistry>,
    pipeline: Arc<RenderPipeline>,
    state: Mutex<SchedulerState>,
    notify: Notify,
    slots: Arc<Semaphore>,
    max_concurrent_jobs: usize,
    shutdown: watch::Sender<bool>,
}

impl Scheduler {
    pub fn new(
        registry: Arc<JobRegistry>,
        pipeline: Arc<RenderPipeline>,
        max_concurrent_jobs: usize,
    ) -> Arc<Self> {
        let max_concurrent_jobs = max_concurrent_jobs.max(1);
        let (shutdown, _) = watch::channel(false);

        Arc::new(Self {
            registry,
            pipeline,
            state: Mutex::new(SchedulerState::default()),
            notify: Notify::new(),
            slots: Arc::new(Semaphore::new(max_concurrent_jobs)),
            max_concurrent_jobs,
            shutdown,
        })
    }

    /// Start the dispatcher.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        info!(
            "Starting scheduler with {} max concurrent jobs",
            self.max_concurrent_jobs
        );
        tokio::spawn(Arc::clone(self).dispatch())
    }

    /// Create a queued job and append it to the queue. Never blocks.
    pub fn submit(&self, request: JobRequest) -> WorkerResult<JobId> {
        let mut state = self.lock_state();
        if state.closed {
            return Err(WorkerError::ShuttingDown);
        }

        let id = self.registry.create(request);
        state.pending.push_back(id.clone());
        metrics::record_job_submitted();
        metrics::set_pool_gauges(state.pending.len(), state.running.len());
        drop(state);

        debug!(job_id = %id, "Job queued");
        self.notify.notify_one();
        Ok(id)
    }

    /// Cancel a job.
    pub fn cancel(&self, id: &JobId) -> RegistryResult<CancelOutcome> {
        let mut state = self.lock_state();

        if let Some(pos) = state.pending.iter().position(|queued| queued == id) {
            state.pending.remove(pos);
            self.fail_queued(id, &state)?;
            info!(job_id = %id, "Queued job cancelled");
            return Ok(CancelOutcome::Dequeued);
        }

        if let Some(cancel) = state.running.get(id) {
            let _ = cancel.send(true);
            info!(job_id = %id, "Cancellation signalled to running job");
            return Ok(CancelOutcome::Signalled);
        }

        // Neither queued nor running: the job is terminal, or its terminal
        // transition is being recorded by `finish`, which needs this lock.
        let job = self.registry.get(id)?;
        if !job.is_terminal() {
            warn!(job_id = %id, state = %job.state(), "Cancel found job outside queue and pool");
        }
        Ok(CancelOutcome::AlreadyFinished)
    }

    fn fail_queued(&self, id: &JobId, state: &SchedulerState) -> RegistryResult<()> {
        self.registry.transition(
            id,
            Transition::Fail {
                failure: JobFailure::Cancelled,
                logs: None,
            },
        )?;
        metrics::record_job_failed(JobFailure::Cancelled.kind());
        metrics::set_pool_gauges(state.pending.len(), state.running.len());
        Ok(())
    }

    /// Stop dispatching and wait for in-flight jobs.
    ///
    /// Running jobs still going after `timeout` are signalled to cancel, and
    /// shutdown waits up to [`CANCEL_GRACE`] for them to record their
    /// terminal state. Queued jobs stay queued.
    pub async fn shutdown(&self, timeout: Duration) {
        self.lock_state().closed = true;
        let _ = self.shutdown.send(true);

        info!("Waiting for in-flight jobs to complete...");
        if tokio::time::timeout(timeout, self.wait_for_jobs()).await.is_err() {
            warn!("Jobs still running after {:?}, cancelling them", timeout);
            for cancel in self.lock_state().running.values() {
                let _ = cancel.send(true);
            }
            if tokio::time::timeout(CANCEL_GRACE, self.wait_for_jobs()).await.is_err() {
                error!(
                    running = self.lock_state().running.len(),
                    "Cancelled jobs did not finish within {:?}", CANCEL_GRACE
                );
            }
        }
        info!("Scheduler stopped");
    }

    async fn wait_for_jobs(&self) {
        loop {
            if self.slots.available_permits() == self.max_concurrent_jobs {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    async fn dispatch(self: Arc<Self>) {
        let mut shutdown = self.shutdown.subscribe();

        loop {
            if *shutdown.borrow_and_update() {
                break;
            }

            let permit = tokio::select! {
                permit = Arc::clone(&self.slots).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                _ = shutdown.changed() => continue,
            };

            let claimed = loop {
                if let Some(claimed) = self.claim_next() {
                    break Some(claimed);
                }
                tokio::select! {
                    _ = self.notify.notified() => {}
                    _ = shutdown.changed() => break None,
                }
            };

            match claimed {
                Some((job, cancel)) => self.spawn_job(job, cancel, permit),
                None => continue,
            }
        }

        debug!("Dispatcher stopped");
    }

    /// Pop the next queued job and mark it running.
    fn claim_next(&self) -> Option<(Job, watch::Receiver<bool>)> {
        let mut state = self.lock_state();

        while let Some(id) = state.pending.pop_front() {
            match self.registry.transition(&id, Transition::Start) {
                Ok(job) => {
                    let (cancel_tx, cancel_rx) = watch::channel(false);
                    state.running.insert(id, cancel_tx);
                    metrics::set_pool_gauges(state.pending.len(), state.running.len());
                    return Some((job, cancel_rx));
                }
                Err(e) => warn!(job_id = %id, "Skipping queued job: {}", e),
            }
        }
        None
    }

    fn spawn_job(
        self: &Arc<Self>,
        job: Job,
        cancel: watch::Receiver<bool>,
        permit: OwnedSemaphorePermit,
    ) {
        let scheduler = Arc::clone(self);

        tokio::spawn(async move {
            let _permit = permit;
            let id = job.id.clone();

            // The pipeline runs in its own task so a panic is caught here
            // and still produces a terminal transition.
            let pipeline = Arc::clone(&scheduler.pipeline);
            let task = tokio::spawn(async move { pipeline.execute(&job, cancel).await });
            let outcome = match task.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(job_id = %id, "Render task aborted: {}", e);
                    RenderOutcome::failed(JobFailure::RenderFailed {
                        exit_code: None,
                        log_tail: format!("render task aborted: {}", e),
                    })
                }
            };

            scheduler.finish(&id, outcome);
        });
    }

    /// Record the terminal transition and release the job's running entry.
    fn finish(&self, id: &JobId, outcome: RenderOutcome) {
        let mut state = self.lock_state();
        state.running.remove(id);

        let (transition, failure_kind) = match outcome.result {
            Ok(output) => (
                Transition::Succeed {
                    output,
                    logs: outcome.logs,
                },
                None,
            ),
            Err(failure) => {
                let kind = failure.kind();
                (
                    Transition::Fail {
                        failure,
                        logs: outcome.logs,
                    },
                    Some(kind),
                )
            }
        };

        match self.registry.transition(id, transition) {
            Ok(_) => match failure_kind {
                None => metrics::record_job_completed(),
                Some(kind) => metrics::record_job_failed(kind),
            },
            Err(e) => error!(job_id = %id, "Failed to record job outcome: {}", e),
        }
        metrics::set_pool_gauges(state.pending.len(), state.running.len());
    }

    fn lock_state(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
