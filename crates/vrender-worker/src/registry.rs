//! In-memory job registry.
//!
//! The registry is the single source of truth for job records. Every
//! mutation goes through [`JobRegistry::transition`], which validates the
//! move against the state machine and applies it under one write lock, so
//! readers never observe a half-updated job.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use vrender_models::{Job, JobFailure, JobId, JobPhase, JobRequest, JobState, OutputLocation};

pub type RegistryResult<T> = Result<T, RegistryError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("Job not found: {0}")]
    NotFound(JobId),

    #[error("Invalid transition for job {id}: {from} -> {to}")]
    InvalidTransition {
        id: JobId,
        from: JobState,
        to: JobState,
    },
}

/// A requested state change.
#[derive(Debug, Clone)]
pub enum Transition {
    /// Claimed by a worker
    Start,
    /// Output published
    Succeed {
        output: OutputLocation,
        logs: Option<String>,
    },
    /// Terminated with a failure
    Fail {
        failure: JobFailure,
        logs: Option<String>,
    },
}

impl Transition {
    pub fn target(&self) -> JobState {
        match self {
            Transition::Start => JobState::Running,
            Transition::Succeed { .. } => JobState::Succeeded,
            Transition::Fail { .. } => JobState::Failed,
        }
    }
}

/// Number of jobs in each state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StateCounts {
    pub queued: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
}

#[derive(Debug)]
struct Record {
    job: Job,
    expires_at: Option<DateTime<Utc>>,
}

/// Thread-safe job store.
#[derive(Debug)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<JobId, Record>>,
    retention: chrono::Duration,
}

impl JobRegistry {
    /// `retention` is how long a terminal job stays visible.
    pub fn new(retention: Duration) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            retention: chrono::Duration::from_std(retention)
                .unwrap_or_else(|_| chrono::Duration::days(36_500)),
        }
    }

    /// Create a queued job with a fresh id.
    pub fn create(&self, request: JobRequest) -> JobId {
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);

        let mut id = JobId::new();
        while jobs.contains_key(&id) {
            id = JobId::new();
        }

        jobs.insert(
            id.clone(),
            Record {
                job: Job::new(id.clone(), request),
                expires_at: None,
            },
        );
        id
    }

    /// Snapshot of a job.
    pub fn get(&self, id: &JobId) -> RegistryResult<Job> {
        let jobs = self.jobs.read().unwrap_or_else(PoisonError::into_inner);
        jobs.get(id)
            .map(|record| record.job.clone())
            .ok_or_else(|| RegistryError::NotFound(id.clone()))
    }

    /// Apply a state transition. Returns the updated job.
    pub fn transition(&self, id: &JobId, transition: Transition) -> RegistryResult<Job> {
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        let record = jobs
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.clone()))?;

        let from = record.job.state();
        let to = transition.target();
        if !from.can_transition_to(to) {
            return Err(RegistryError::InvalidTransition {
                id: id.clone(),
                from,
                to,
            });
        }

        let now = Utc::now();
        let job = &mut record.job;
        match transition {
            Transition::Start => {
                job.phase = JobPhase::Running;
                job.message = "Rendering".to_string();
                job.started_at = Some(now);
            }
            Transition::Succeed { output, logs } => {
                job.phase = JobPhase::Succeeded { output };
                job.message = "Render completed".to_string();
                job.logs = logs;
                job.finished_at = Some(now);
            }
            Transition::Fail { failure, logs } => {
                job.message = failure.to_string();
                job.phase = JobPhase::Failed { failure };
                job.logs = logs;
                job.finished_at = Some(now);
            }
        }

        if to.is_terminal() {
            let deadline = now
                .checked_add_signed(self.retention)
                .unwrap_or(DateTime::<Utc>::MAX_UTC);
            record.expires_at = Some(deadline);
        }

        Ok(record.job.clone())
    }

    /// Remove terminal jobs whose retention deadline is at or before `now`.
    pub fn evict_expired(&self, now: DateTime<Utc>) -> Vec<JobId> {
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        let expired: Vec<JobId> = jobs
            .iter()
            .filter(|(_, record)| {
                record.job.is_terminal() && record.expires_at.map(|t| t <= now).unwrap_or(false)
            })
            .map(|(id, _)| id.clone())
            .collect();

        for id in &expired {
            jobs.remove(id);
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.jobs.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn state_counts(&self) -> StateCounts {
        let jobs = self.jobs.read().unwrap_or_else(PoisonError::into_inner);
        let mut counts = StateCounts::default();
        for record in jobs.values() {
            match record.job.state() {
                JobState::Queued => counts.queued += 1,
                JobState::Running => counts.running += 1,
                JobState::Succeeded => counts.succeeded += 1,
                JobState::Failed => counts.failed += 1,
            }
        }
        counts
    }
}
