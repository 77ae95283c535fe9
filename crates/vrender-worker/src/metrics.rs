//! Job metrics.
//!
//! Recorded through the `metrics` facade; the API binary installs the
//! Prometheus recorder. Without a recorder these calls are no-ops.

use metrics::{counter, gauge, histogram};
use vrender_models::FailureKind;

/// Metric names as constants for consistency.
pub mod names {
    pub const JOBS_SUBMITTED_TOTAL: &str = "vrender_jobs_submitted_total";
    pub const JOBS_COMPLETED_TOTAL: &str = "vrender_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "vrender_jobs_failed_total";
    pub const JOBS_EVICTED_TOTAL: &str = "vrender_jobs_evicted_total";
    pub const JOBS_RUNNING: &str = "vrender_jobs_running";
    pub const JOBS_QUEUED: &str = "vrender_jobs_queued";

    pub const RENDER_DURATION_SECONDS: &str = "vrender_render_duration_seconds";
    pub const PAYLOAD_FETCH_DURATION_SECONDS: &str = "vrender_payload_fetch_duration_seconds";
    pub const PUBLISH_DURATION_SECONDS: &str = "vrender_publish_duration_seconds";
}

pub fn record_job_submitted() {
    counter!(names::JOBS_SUBMITTED_TOTAL).increment(1);
}

pub fn record_job_completed() {
    counter!(names::JOBS_COMPLETED_TOTAL).increment(1);
}

pub fn record_job_failed(kind: FailureKind) {
    let labels = [("kind", kind.as_str().to_string())];
    counter!(names::JOBS_FAILED_TOTAL, &labels).increment(1);
}

pub fn record_jobs_evicted(count: usize) {
    counter!(names::JOBS_EVICTED_TOTAL).increment(count as u64);
}

/// Update the queue depth and running gauges.
pub fn set_pool_gauges(queued: usize, running: usize) {
    gauge!(names::JOBS_QUEUED).set(queued as f64);
    gauge!(names::JOBS_RUNNING).set(running as f64);
}

pub fn record_render_duration(duration_secs: f64) {
    histogram!(names::RENDER_DURATION_SECONDS).record(duration_secs);
}

pub fn record_payload_fetch_duration(duration_secs: f64) {
    histogram!(names::PAYLOAD_FETCH_DURATION_SECONDS).record(duration_secs);
}

pub fn record_publish_duration(duration_secs: f64) {
    histogram!(names::PUBLISH_DURATION_SECONDS).record(duration_secs);
}
