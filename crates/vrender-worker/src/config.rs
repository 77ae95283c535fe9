//! Worker configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum concurrently running renders
    pub max_concurrent_jobs: usize,
    /// Wall-clock limit for a single render process
    pub render_timeout: Duration,
    /// Limit for building the render command, clip downloads included
    pub build_timeout: Duration,
    /// Timeout for fetching a remote payload
    pub payload_fetch_timeout: Duration,
    /// Largest accepted remote payload
    pub payload_max_bytes: usize,
    /// Captured process output kept per job
    pub log_buffer_bytes: usize,
    /// How long terminal jobs stay visible
    pub job_retention: Duration,
    /// How often expired jobs are swept
    pub retention_sweep_interval: Duration,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    /// Parent of the per-job scratch directories
    pub work_dir: PathBuf,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 1, // one NVENC session per GPU by default
            render_timeout: Duration::from_secs(1800),
            build_timeout: Duration::from_secs(600),
            payload_fetch_timeout: Duration::from_secs(60),
            payload_max_bytes: 5 * 1024 * 1024,
            log_buffer_bytes: 64 * 1024,
            job_retention: Duration::from_secs(3600),
            retention_sweep_interval: Duration::from_secs(60),
            shutdown_timeout: Duration::from_secs(30),
            work_dir: std::env::temp_dir().join("vrender"),
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_concurrent_jobs: std::env::var("WORKER_MAX_JOBS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.max_concurrent_jobs),
            render_timeout: Duration::from_secs(
                std::env::var("RENDER_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(1800),
            ),
            build_timeout: Duration::from_secs(
                std::env::var("BUILD_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .filter(|n: &u64| *n > 0)
                    .unwrap_or(600),
            ),
            payload_fetch_timeout: Duration::from_secs(
                std::env::var("PAYLOAD_FETCH_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(60),
            ),
            payload_max_bytes: std::env::var("PAYLOAD_MAX_BYTES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.payload_max_bytes),
            log_buffer_bytes: std::env::var("LOG_BUFFER_BYTES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.log_buffer_bytes),
            job_retention: Duration::from_secs(
                std::env::var("JOB_RETENTION_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(3600),
            ),
            retention_sweep_interval: Duration::from_secs(
                std::env::var("RETENTION_SWEEP_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .filter(|n: &u64| *n > 0)
                    .unwrap_or(60),
            ),
            shutdown_timeout: Duration::from_secs(
                std::env::var("WORKER_SHUTDOWN_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
            work_dir: std::env::var("WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
        }
    }
}
