//! Render job worker.
//!
//! This crate provides:
//! - In-memory job registry with an enforced state machine
//! - FIFO scheduler over a bounded worker pool
//! - Payload resolution and the per-job render pipeline
//! - Retention sweeping and graceful shutdown

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod registry;
pub mod resolver;
pub mod retention;
pub mod scheduler;
pub mod service;

pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use logging::{JobLogger, Stage};
pub use pipeline::{failure_from, RenderOutcome, RenderPipeline};
pub use registry::{JobRegistry, RegistryError, RegistryResult, StateCounts, Transition};
pub use resolver::PayloadResolver;
pub use retention::{sweep, RetentionSweeper};
pub use scheduler::{CancelOutcome, Scheduler};
pub use service::RenderService;
