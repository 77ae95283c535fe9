//! Axum HTTP API server for render jobs.
//!
//! This crate provides:
//! - Job submission, polling and cancellation endpoints
//! - Liveness and readiness probes
//! - Static serving of locally published outputs
//! - Prometheus metrics

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod state;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
