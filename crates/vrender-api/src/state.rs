//! Application state.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use vrender_media::FfmpegCommandBuilder;
use vrender_storage::{publisher_from_config, StorageConfig};
use vrender_worker::{RenderService, WorkerConfig};

use crate::config::ApiConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub service: Arc<RenderService>,
    /// Directory served under `/outputs`
    pub output_dir: PathBuf,
}

impl AppState {
    /// Build the render service from the environment and start it.
    pub async fn new(config: ApiConfig) -> anyhow::Result<Self> {
        let storage = StorageConfig::from_env().context("Invalid storage configuration")?;
        let publisher = publisher_from_config(&storage)
            .await
            .context("Failed to initialize output publisher")?;
        let builder = FfmpegCommandBuilder::from_env().context("Failed to initialize FFmpeg builder")?;

        let service = RenderService::new(WorkerConfig::from_env(), Arc::new(builder), publisher)
            .context("Failed to start render service")?;

        Ok(Self::with_service(config, Arc::new(service), storage.output_dir))
    }

    pub fn with_service(config: ApiConfig, service: Arc<RenderService>, output_dir: PathBuf) -> Self {
        Self {
            config,
            service,
            output_dir,
        }
    }
}
