//! Output publishers.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};
use vrender_models::OutputLocation;

use crate::client::S3Client;
use crate::config::StorageConfig;
use crate::error::StorageResult;
use crate::fs_utils::move_file;

/// Persists a finished render and reports where it can be fetched.
#[async_trait]
pub trait OutputPublisher: Send + Sync {
    /// Publish `local` under `file_name`. The local file may be moved or
    /// removed.
    async fn publish(&self, local: &Path, file_name: &str) -> StorageResult<OutputLocation>;
}

/// Content type for an output file, by extension.
pub fn content_type_for(file_name: &str) -> &'static str {
    let ext = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("webm") => "video/webm",
        Some("mov") => "video/quicktime",
        Some("mkv") => "video/x-matroska",
        Some("gif") => "image/gif",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("mp3") => "audio/mpeg",
        _ => "video/mp4",
    }
}

/// Moves outputs into a directory served under `/outputs`.
#[derive(Debug, Clone)]
pub struct LocalPublisher {
    output_dir: PathBuf,
    base_url: Option<String>,
}

impl LocalPublisher {
    pub fn new(output_dir: impl Into<PathBuf>, base_url: Option<String>) -> Self {
        Self {
            output_dir: output_dir.into(),
            base_url,
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn url_for(&self, file_name: &str) -> String {
        match &self.base_url {
            Some(base) => format!("{}/outputs/{}", base.trim_end_matches('/'), file_name),
            None => format!("/outputs/{}", file_name),
        }
    }
}

#[async_trait]
impl OutputPublisher for LocalPublisher {
    async fn publish(&self, local: &Path, file_name: &str) -> StorageResult<OutputLocation> {
        let path = self.output_dir.join(file_name);
        move_file(local, &path).await?;
        info!(path = %path.display(), "Output published locally");

        Ok(OutputLocation::Local {
            url: self.url_for(file_name),
            path,
        })
    }
}

/// Uploads outputs to S3-compatible object storage.
pub struct S3Publisher {
    client: S3Client,
    local: LocalPublisher,
}

impl S3Publisher {
    /// `local` receives a copy of each output when `keep_local` is set.
    pub fn new(client: S3Client, local: LocalPublisher) -> Self {
        Self { client, local }
    }
}

#[async_trait]
impl OutputPublisher for S3Publisher {
    async fn publish(&self, local: &Path, file_name: &str) -> StorageResult<OutputLocation> {
        let config = self.client.config();
        let key = config.key_for(file_name);

        self.client
            .upload_file(local, &key, content_type_for(file_name))
            .await?;

        if config.keep_local {
            if let Err(e) = self.local.publish(local, file_name).await {
                warn!("Uploaded output but failed to keep local copy: {}", e);
            }
        } else if let Err(e) = tokio::fs::remove_file(local).await {
            warn!("Failed to remove uploaded file {}: {}", local.display(), e);
        }

        Ok(OutputLocation::Remote {
            bucket: config.bucket.clone(),
            url: config.url_for(&key),
            key,
        })
    }
}

/// Build the publisher selected by `config`.
pub async fn publisher_from_config(config: &StorageConfig) -> StorageResult<Arc<dyn OutputPublisher>> {
    let local = LocalPublisher::new(config.output_dir.clone(), config.output_base_url.clone());

    match &config.s3 {
        Some(s3) => {
            info!(bucket = %s3.bucket, region = %s3.region, "Publishing outputs to object storage");
            let client = S3Client::new(s3.clone()).await?;
            Ok(Arc::new(S3Publisher::new(client, local)))
        }
        None => {
            info!(dir = %config.output_dir.display(), "Publishing outputs locally");
            Ok(Arc::new(local))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_content_type_for() {
        assert_eq!(content_type_for("demo.mp4"), "video/mp4");
        assert_eq!(content_type_for("demo.WEBM"), "video/webm");
        assert_eq!(content_type_for("demo"), "video/mp4");
    }

    #[test]
    fn test_local_urls() {
        let relative = LocalPublisher::new("/out", None);
        assert_eq!(relative.url_for("a.mp4"), "/outputs/a.mp4");

        let absolute = LocalPublisher::new("/out", Some("https://render.example.com/".to_string()));
        assert_eq!(absolute.url_for("a.mp4"), "https://render.example.com/outputs/a.mp4");
    }

    #[tokio::test]
    async fn test_local_publish_moves_file() {
        let work = TempDir::new().unwrap();
        let outputs = TempDir::new().unwrap();
        let rendered = work.path().join("demo.mp4");
        std::fs::write(&rendered, b"video").unwrap();

        let publisher = LocalPublisher::new(outputs.path(), None);
        let location = publisher.publish(&rendered, "demo.mp4").await.unwrap();

        assert!(!rendered.exists());
        assert_eq!(std::fs::read(outputs.path().join("demo.mp4")).unwrap(), b"video");
        match location {
            OutputLocation::Local { path, url } => {
                assert_eq!(path, outputs.path().join("demo.mp4"));
                assert_eq!(url, "/outputs/demo.mp4");
            }
            other => panic!("unexpected location: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_local_publish_missing_file() {
        let outputs = TempDir::new().unwrap();
        let publisher = LocalPublisher::new(outputs.path(), None);
        let result = publisher
            .publish(Path::new("/nonexistent/demo.mp4"), "demo.mp4")
            .await;
        assert!(result.is_err());
    }
}
