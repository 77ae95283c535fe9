//! Clip source resolution and download.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use url::Url;
use vrender_models::payload::{is_valid_asset_name, ASSET_SCHEME};

use crate::error::{MediaError, MediaResult};

/// Resolves clip sources to local files.
///
/// `asset://name` maps into the assets root; when the file is missing there
/// and an asset URL prefix is configured, it is downloaded from
/// `{prefix}/{name}` instead. `http(s)` sources are downloaded into the job's
/// scratch directory.
#[derive(Debug, Clone)]
pub struct AssetFetcher {
    client: reqwest::Client,
    assets_root: PathBuf,
    asset_url_prefix: Option<String>,
    max_bytes: u64,
}

impl AssetFetcher {
    pub fn new(
        assets_root: impl Into<PathBuf>,
        asset_url_prefix: Option<String>,
        timeout: Duration,
        max_bytes: u64,
    ) -> MediaResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MediaError::internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            assets_root: assets_root.into(),
            asset_url_prefix,
            max_bytes,
        })
    }

    /// Resolve `src` to a readable local file.
    ///
    /// `index` keeps downloads of different clips from colliding when their
    /// URLs share a file name.
    pub async fn resolve(&self, src: &str, dest_dir: &Path, index: usize) -> MediaResult<PathBuf> {
        if let Some(name) = src.strip_prefix(ASSET_SCHEME) {
            return self.resolve_asset(name, dest_dir, index).await;
        }

        let url = parse_remote(src)?;
        self.download(&url, dest_dir, index).await
    }

    async fn resolve_asset(&self, name: &str, dest_dir: &Path, index: usize) -> MediaResult<PathBuf> {
        if !is_valid_asset_name(name) {
            return Err(MediaError::InvalidAsset(format!("{}{}", ASSET_SCHEME, name)));
        }

        let local = self.assets_root.join(name);
        if tokio::fs::metadata(&local).await.map(|m| m.is_file()).unwrap_or(false) {
            debug!(asset = name, path = %local.display(), "Using local asset");
            return Ok(local);
        }

        match &self.asset_url_prefix {
            Some(prefix) => {
                let url = parse_remote(&format!("{}/{}", prefix.trim_end_matches('/'), name))?;
                self.download(&url, dest_dir, index).await
            }
            None => Err(MediaError::asset_fetch(
                format!("asset '{}' not found under {}", name, self.assets_root.display()),
                None,
            )),
        }
    }

    async fn download(&self, url: &Url, dest_dir: &Path, index: usize) -> MediaResult<PathBuf> {
        let path = dest_dir.join(format!("{:03}_{}", index, safe_filename_from_url(url)));

        info!(url = %url, "Downloading clip source");

        let mut response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| MediaError::asset_fetch(format!("GET {} failed: {}", url, e), None))?;

        let status = response.status();
        if !status.is_success() {
            return Err(MediaError::asset_fetch(
                format!("GET {} returned {}", url, status),
                Some(status.as_u16()),
            ));
        }

        if let Some(length) = response.content_length() {
            if length > self.max_bytes {
                return Err(self.too_large(url));
            }
        }

        let mut file = tokio::fs::File::create(&path).await?;
        let mut written: u64 = 0;
        loop {
            let chunk = response
                .chunk()
                .await
                .map_err(|e| MediaError::asset_fetch(format!("reading {} failed: {}", url, e), None))?;
            let Some(chunk) = chunk else {
                break;
            };
            written += chunk.len() as u64;
            if written > self.max_bytes {
                drop(file);
                let _ = tokio::fs::remove_file(&path).await;
                return Err(self.too_large(url));
            }
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        if written == 0 {
            return Err(MediaError::asset_fetch(format!("{} returned an empty body", url), None));
        }

        debug!(url = %url, bytes = written, path = %path.display(), "Clip source downloaded");
        Ok(path)
    }

    fn too_large(&self, url: &Url) -> MediaError {
        MediaError::asset_fetch(
            format!("clip source {} exceeds the {} byte limit", url, self.max_bytes),
            None,
        )
    }
}

fn parse_remote(src: &str) -> MediaResult<Url> {
    match Url::parse(src) {
        Ok(url) if matches!(url.scheme(), "http" | "https") && url.host_str().is_some() => Ok(url),
        _ => Err(MediaError::InvalidAsset(src.to_string())),
    }
}

/// Last path segment of `url`, reduced to safe characters.
pub fn safe_filename_from_url(url: &Url) -> String {
    let base = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .unwrap_or("");

    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();

    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "asset".to_string()
    } else {
        cleaned.to_string()
    }
}
