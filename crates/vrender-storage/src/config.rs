//! Storage configuration.

use std::path::PathBuf;

use crate::error::{StorageError, StorageResult};

/// Where and how finished renders are published.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Directory locally published outputs are moved into
    pub output_dir: PathBuf,
    /// Absolute base for local output URLs; relative `/outputs/..` when unset
    pub output_base_url: Option<String>,
    /// Object storage settings, when uploads are enabled
    pub s3: Option<S3Config>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("/workspace/outputs"),
            output_base_url: None,
            s3: None,
        }
    }
}

impl StorageConfig {
    /// Create config from environment variables.
    ///
    /// Uploads are enabled when `S3_BUCKET` is set.
    pub fn from_env() -> StorageResult<Self> {
        Ok(Self {
            output_dir: std::env::var("OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("/workspace/outputs")),
            output_base_url: non_empty_var("OUTPUT_BASE_URL"),
            s3: match non_empty_var("S3_BUCKET") {
                Some(bucket) => Some(S3Config::from_env(bucket)?),
                None => None,
            },
        })
    }
}

/// S3-compatible object storage settings.
#[derive(Debug, Clone)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    /// Key prefix, e.g. `renders/`
    pub prefix: String,
    /// Public URL base for uploaded objects
    pub public_base_url: Option<String>,
    /// Custom endpoint for S3-compatible stores (path-style addressing)
    pub endpoint_url: Option<String>,
    /// Explicit credentials; the default AWS provider chain is used otherwise
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    /// Also keep a copy in the local output directory
    pub keep_local: bool,
    /// Upload with the `public-read` ACL
    pub public_read: bool,
}

impl S3Config {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            region: "us-west-2".to_string(),
            prefix: "renders/".to_string(),
            public_base_url: None,
            endpoint_url: None,
            access_key_id: None,
            secret_access_key: None,
            keep_local: false,
            public_read: true,
        }
    }

    fn from_env(bucket: String) -> StorageResult<Self> {
        let access_key_id = non_empty_var("S3_ACCESS_KEY_ID");
        let secret_access_key = non_empty_var("S3_SECRET_ACCESS_KEY");
        if access_key_id.is_some() != secret_access_key.is_some() {
            return Err(StorageError::config_error(
                "S3_ACCESS_KEY_ID and S3_SECRET_ACCESS_KEY must be set together",
            ));
        }

        let defaults = Self::new(bucket);
        Ok(Self {
            region: non_empty_var("S3_REGION").unwrap_or(defaults.region.clone()),
            prefix: std::env::var("S3_PREFIX").unwrap_or(defaults.prefix.clone()),
            public_base_url: non_empty_var("PUBLIC_BASE_URL"),
            endpoint_url: non_empty_var("S3_ENDPOINT_URL"),
            access_key_id,
            secret_access_key,
            keep_local: env_flag("S3_KEEP_LOCAL").unwrap_or(false),
            public_read: env_flag("S3_PUBLIC_READ").unwrap_or(true),
            ..defaults
        })
    }

    /// Object key for an output file.
    pub fn key_for(&self, file_name: &str) -> String {
        format!("{}{}", self.prefix, file_name)
    }

    /// Public URL for an object key.
    pub fn url_for(&self, key: &str) -> String {
        if let Some(base) = &self.public_base_url {
            return format!("{}/{}", base.trim_end_matches('/'), key);
        }
        match &self.endpoint_url {
            Some(endpoint) => format!("{}/{}/{}", endpoint.trim_end_matches('/'), self.bucket, key),
            None => format!("https://{}.s3.{}.amazonaws.com/{}", self.bucket, self.region, key),
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_flag(name: &str) -> Option<bool> {
    std::env::var(name).ok().and_then(|v| {
        match v.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => None,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_object_url() {
        let config = S3Config::new("media");
        let key = config.key_for("demo.mp4");
        assert_eq!(key, "renders/demo.mp4");
        assert_eq!(
            config.url_for(&key),
            "https://media.s3.us-west-2.amazonaws.com/renders/demo.mp4"
        );
    }

    #[test]
    fn test_public_base_url() {
        let config = S3Config {
            public_base_url: Some("https://cdn.example.com/".to_string()),
            ..S3Config::new("media")
        };
        assert_eq!(
            config.url_for("renders/a.mp4"),
            "https://cdn.example.com/renders/a.mp4"
        );
    }

    #[test]
    fn test_custom_endpoint_url() {
        let config = S3Config {
            endpoint_url: Some("http://localhost:9000".to_string()),
            prefix: String::new(),
            ..S3Config::new("media")
        };
        assert_eq!(config.url_for(&config.key_for("a.mp4")), "http://localhost:9000/media/a.mp4");
    }
}
