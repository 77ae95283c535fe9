//! Published output locations.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Where a finished render can be retrieved from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "storage", rename_all = "snake_case")]
pub enum OutputLocation {
    /// Kept in the local output directory and served under `/outputs`.
    Local { path: PathBuf, url: String },
    /// Uploaded to object storage.
    Remote { bucket: String, key: String, url: String },
}

impl OutputLocation {
    /// URL handed to clients.
    pub fn url(&self) -> &str {
        match self {
            OutputLocation::Local { url, .. } | OutputLocation::Remote { url, .. } => url,
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, OutputLocation::Remote { .. })
    }
}
