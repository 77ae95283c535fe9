//! Output publishing for finished renders.
//!
//! Renders are either moved into a local output directory or uploaded to
//! S3-compatible object storage.

pub mod client;
pub mod config;
pub mod error;
pub mod fs_utils;
pub mod publisher;

pub use client::S3Client;
pub use config::{S3Config, StorageConfig};
pub use error::{StorageError, StorageResult};
pub use fs_utils::{check_writable, move_file};
pub use publisher::{
    content_type_for, publisher_from_config, LocalPublisher, OutputPublisher, S3Publisher,
};
