//! Render command building and process supervision.
//!
//! This crate provides:
//! - The [`RenderCommandBuilder`] seam and its FFmpeg implementation
//! - Clip source resolution and download
//! - Cached NVENC detection
//! - A process runner with timeouts, cancellation and process-group kill
//! - Bounded log capture

pub mod assets;
pub mod command;
pub mod encoder;
pub mod error;
pub mod ffmpeg;
pub mod logs;
pub mod runner;

pub use assets::AssetFetcher;
pub use command::{BuildContext, RenderCommandBuilder, RenderInvocation};
pub use encoder::{EncoderSelector, VideoEncoder};
pub use error::{MediaError, MediaResult};
pub use ffmpeg::{check_ffmpeg, FfmpegCommandBuilder, FfmpegConfig};
pub use logs::{LogBuffer, LogStream, DEFAULT_LOG_LIMIT};
pub use runner::{ProcessRunner, FAILURE_LOG_TAIL_BYTES};
