//! Video encoder selection with cached NVENC detection.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

const NVENC_PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// Video encoder used for timeline renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoEncoder {
    Nvenc,
    Libx264,
}

impl VideoEncoder {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoEncoder::Nvenc => "h264_nvenc",
            VideoEncoder::Libx264 => "libx264",
        }
    }

    /// Codec arguments, with `-b:v` overridden by `bitrate` when given.
    pub fn args(&self, bitrate: Option<&str>) -> Vec<String> {
        let args: Vec<&str> = match self {
            VideoEncoder::Nvenc => vec![
                "-c:v", "h264_nvenc", "-preset", "p5", "-rc", "vbr", "-cq", "23",
                "-b:v", bitrate.unwrap_or("6M"), "-maxrate", "8M", "-bufsize", "12M",
            ],
            VideoEncoder::Libx264 => match bitrate {
                Some(rate) => vec!["-c:v", "libx264", "-preset", "medium", "-b:v", rate],
                None => vec!["-c:v", "libx264", "-preset", "medium", "-crf", "20"],
            },
        };
        args.into_iter().map(String::from).collect()
    }
}

/// Chooses between NVENC and libx264.
///
/// The hardware probe runs at most once per selector; the builder owns a
/// single selector for the process lifetime.
#[derive(Debug, Default)]
pub struct EncoderSelector {
    force_cpu: bool,
    force_nvenc: bool,
    nvenc_available: OnceCell<bool>,
}

impl EncoderSelector {
    pub fn new(force_cpu: bool, force_nvenc: bool) -> Self {
        Self {
            force_cpu,
            force_nvenc,
            nvenc_available: OnceCell::new(),
        }
    }

    pub async fn select(&self, ffmpeg: &Path, prefers_nvenc: bool) -> VideoEncoder {
        if self.force_cpu || !(prefers_nvenc || self.force_nvenc) {
            return VideoEncoder::Libx264;
        }

        let available = *self
            .nvenc_available
            .get_or_init(|| async {
                let listed = nvenc_listed(ffmpeg).await;
                let usable = listed && (self.force_nvenc || nvenc_usable(ffmpeg).await);
                info!(listed, usable, "NVENC detection finished");
                usable
            })
            .await;

        if available {
            VideoEncoder::Nvenc
        } else {
            VideoEncoder::Libx264
        }
    }
}

/// Whether `ffmpeg -encoders` lists `h264_nvenc`.
async fn nvenc_listed(ffmpeg: &Path) -> bool {
    let mut cmd = Command::new(ffmpeg);
    cmd.args(["-hide_banner", "-encoders"])
        .stdin(Stdio::null())
        .kill_on_drop(true);

    match tokio::time::timeout(NVENC_PROBE_TIMEOUT, cmd.output()).await {
        Ok(Ok(output)) => {
            String::from_utf8_lossy(&output.stdout).contains("h264_nvenc")
                || String::from_utf8_lossy(&output.stderr).contains("h264_nvenc")
        }
        Ok(Err(e)) => {
            warn!("Failed to list FFmpeg encoders: {}", e);
            false
        }
        Err(_) => {
            warn!("Listing FFmpeg encoders timed out");
            false
        }
    }
}

/// Whether a one second NVENC test encode succeeds.
async fn nvenc_usable(ffmpeg: &Path) -> bool {
    let mut cmd = Command::new(ffmpeg);
    cmd.args([
        "-v", "error", "-f", "lavfi", "-i", "testsrc2=size=320x180:rate=10:duration=1",
        "-c:v", "h264_nvenc", "-f", "null", "-",
    ])
    .stdin(Stdio::null())
    .kill_on_drop(true);

    match tokio::time::timeout(NVENC_PROBE_TIMEOUT, cmd.output()).await {
        Ok(Ok(output)) => {
            if !output.status.success() {
                debug!(
                    "NVENC test encode failed: {}",
                    String::from_utf8_lossy(&output.stderr).trim()
                );
            }
            output.status.success()
        }
        _ => false,
    }
}
