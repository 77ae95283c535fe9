//! FFmpeg command construction for timeline renders.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;
use vrender_models::{OutputSpec, RenderSpec, TimelineClip};

use crate::assets::AssetFetcher;
use crate::command::{BuildContext, RenderCommandBuilder, RenderInvocation};
use crate::encoder::{EncoderSelector, VideoEncoder};
use crate::error::{MediaError, MediaResult};

/// Length of the black fallback video, in seconds.
const FALLBACK_DURATION_SECS: u32 = 10;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp"];

/// FFmpeg builder configuration.
#[derive(Debug, Clone)]
pub struct FfmpegConfig {
    /// Directory `asset://` references resolve into
    pub assets_root: PathBuf,
    /// Remote location for assets missing from `assets_root`
    pub asset_url_prefix: Option<String>,
    /// Per-download timeout
    pub asset_fetch_timeout: Duration,
    /// Largest accepted clip download
    pub asset_max_bytes: u64,
    /// Never use NVENC
    pub force_cpu: bool,
    /// Use NVENC whenever listed, skipping the test encode
    pub force_nvenc: bool,
    /// `-thread_queue_size` for every input
    pub input_queue_size: Option<u32>,
    /// `-probesize` for every input
    pub probe_size: Option<String>,
    /// `-analyzeduration` for every input
    pub analyze_duration: Option<String>,
}

impl Default for FfmpegConfig {
    fn default() -> Self {
        Self {
            assets_root: PathBuf::from("/workspace/assets"),
            asset_url_prefix: None,
            asset_fetch_timeout: Duration::from_secs(300),
            asset_max_bytes: 2 * 1024 * 1024 * 1024,
            force_cpu: false,
            force_nvenc: false,
            input_queue_size: Some(512),
            probe_size: None,
            analyze_duration: None,
        }
    }
}

impl FfmpegConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            assets_root: std::env::var("ASSETS_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.assets_root),
            asset_url_prefix: non_empty_var("ASSET_URL_PREFIX"),
            asset_fetch_timeout: Duration::from_secs(
                std::env::var("ASSET_FETCH_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(300),
            ),
            asset_max_bytes: std::env::var("ASSET_MAX_BYTES")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n: &u64| *n > 0)
                .unwrap_or(defaults.asset_max_bytes),
            force_cpu: env_flag("FORCE_CPU"),
            force_nvenc: env_flag("FORCE_NVENC"),
            input_queue_size: match std::env::var("INPUT_QUEUE_SIZE") {
                Ok(s) if s.trim().is_empty() => None,
                Ok(s) => s.trim().parse().ok().or(defaults.input_queue_size),
                Err(_) => defaults.input_queue_size,
            },
            probe_size: non_empty_var("PROBE_SIZE"),
            analyze_duration: non_empty_var("ANALYZE_DURATION"),
        }
    }

    /// Options inserted before every `-i`.
    pub fn input_options(&self) -> Vec<String> {
        let mut opts = Vec::new();
        if let Some(size) = self.input_queue_size {
            opts.push("-thread_queue_size".to_string());
            opts.push(size.to_string());
        }
        if let Some(probe) = &self.probe_size {
            opts.push("-probesize".to_string());
            opts.push(probe.clone());
        }
        if let Some(duration) = &self.analyze_duration {
            opts.push("-analyzeduration".to_string());
            opts.push(duration.clone());
        }
        opts
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Argument builder for multi-input FFmpeg commands.
#[derive(Debug, Clone, Default)]
pub struct FfmpegArgs {
    /// Options repeated before every `-i`
    input_prefix: Vec<String>,
    /// Input section, including `-i` pairs
    inputs: Vec<String>,
    /// Number of `-i` entries
    input_count: usize,
    /// Output arguments
    output_args: Vec<String>,
}

impl FfmpegArgs {
    pub fn new(input_prefix: Vec<String>) -> Self {
        Self {
            input_prefix,
            ..Default::default()
        }
    }

    /// Add an input with its own options. Returns the input index.
    pub fn input<I, S>(&mut self, options: I, source: impl Into<String>) -> usize
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inputs.extend(options.into_iter().map(Into::into));
        self.inputs.extend(self.input_prefix.iter().cloned());
        self.inputs.push("-i".to_string());
        self.inputs.push(source.into());
        self.input_count += 1;
        self.input_count - 1
    }

    pub fn output_arg(&mut self, arg: impl Into<String>) -> &mut Self {
        self.output_args.push(arg.into());
        self
    }

    pub fn output_args<I, S>(&mut self, args: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn filter_complex(&mut self, filters: &[String]) -> &mut Self {
        if !filters.is_empty() {
            self.output_arg("-filter_complex").output_arg(filters.join(";"));
        }
        self
    }

    pub fn map(&mut self, label: impl Into<String>) -> &mut Self {
        self.output_arg("-map").output_arg(label)
    }

    pub fn build(&self, output: &Path) -> Vec<String> {
        let mut args = vec!["-y".to_string(), "-hide_banner".to_string()];
        args.extend(self.inputs.iter().cloned());
        args.extend(self.output_args.iter().cloned());
        args.push(output.to_string_lossy().to_string());
        args
    }
}

fn secs(value: f64) -> String {
    format!("{:.3}", value)
}

fn is_image(clip: &TimelineClip, path: &Path) -> bool {
    clip.kind == vrender_models::ClipKind::Image
        || path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
            .unwrap_or(false)
}

/// Arguments for the black fallback render.
pub fn fallback_args(output: &OutputSpec, output_path: &Path) -> Vec<String> {
    let mut args = FfmpegArgs::default();
    args.input(
        ["-f", "lavfi"],
        format!(
            "color=c=black:s={}x{}:d={}",
            output.width, output.height, FALLBACK_DURATION_SECS
        ),
    );
    args.output_args(["-r", output.fps.to_string().as_str()])
        .output_args(["-c:v", "libx264", "-preset", "veryfast", "-crf", "23"])
        .output_args(["-pix_fmt", "yuv420p"]);
    args.build(output_path)
}

/// Arguments for a timeline render.
///
/// `visual_sources` and `audio_sources` are the resolved local files for
/// `spec.visual_clips()` and `spec.audio_clips()`, in the same order.
pub fn timeline_args(
    spec: &RenderSpec,
    visual_sources: &[PathBuf],
    audio_sources: &[PathBuf],
    encoder: VideoEncoder,
    input_options: Vec<String>,
    output_path: &Path,
) -> Vec<String> {
    let OutputSpec {
        width: w,
        height: h,
        fps,
        ..
    } = spec.output;

    let mut args = FfmpegArgs::new(input_options);
    let mut filters = Vec::new();

    let mut visual_labels = Vec::new();
    for (i, (clip, source)) in spec.visual_clips().zip(visual_sources).enumerate() {
        let length = secs(clip.length.max(0.01));
        let source = source.to_string_lossy().to_string();
        let idx = if is_image(clip, Path::new(&source)) {
            args.input(["-loop", "1", "-t", length.as_str()], source)
        } else {
            args.input(["-ss", "0", "-t", length.as_str()], source)
        };

        let sizing = match clip.fit.as_deref() {
            Some("cover") | Some("crop") => format!(
                "scale={w}:{h}:force_original_aspect_ratio=increase,crop={w}:{h}"
            ),
            _ => format!(
                "scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2:color=black"
            ),
        };
        let mut chain = format!("[{idx}:v]{sizing},setsar=1,fps={fps},format=yuva420p");
        if let Some(opacity) = clip.opacity {
            chain.push_str(&format!(",colorchannelmixer=aa={}", opacity));
        }
        chain.push_str(&format!("[b{i}]"));
        filters.push(chain);
        visual_labels.push(format!("[b{i}]"));
    }

    let mut audio_labels = Vec::new();
    for (j, (clip, source)) in spec.audio_clips().zip(audio_sources).enumerate() {
        let length = clip.length.max(0.01);
        let delay_ms = (clip.start.max(0.0) * 1000.0).round() as u64;
        let volume = clip.volume.unwrap_or(1.0);
        let idx = args.input(["-ss", "0", "-t", secs(length).as_str()], source.to_string_lossy());
        filters.push(format!(
            "[{idx}:a]aresample=async=1,volume={volume},atrim=0:{length:.6},asetpts=PTS-STARTPTS,adelay={delay_ms}|{delay_ms}[a{j}]"
        ));
        audio_labels.push(format!("[a{j}]"));
    }

    let video_map = if !visual_labels.is_empty() {
        filters.push(format!(
            "{}concat=n={}:v=1:a=0[vout]",
            visual_labels.concat(),
            visual_labels.len()
        ));
        "[vout]".to_string()
    } else {
        // Audio-only timelines play over a black background.
        let idx = args.input(
            ["-f", "lavfi"],
            format!("color=c=black:s={}x{}:r={}:d={}", w, h, fps, secs(spec.duration())),
        );
        format!("{idx}:v")
    };

    let audio_map = match audio_labels.len() {
        0 => None,
        1 => audio_labels.first().cloned(),
        n => {
            filters.push(format!(
                "{}amix=inputs={}:normalize=0:dropout_transition=0[aout]",
                audio_labels.concat(),
                n
            ));
            Some("[aout]".to_string())
        }
    };

    args.filter_complex(&filters).map(video_map);
    if let Some(label) = &audio_map {
        args.map(label.as_str());
    }

    args.output_args(encoder.args(spec.output.bitrate.as_deref()))
        .output_args(["-r", fps.to_string().as_str(), "-pix_fmt", "yuv420p"]);
    if audio_map.is_some() {
        args.output_args(["-c:a", "aac", "-b:a", "192k"]);
    }
    args.output_arg("-shortest");

    args.build(output_path)
}

/// Locate the FFmpeg binary.
pub fn check_ffmpeg() -> MediaResult<PathBuf> {
    which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)
}

/// Default [`RenderCommandBuilder`] producing FFmpeg invocations.
pub struct FfmpegCommandBuilder {
    config: FfmpegConfig,
    fetcher: AssetFetcher,
    encoders: EncoderSelector,
}

impl FfmpegCommandBuilder {
    pub fn new(config: FfmpegConfig) -> MediaResult<Self> {
        let fetcher = AssetFetcher::new(
            config.assets_root.clone(),
            config.asset_url_prefix.clone(),
            config.asset_fetch_timeout,
            config.asset_max_bytes,
        )?;
        let encoders = EncoderSelector::new(config.force_cpu, config.force_nvenc);
        Ok(Self {
            config,
            fetcher,
            encoders,
        })
    }

    pub fn from_env() -> MediaResult<Self> {
        Self::new(FfmpegConfig::from_env())
    }

    pub fn config(&self) -> &FfmpegConfig {
        &self.config
    }
}

#[async_trait]
impl RenderCommandBuilder for FfmpegCommandBuilder {
    async fn build(&self, spec: &RenderSpec, ctx: &BuildContext) -> MediaResult<RenderInvocation> {
        let ffmpeg = check_ffmpeg()?;
        let output_path = ctx.output_path();

        if spec.is_empty() {
            info!(job_id = %ctx.job_id, "No timeline clips, using black fallback");
            let args = fallback_args(&spec.output, &output_path);
            return Ok(RenderInvocation::new(ffmpeg, args, output_path));
        }

        let mut index = 0;
        let mut visual_sources = Vec::new();
        for clip in spec.visual_clips() {
            visual_sources.push(self.fetcher.resolve(&clip.src, &ctx.work_dir, index).await?);
            index += 1;
        }
        let mut audio_sources = Vec::new();
        for clip in spec.audio_clips() {
            audio_sources.push(self.fetcher.resolve(&clip.src, &ctx.work_dir, index).await?);
            index += 1;
        }

        let encoder = self.encoders.select(&ffmpeg, spec.prefers_nvenc()).await;
        info!(
            job_id = %ctx.job_id,
            encoder = encoder.as_str(),
            visual_clips = visual_sources.len(),
            audio_clips = audio_sources.len(),
            "Building timeline render"
        );

        let args = timeline_args(
            spec,
            &visual_sources,
            &audio_sources,
            encoder,
            self.config.input_options(),
            &output_path,
        );
        Ok(RenderInvocation::new(ffmpeg, args, output_path))
    }
}
