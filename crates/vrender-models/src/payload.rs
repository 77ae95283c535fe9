//! Render specifications resolved from job payloads.
//!
//! Two payload shapes are accepted:
//! - timeline: `{"timeline": {"tracks": [{"clips": [{"asset": {...}, ...}]}]}}`,
//!   or the same `tracks` array at the top level
//! - internal: `{"output": {...}, "tracks": [{"type": "video", "clips": [{"src", "duration"}]}]}`
//!
//! Both are normalized into a flat, start-ordered list of [`TimelineClip`]s.
//! Unknown keys are ignored, so an object without any tracks is a valid
//! payload that renders the fallback output.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Largest accepted output dimension (8K UHD width).
const MAX_DIMENSION: u32 = 7680;

/// Highest accepted output frame rate.
const MAX_FPS: u32 = 120;

/// Scheme for clip sources resolved inside the local assets root.
pub const ASSET_SCHEME: &str = "asset://";

/// Errors found while validating a payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PayloadError {
    #[error("payload must be a JSON object")]
    NotAnObject,

    #[error("payload is not valid JSON: {0}")]
    Malformed(String),

    #[error("invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },
}

impl PayloadError {
    fn field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Output encoding settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct OutputSpec {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub codec: String,
    /// Target video bitrate, e.g. "6M"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bitrate: Option<String>,
}

impl Default for OutputSpec {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            fps: 30,
            codec: "h264_nvenc".to_string(),
            bitrate: None,
        }
    }
}

impl OutputSpec {
    fn validate(&self) -> Result<(), PayloadError> {
        for (name, value) in [("output.width", self.width), ("output.height", self.height)] {
            if value == 0 || value > MAX_DIMENSION {
                return Err(PayloadError::field(
                    name,
                    format!("must be between 1 and {}", MAX_DIMENSION),
                ));
            }
            if value % 2 != 0 {
                return Err(PayloadError::field(name, "must be even"));
            }
        }
        if self.fps == 0 || self.fps > MAX_FPS {
            return Err(PayloadError::field(
                "output.fps",
                format!("must be between 1 and {}", MAX_FPS),
            ));
        }
        if let Some(bitrate) = &self.bitrate {
            let digits = bitrate.trim_end_matches(['k', 'K', 'm', 'M']);
            if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
                return Err(PayloadError::field("output.bitrate", "expected a value like '6M' or '800k'"));
            }
        }
        Ok(())
    }
}

/// Media kind of a clip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ClipKind {
    Video,
    Image,
    Audio,
}

impl ClipKind {
    fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "video" => Some(ClipKind::Video),
            "image" => Some(ClipKind::Image),
            "audio" => Some(ClipKind::Audio),
            _ => None,
        }
    }

    pub fn is_visual(&self) -> bool {
        matches!(self, ClipKind::Video | ClipKind::Image)
    }
}

/// A normalized timeline clip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TimelineClip {
    pub kind: ClipKind,
    /// `http(s)://` URL or `asset://` reference
    pub src: String,
    /// Start offset on the timeline, in seconds
    pub start: f64,
    /// Duration, in seconds
    pub length: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opacity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<f64>,
}

impl TimelineClip {
    pub fn end(&self) -> f64 {
        self.start + self.length
    }

    /// Asset name for `asset://` sources.
    pub fn asset_name(&self) -> Option<&str> {
        self.src.strip_prefix(ASSET_SCHEME)
    }
}

/// The resolved, validated description of what to render.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct RenderSpec {
    pub output: OutputSpec,
    pub clips: Vec<TimelineClip>,
}

impl RenderSpec {
    /// Parse raw bytes (e.g. a fetched payload document).
    pub fn from_slice(bytes: &[u8]) -> Result<Self, PayloadError> {
        let value: Value =
            serde_json::from_slice(bytes).map_err(|e| PayloadError::Malformed(e.to_string()))?;
        Self::from_value(&value)
    }

    /// Validate a JSON payload and normalize it into a render spec.
    pub fn from_value(value: &Value) -> Result<Self, PayloadError> {
        let root = value.as_object().ok_or(PayloadError::NotAnObject)?;

        let output = match root.get("output") {
            None | Some(Value::Null) => OutputSpec::default(),
            Some(raw) => serde_json::from_value::<OutputSpec>(raw.clone())
                .map_err(|e| PayloadError::field("output", e.to_string()))?,
        };
        output.validate()?;

        let mut clips = Vec::new();
        if let Some((tracks, prefix)) = find_tracks(root) {
            for (t, track) in tracks.iter().enumerate() {
                let Some(track) = track.as_object() else {
                    continue;
                };
                let track_kind = track.get("type").and_then(Value::as_str);
                let Some(track_clips) = track.get("clips").and_then(Value::as_array) else {
                    continue;
                };
                for (c, clip) in track_clips.iter().enumerate() {
                    let Some(clip) = clip.as_object() else {
                        continue;
                    };
                    let path = format!("{}tracks[{}].clips[{}]", prefix, t, c);
                    if let Some(parsed) = parse_clip(clip, track_kind, &path)? {
                        clips.push(parsed);
                    }
                }
            }
        }
        clips.sort_by(|a, b| a.start.total_cmp(&b.start));

        Ok(Self { output, clips })
    }

    pub fn visual_clips(&self) -> impl Iterator<Item = &TimelineClip> {
        self.clips.iter().filter(|c| c.kind.is_visual())
    }

    pub fn audio_clips(&self) -> impl Iterator<Item = &TimelineClip> {
        self.clips.iter().filter(|c| c.kind == ClipKind::Audio)
    }

    /// No renderable clips; the fallback output is produced.
    pub fn is_empty(&self) -> bool {
        self.clips.is_empty()
    }

    /// Whether the payload asked for hardware encoding.
    pub fn prefers_nvenc(&self) -> bool {
        self.output.codec.eq_ignore_ascii_case("h264_nvenc")
    }

    /// Timeline duration in seconds.
    pub fn duration(&self) -> f64 {
        self.clips.iter().map(TimelineClip::end).fold(0.0, f64::max)
    }
}

/// True if `node` looks like `{"tracks": [{"clips": [...]}, ...]}`.
fn has_tracks(node: &Map<String, Value>) -> bool {
    match node.get("tracks").and_then(Value::as_array) {
        Some(tracks) if !tracks.is_empty() => tracks
            .iter()
            .any(|t| t.get("clips").map(Value::is_array).unwrap_or(false)),
        _ => false,
    }
}

fn find_tracks(root: &Map<String, Value>) -> Option<(&Vec<Value>, &'static str)> {
    if let Some(timeline) = root.get("timeline").and_then(Value::as_object) {
        if has_tracks(timeline) {
            return timeline
                .get("tracks")
                .and_then(Value::as_array)
                .map(|t| (t, "timeline."));
        }
    }
    if has_tracks(root) {
        return root.get("tracks").and_then(Value::as_array).map(|t| (t, ""));
    }
    None
}

fn parse_clip(
    clip: &Map<String, Value>,
    track_kind: Option<&str>,
    path: &str,
) -> Result<Option<TimelineClip>, PayloadError> {
    // Timeline clips describe their media in an `asset` object; internal
    // clips inherit the track type and carry `src`/`duration` directly.
    let (kind, src, volume, length_key) = match clip.get("asset") {
        Some(Value::Object(asset)) => (
            asset.get("type").and_then(Value::as_str),
            asset.get("src"),
            number(asset, "volume", &format!("{}.asset", path))?,
            "length",
        ),
        Some(_) => return Err(PayloadError::field(format!("{}.asset", path), "must be an object")),
        None => (track_kind, clip.get("src"), None, "duration"),
    };

    let Some(kind) = kind.and_then(ClipKind::parse) else {
        return Ok(None);
    };

    let start = number(clip, "start", path)?.unwrap_or(0.0);
    let length = number(clip, length_key, path)?
        .or(number(clip, "length", path)?)
        .unwrap_or(0.0);
    if length <= 0.0 {
        return Ok(None);
    }
    if start < 0.0 {
        return Err(PayloadError::field(format!("{}.start", path), "must not be negative"));
    }

    let src = match src {
        Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        _ => return Err(PayloadError::field(format!("{}.src", path), "clip source is required")),
    };
    validate_source(&src).map_err(|m| PayloadError::field(format!("{}.src", path), m))?;

    let fit = match clip.get("fit") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.to_ascii_lowercase()),
        Some(_) => return Err(PayloadError::field(format!("{}.fit", path), "must be a string")),
    };
    let opacity = number(clip, "opacity", path)?.map(|o| o.clamp(0.0, 1.0));
    if let Some(v) = volume {
        if v < 0.0 {
            return Err(PayloadError::field(format!("{}.asset.volume", path), "must not be negative"));
        }
    }

    Ok(Some(TimelineClip {
        kind,
        src,
        start,
        length,
        fit,
        opacity,
        volume,
    }))
}

fn number(obj: &Map<String, Value>, key: &str, path: &str) -> Result<Option<f64>, PayloadError> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_f64()
            .filter(|f| f.is_finite())
            .map(Some)
            .ok_or_else(|| PayloadError::field(format!("{}.{}", path, key), "must be a finite number")),
        Some(_) => Err(PayloadError::field(format!("{}.{}", path, key), "must be a number")),
    }
}

/// Clip sources are remote URLs or names inside the assets root. Local
/// filesystem paths are never accepted.
fn validate_source(src: &str) -> Result<(), String> {
    if let Some(name) = src.strip_prefix(ASSET_SCHEME) {
        return if is_valid_asset_name(name) {
            Ok(())
        } else {
            Err(format!("invalid asset reference '{}'", src))
        };
    }
    match url::Url::parse(src) {
        Ok(url) if matches!(url.scheme(), "http" | "https") && url.host_str().is_some() => Ok(()),
        _ => Err(format!(
            "unsupported clip source '{}', expected an http(s) URL or {}name",
            src, ASSET_SCHEME
        )),
    }
}

/// Asset names are relative paths made of plain components.
pub fn is_valid_asset_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('/')
        && !name.contains('\\')
        && name.split('/').all(|part| {
            !part.is_empty()
                && part != "."
                && part != ".."
                && part
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        })
}
