//! Media-domain types shared by the transcoder and the pipeline.
//!
//! [`SourceAsset`] describes the captured clip, [`EncodeProfile`] one of the
//! two fixed encoder configurations, and [`PostDraft`] the caller-supplied
//! post metadata that is committed once the package is stored.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Content type used when registering an HLS package and uploading playlists.
pub const PLAYLIST_CONTENT_TYPE: &str = "application/x-mpegURL";

/// Content type of MPEG-TS media segments.
pub const SEGMENT_CONTENT_TYPE: &str = "video/MP2T";

// ---------------------------------------------------------------------------
// SourceAsset
// ---------------------------------------------------------------------------

/// The raw captured video handed to the pipeline.
///
/// Owned by the caller; the pipeline only reads it.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceAsset {
    /// Local file containing the clip.
    pub path: PathBuf,
    /// Playback duration of the clip.
    pub duration: Duration,
    /// Pixel width of the primary video stream.
    pub width: u32,
    /// Pixel height of the primary video stream.
    pub height: u32,
    /// Size of the source file in bytes.
    pub file_size: u64,
}

impl SourceAsset {
    /// Name used as the remote package base: the source file stem.
    pub fn base_name(&self) -> String {
        self.path
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .unwrap_or("video")
            .to_string()
    }

    /// Duration in whole milliseconds, as the post API expects it.
    pub fn duration_ms(&self) -> u64 {
        self.duration.as_millis() as u64
    }
}

// ---------------------------------------------------------------------------
// EncodeProfile
// ---------------------------------------------------------------------------

/// Which of the two encoder configurations a profile is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileKind {
    /// Hardware-leaning encoder tried first.
    Primary,
    /// Software encoder used when the primary attempt fails.
    Secondary,
}

impl fmt::Display for ProfileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary => write!(f, "primary"),
            Self::Secondary => write!(f, "secondary"),
        }
    }
}

/// A named, fixed encoder configuration producing an HLS VOD package.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodeProfile {
    /// Human-readable name used in logs (e.g. "hardware").
    pub name: String,
    /// Output width ceiling; height follows the aspect ratio.
    pub max_width: u32,
    /// Pixel format forced inside the filter graph (`format=` filter).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_pixel_format: Option<String>,
    /// Video encoder; `None` leaves the engine's default encoder in place.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_codec: Option<String>,
    /// Encoder profile (`-profile:v`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_profile: Option<String>,
    /// Output pixel format (`-pix_fmt`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pixel_format: Option<String>,
    /// Target video bitrate (e.g. "5000k").
    pub video_bitrate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_rate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buffer_size: Option<String>,
    /// Keyframe interval in frames.
    pub gop: u32,
    /// Disable scene-cut keyframes so segments start on the GOP grid.
    #[serde(default)]
    pub disable_scene_cut: bool,
    /// Extra encoder arguments appended after the video options.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_args: Vec<String>,
    /// AAC bitrate (e.g. "128k").
    pub audio_bitrate: String,
    /// Target HLS segment duration in seconds.
    pub segment_secs: u32,
}

impl EncodeProfile {
    /// The hardware-leaning profile tried first.
    pub fn hardware() -> Self {
        Self {
            name: "hardware".into(),
            max_width: 1920,
            filter_pixel_format: Some("yuv420p".into()),
            video_codec: None,
            video_profile: None,
            pixel_format: None,
            video_bitrate: "5000k".into(),
            max_rate: None,
            buffer_size: None,
            gop: 48,
            disable_scene_cut: true,
            extra_args: Vec::new(),
            audio_bitrate: "128k".into(),
            segment_secs: 5,
        }
    }

    /// The software fallback profile (OpenH264 baseline).
    pub fn software() -> Self {
        Self {
            name: "software".into(),
            max_width: 1920,
            filter_pixel_format: None,
            video_codec: Some("libopenh264".into()),
            video_profile: Some("66".into()),
            pixel_format: Some("yuv420p".into()),
            video_bitrate: "2000k".into(),
            max_rate: Some("1500k".into()),
            buffer_size: Some("3000k".into()),
            gop: 60,
            disable_scene_cut: false,
            extra_args: Vec::new(),
            audio_bitrate: "96k".into(),
            segment_secs: 5,
        }
    }
}

// ---------------------------------------------------------------------------
// Post metadata
// ---------------------------------------------------------------------------

/// Caller-supplied post metadata and the thumbnail to publish with it.
#[derive(Debug, Clone, PartialEq)]
pub struct PostDraft {
    pub description: String,
    pub tags: Vec<String>,
    /// Local thumbnail image uploaded after the package.
    pub thumbnail: PathBuf,
}

impl PostDraft {
    /// Tags in the comma-joined form the post API stores.
    pub fn joined_tags(&self) -> String {
        self.tags
            .iter()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Opaque reference to a created post, as returned by the commit call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PostRef(pub String);

impl fmt::Display for PostRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Content type declared when uploading the file at `path`.
pub fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("m3u8") => PLAYLIST_CONTENT_TYPE,
        Some("ts") => SEGMENT_CONTENT_TYPE,
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        _ => "application/octet-stream",
    }
}
