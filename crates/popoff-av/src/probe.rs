//! Source probing via `ffprobe`.
//!
//! Shells out to `ffprobe -v quiet -print_format json -show_format
//! -show_streams` and maps the first video stream into a [`SourceAsset`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use popoff_core::{Error, SourceAsset};
use serde::Deserialize;

use crate::command::ToolCommand;

/// Probe `path` with the ffprobe binary at `ffprobe`.
///
/// The byte size comes from the file system; duration and dimensions from
/// ffprobe. Dimensions are reported as displayed, so a 90° rotated capture
/// has its width and height swapped.
pub async fn probe_source(ffprobe: &Path, path: &Path) -> popoff_core::Result<SourceAsset> {
    let metadata = tokio::fs::metadata(path).await?;
    if !metadata.is_file() {
        return Err(Error::Probe(format!("{} is not a file", path.display())));
    }

    let mut cmd = ToolCommand::new(ffprobe.to_path_buf());
    cmd.args([
        "-v",
        "quiet",
        "-print_format",
        "json",
        "-show_format",
        "-show_streams",
    ]);
    cmd.arg(path.to_string_lossy().as_ref());

    let output = cmd.execute().await?;
    parse_ffprobe_json(&output.stdout, path, metadata.len())
}

/// Build a [`SourceAsset`] from ffprobe's JSON output.
pub fn parse_ffprobe_json(
    json: &str,
    path: &Path,
    file_size: u64,
) -> popoff_core::Result<SourceAsset> {
    let ff: FfprobeOutput = serde_json::from_str(json)
        .map_err(|e| Error::Probe(format!("ffprobe JSON parse error: {e}")))?;

    let video = ff
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| Error::Probe(format!("no video stream in {}", path.display())))?;

    let duration = ff
        .format
        .duration
        .as_deref()
        .or(video.duration.as_deref())
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d >= 0.0)
        .map(Duration::from_secs_f64)
        .ok_or_else(|| Error::Probe(format!("no duration reported for {}", path.display())))?;

    let (mut width, mut height) = (video.width.unwrap_or(0), video.height.unwrap_or(0));
    if width == 0 || height == 0 {
        return Err(Error::Probe(format!(
            "video stream of {} has no dimensions",
            path.display()
        )));
    }
    if video.rotation().map(|r| r.rem_euclid(180) == 90).unwrap_or(false) {
        std::mem::swap(&mut width, &mut height);
    }

    Ok(SourceAsset {
        path: PathBuf::from(path),
        duration,
        width,
        height,
        file_size,
    })
}

// ---------------------------------------------------------------------------
// JSON structures
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    format: FfprobeFormat,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Default, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    duration: Option<String>,
    #[serde(default)]
    tags: FfprobeTags,
    #[serde(default)]
    side_data_list: Vec<FfprobeSideData>,
}

#[derive(Debug, Default, Deserialize)]
struct FfprobeTags {
    rotate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeSideData {
    rotation: Option<i64>,
}

impl FfprobeStream {
    /// Display rotation in degrees, from side data or the legacy tag.
    fn rotation(&self) -> Option<i64> {
        self.side_data_list
            .iter()
            .find_map(|sd| sd.rotation)
            .or_else(|| self.tags.rotate.as_deref().and_then(|r| r.parse().ok()))
    }
}
