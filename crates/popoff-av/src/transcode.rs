//! Source → HLS package transcoding with profile fallback.
//!
//! [`TranscodeDriver`] runs the primary profile and, if that attempt fails,
//! the secondary profile into the same freshly-cleared scratch directory.
//! There is no third attempt: two failures mean the device cannot produce a
//! package and the job is reported as unsupported.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use popoff_core::config::TranscodeConfig;
use popoff_core::{EncodeProfile, Error, ProfileKind, SourceAsset};
use tokio_util::sync::CancellationToken;

use crate::engine::TranscodeEngine;
use crate::log_check::LogCheck;
use crate::scratch::ScratchDir;

/// File name of the HLS media playlist inside the output directory.
pub const PLAYLIST_NAME: &str = "playlist.m3u8";

/// `printf`-style segment name pattern handed to the engine.
pub const SEGMENT_PATTERN: &str = "segment_%03d.ts";

/// Callback receiving the transcode fraction in `[0, 1]`.
pub type FractionCallback<'a> = &'a (dyn Fn(f64) + Send + Sync);

/// A package produced by one successful engine attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscodeOutput {
    /// Directory holding the playlist and its segments.
    pub dir: PathBuf,
    /// Full path of the playlist.
    pub playlist: PathBuf,
    /// Which profile produced the package.
    pub profile: ProfileKind,
    /// Profiles attempted, in order, ending with `profile`.
    pub tried: Vec<ProfileKind>,
}

/// Why transcoding ended without a package.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TranscodeError {
    /// Both profiles failed.
    #[error("neither encoder profile could transcode the source")]
    Unsupported,
    /// Cancellation was observed; the engine has been stopped. `tried`
    /// lists the profiles whose attempt had begun.
    #[error("transcode cancelled")]
    Cancelled { tried: Vec<ProfileKind> },
}

/// Result of a single engine attempt.
enum AttemptResult {
    Usable,
    Failed,
    Cancelled,
}

/// Drives the engine through the primary and, on failure, secondary profile.
pub struct TranscodeDriver {
    engine: Arc<dyn TranscodeEngine>,
    primary: EncodeProfile,
    secondary: EncodeProfile,
    log_check: LogCheck,
}

impl TranscodeDriver {
    pub fn new(
        engine: Arc<dyn TranscodeEngine>,
        primary: EncodeProfile,
        secondary: EncodeProfile,
        log_check: LogCheck,
    ) -> Self {
        Self {
            engine,
            primary,
            secondary,
            log_check,
        }
    }

    /// Build a driver with the profiles and log rule from `config`.
    pub fn from_config(
        engine: Arc<dyn TranscodeEngine>,
        config: &TranscodeConfig,
    ) -> popoff_core::Result<Self> {
        Ok(Self::new(
            engine,
            config.primary.clone(),
            config.secondary.clone(),
            LogCheck::from_config(config)?,
        ))
    }

    pub fn profile(&self, kind: ProfileKind) -> &EncodeProfile {
        match kind {
            ProfileKind::Primary => &self.primary,
            ProfileKind::Secondary => &self.secondary,
        }
    }

    /// Transcode `source` into `scratch`, reporting progress via `on_fraction`.
    ///
    /// The scratch directory is recreated before each attempt, so a returned
    /// package only ever holds files of the profile named in the output.
    pub async fn transcode(
        &self,
        source: &SourceAsset,
        scratch: &ScratchDir,
        on_fraction: FractionCallback<'_>,
        cancel: &CancellationToken,
    ) -> Result<TranscodeOutput, TranscodeError> {
        let mut tried = Vec::with_capacity(2);
        for kind in [ProfileKind::Primary, ProfileKind::Secondary] {
            if cancel.is_cancelled() {
                return Err(TranscodeError::Cancelled { tried });
            }
            tried.push(kind);
            match self.attempt(kind, source, scratch, on_fraction, cancel).await {
                AttemptResult::Usable => {
                    tracing::info!(
                        profile = %kind,
                        name = %self.profile(kind).name,
                        "transcode succeeded"
                    );
                    return Ok(TranscodeOutput {
                        dir: scratch.path().to_path_buf(),
                        playlist: scratch.file(PLAYLIST_NAME),
                        profile: kind,
                        tried,
                    });
                }
                AttemptResult::Failed => {}
                AttemptResult::Cancelled => return Err(TranscodeError::Cancelled { tried }),
            }
        }

        tracing::error!(source = %source.path.display(), "both encoder profiles failed");
        Err(TranscodeError::Unsupported)
    }

    /// Run one attempt into a freshly cleared scratch directory.
    async fn attempt(
        &self,
        kind: ProfileKind,
        source: &SourceAsset,
        scratch: &ScratchDir,
        on_fraction: FractionCallback<'_>,
        cancel: &CancellationToken,
    ) -> AttemptResult {
        let profile = self.profile(kind);
        if let Err(e) = scratch.recreate() {
            tracing::warn!(profile = %kind, "failed to prepare scratch directory: {e}");
            return AttemptResult::Failed;
        }

        let args = build_args(profile, &source.path, scratch.path());
        let duration = source.duration;
        let on_elapsed = |elapsed: std::time::Duration| {
            let fraction = if duration.is_zero() {
                0.0
            } else {
                elapsed.as_secs_f64() / duration.as_secs_f64()
            };
            on_fraction(fraction.clamp(0.0, 1.0));
        };

        tracing::info!(
            profile = %kind,
            name = %profile.name,
            engine = self.engine.name(),
            "starting transcode attempt"
        );

        let run = match self.engine.run(&args, &on_elapsed, cancel).await {
            Ok(run) => run,
            Err(Error::Cancelled) => return AttemptResult::Cancelled,
            Err(e) => {
                tracing::warn!(profile = %kind, "engine could not run: {e}");
                return AttemptResult::Failed;
            }
        };

        if cancel.is_cancelled() {
            return AttemptResult::Cancelled;
        }

        if self.log_check.attempt_failed(kind, &run) {
            match self.log_check.offending_line(kind, &run.log) {
                Some(line) if run.success => {
                    tracing::warn!(profile = %kind, line, "engine log reported an error");
                }
                _ => {
                    tracing::warn!(profile = %kind, log_tail = %log_tail(&run.log), "engine exited with failure");
                }
            }
            return AttemptResult::Failed;
        }

        AttemptResult::Usable
    }
}

/// Build the engine arguments for `profile`, reading `input` and writing the
/// playlist and segments into `out_dir`.
pub fn build_args(profile: &EncodeProfile, input: &Path, out_dir: &Path) -> Vec<String> {
    let mut filter = format!("scale=w=min({}\\,iw):h=-2", profile.max_width);
    if let Some(fmt) = &profile.filter_pixel_format {
        filter.push_str(",format=");
        filter.push_str(fmt);
    }

    let mut args: Vec<String> = vec![
        "-y".into(),
        "-i".into(),
        input.to_string_lossy().into_owned(),
        "-vf".into(),
        filter,
    ];

    if let Some(codec) = &profile.video_codec {
        args.extend(["-c:v".into(), codec.clone()]);
    }
    if let Some(vp) = &profile.video_profile {
        args.extend(["-profile:v".into(), vp.clone()]);
    }
    if let Some(pix) = &profile.pixel_format {
        args.extend(["-pix_fmt".into(), pix.clone()]);
    }
    args.extend(["-b:v".into(), profile.video_bitrate.clone()]);
    if let Some(rate) = &profile.max_rate {
        args.extend(["-maxrate".into(), rate.clone()]);
    }
    if let Some(size) = &profile.buffer_size {
        args.extend(["-bufsize".into(), size.clone()]);
    }
    args.extend(["-g".into(), profile.gop.to_string()]);
    if profile.disable_scene_cut {
        args.extend(["-sc_threshold".into(), "0".into()]);
    }
    args.extend(profile.extra_args.iter().cloned());

    args.extend([
        "-c:a".into(),
        "aac".into(),
        "-b:a".into(),
        profile.audio_bitrate.clone(),
        "-hls_time".into(),
        profile.segment_secs.to_string(),
        "-hls_playlist_type".into(),
        "vod".into(),
        "-hls_flags".into(),
        "independent_segments".into(),
        "-hls_segment_filename".into(),
        out_dir.join(SEGMENT_PATTERN).to_string_lossy().into_owned(),
        out_dir.join(PLAYLIST_NAME).to_string_lossy().into_owned(),
    ]);

    args
}

fn log_tail(log: &str) -> String {
    let lines: Vec<&str> = log.lines().collect();
    let start = lines.len().saturating_sub(5);
    lines[start..].join(" | ")
}
