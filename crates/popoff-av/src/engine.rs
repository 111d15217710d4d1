//! The transcoding engine seam.
//!
//! [`TranscodeEngine`] is the capability the driver needs from an encoder:
//! run one invocation, report elapsed encoded time, and hand back the exit
//! status and textual log. [`FfmpegEngine`] is the production implementation.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::command::ToolCommand;
use crate::tools::ToolRegistry;

/// Callback receiving the engine's elapsed encoded time.
pub type ElapsedCallback<'a> = &'a (dyn Fn(Duration) + Send + Sync);

/// Result of one engine invocation that ran to completion.
#[derive(Debug, Clone, Default)]
pub struct EngineRun {
    /// Whether the engine exited with a success status.
    pub success: bool,
    /// Diagnostic log, excluding machine-readable progress records.
    pub log: String,
}

/// A black-box encoder producing an HLS package from argument lists.
#[async_trait]
pub trait TranscodeEngine: Send + Sync {
    /// Short name for logging (e.g. "ffmpeg").
    fn name(&self) -> &str;

    /// Run one invocation with `args`.
    ///
    /// # Errors
    ///
    /// - [`popoff_core::Error::Cancelled`] if `cancel` fired; the engine
    ///   process must already be gone when this returns.
    /// - Any other error when the engine could not be started at all.
    async fn run(
        &self,
        args: &[String],
        on_elapsed: ElapsedCallback<'_>,
        cancel: &CancellationToken,
    ) -> popoff_core::Result<EngineRun>;
}

#[async_trait]
impl<T: TranscodeEngine + ?Sized> TranscodeEngine for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn run(
        &self,
        args: &[String],
        on_elapsed: ElapsedCallback<'_>,
        cancel: &CancellationToken,
    ) -> popoff_core::Result<EngineRun> {
        (**self).run(args, on_elapsed, cancel).await
    }
}

// ---------------------------------------------------------------------------
// FfmpegEngine
// ---------------------------------------------------------------------------

/// Keys ffmpeg writes in `-progress` blocks.
const PROGRESS_KEYS: &[&str] = &[
    "frame",
    "fps",
    "bitrate",
    "total_size",
    "out_time_us",
    "out_time_ms",
    "out_time",
    "dup_frames",
    "drop_frames",
    "speed",
    "progress",
];

/// Runs `ffmpeg` with `-progress pipe:2 -nostats` and parses its stderr.
#[derive(Debug, Clone)]
pub struct FfmpegEngine {
    ffmpeg_path: PathBuf,
    timeout: Option<Duration>,
}

impl FfmpegEngine {
    pub fn new(ffmpeg_path: PathBuf) -> Self {
        Self {
            ffmpeg_path,
            timeout: None,
        }
    }

    /// Build from discovered tools.
    pub fn from_registry(tools: &ToolRegistry) -> popoff_core::Result<Self> {
        Ok(Self::new(tools.require("ffmpeg")?.to_path_buf()))
    }

    /// Bound each invocation; the process is killed when exceeded.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl TranscodeEngine for FfmpegEngine {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    async fn run(
        &self,
        args: &[String],
        on_elapsed: ElapsedCallback<'_>,
        cancel: &CancellationToken,
    ) -> popoff_core::Result<EngineRun> {
        let mut cmd = ToolCommand::new(self.ffmpeg_path.clone());
        match self.timeout {
            Some(limit) => cmd.timeout(limit),
            None => cmd.no_timeout(),
        };
        cmd.args(["-hide_banner", "-progress", "pipe:2", "-nostats"]);
        cmd.args(args.iter().cloned());

        tracing::debug!(args = ?args, "running ffmpeg");

        let mut log = String::new();
        let mut last_out_time_us: Option<i64> = None;

        let status = cmd
            .execute_streaming(
                |line| {
                    if let Some(val) = line.strip_prefix("out_time_us=") {
                        last_out_time_us = val.trim().parse::<i64>().ok();
                    } else if line.starts_with("progress=") {
                        // End of a progress block.
                        if let Some(us) = last_out_time_us.filter(|us| *us >= 0) {
                            on_elapsed(Duration::from_micros(us as u64));
                        }
                    } else if !is_progress_record(line) {
                        log.push_str(line);
                        log.push('\n');
                    }
                },
                cancel,
            )
            .await?;

        Ok(EngineRun {
            success: status.success(),
            log,
        })
    }
}

/// Whether `line` is a `key=value` record of a `-progress` block.
fn is_progress_record(line: &str) -> bool {
    match line.split_once('=') {
        Some((key, _)) => PROGRESS_KEYS.contains(&key) || key.starts_with("stream_"),
        None => false,
    }
}
