//! # popoff-av
//!
//! Transcoding, probing, and external tool management for the popoff
//! ingestion pipeline.
//!
//! This crate provides:
//!
//! - **Tool discovery** ([`ToolRegistry`]) -- find ffmpeg and ffprobe.
//! - **Command execution** ([`ToolCommand`]) -- async builder with timeout
//!   support, including a streaming mode that kills the child on
//!   cancellation.
//! - **Engine seam** ([`TranscodeEngine`], [`FfmpegEngine`]) -- one encoder
//!   invocation with elapsed-time progress.
//! - **Transcode driver** ([`TranscodeDriver`]) -- primary profile with
//!   fallback to the secondary profile into a per-job [`ScratchDir`].
//! - **Probing** ([`probe::probe_source`]) -- build a `SourceAsset` with
//!   ffprobe.

pub mod command;
pub mod engine;
pub mod log_check;
pub mod probe;
pub mod scratch;
pub mod tools;
pub mod transcode;

// ---- Re-exports for convenience ----

pub use command::{ToolCommand, ToolOutput};
pub use engine::{EngineRun, FfmpegEngine, TranscodeEngine};
pub use log_check::LogCheck;
pub use scratch::ScratchDir;
pub use tools::{ToolInfo, ToolRegistry};
pub use transcode::{
    TranscodeDriver, TranscodeError, TranscodeOutput, PLAYLIST_NAME, SEGMENT_PATTERN,
};
