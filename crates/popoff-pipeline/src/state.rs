//! Pipeline states, failure reasons and terminal outcomes.

use std::fmt;

use popoff_core::PostRef;
use serde::{Deserialize, Serialize};

/// Message shown when neither encoder profile works on this device.
pub const UNSUPPORTED_MESSAGE: &str =
    "This device is missing video encoding support required for uploading.";

/// Message shown for every other failure; the whole job may be retried.
pub const TRANSIENT_MESSAGE: &str = "Something went wrong while uploading. Please try again.";

/// Why a job failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    /// Both encoder profiles failed.
    Unsupported,
    /// The transcoded package could not be enumerated.
    Discovery(String),
    /// Slot allocation failed.
    Registration(String),
    /// Registration returned no slot for a file.
    MissingSlot(String),
    /// A transfer failed.
    TransferFailed { file: String, detail: String },
    /// The metadata commit failed.
    CommitFailed(String),
}

impl FailureReason {
    /// Short machine-readable name.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unsupported => "unsupported",
            Self::Discovery(_) => "discovery",
            Self::Registration(_) => "registration",
            Self::MissingSlot(_) => "missing_slot",
            Self::TransferFailed { .. } => "transfer_failed",
            Self::CommitFailed(_) => "commit_failed",
        }
    }

    /// Text suitable for the user.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Unsupported => UNSUPPORTED_MESSAGE,
            _ => TRANSIENT_MESSAGE,
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unsupported => write!(f, "no encoder profile could transcode the source"),
            Self::Discovery(d) => write!(f, "package discovery failed: {d}"),
            Self::Registration(d) => write!(f, "registration failed: {d}"),
            Self::MissingSlot(file) => write!(f, "no transfer slot for {file}"),
            Self::TransferFailed { file, detail } => write!(f, "upload of {file} failed: {detail}"),
            Self::CommitFailed(d) => write!(f, "commit failed: {d}"),
        }
    }
}

/// Where a job is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    Transcoding,
    Discovering,
    Uploading,
    Committing,
    Completed,
    Cancelled,
    Failed(FailureReason),
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed(_))
    }

    /// Ordinal along the happy path; terminal states sort last.
    fn rank(&self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Transcoding => 1,
            Self::Discovering => 2,
            Self::Uploading => 3,
            Self::Committing => 4,
            Self::Completed | Self::Cancelled | Self::Failed(_) => 5,
        }
    }

    /// Whether moving from `self` to `next` is a legal transition.
    ///
    /// Non-terminal states advance one step along the happy path or end in
    /// `Cancelled`/`Failed`. Terminal states never change.
    pub fn can_transition_to(&self, next: &PipelineState) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            Self::Cancelled => true,
            Self::Failed(reason) => match (self, reason) {
                (Self::Transcoding, FailureReason::Unsupported) => true,
                (
                    Self::Discovering,
                    FailureReason::Discovery(_)
                    | FailureReason::Registration(_)
                    | FailureReason::MissingSlot(_),
                ) => true,
                (Self::Uploading, FailureReason::TransferFailed { .. }) => true,
                (Self::Committing, FailureReason::CommitFailed(_)) => true,
                _ => false,
            },
            Self::Completed => *self == Self::Committing,
            other => other.rank() == self.rank() + 1,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Transcoding => "transcoding",
            Self::Discovering => "discovering",
            Self::Uploading => "uploading",
            Self::Committing => "committing",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed(_) => "failed",
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed(reason) => write!(f, "failed ({})", reason.kind()),
            other => f.write_str(other.name()),
        }
    }
}

/// Terminal notification of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Completed(PostRef),
    Failed(FailureReason),
    Cancelled,
}

impl Outcome {
    /// Message for the user; cancellation is silent.
    pub fn user_message(&self) -> Option<&'static str> {
        match self {
            Self::Failed(reason) => Some(reason.user_message()),
            Self::Completed(_) | Self::Cancelled => None,
        }
    }

    /// The terminal state matching this outcome.
    pub fn state(&self) -> PipelineState {
        match self {
            Self::Completed(_) => PipelineState::Completed,
            Self::Failed(reason) => PipelineState::Failed(reason.clone()),
            Self::Cancelled => PipelineState::Cancelled,
        }
    }
}
