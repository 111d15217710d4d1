//! Aggregate job progress across transcode, upload and commit.
//!
//! Stage weights: transcoding fills `[0, 0.5]`, each uploaded file adds an
//! equal share of the next `0.45`, and a successful commit jumps to `1.0`.
//! The aggregate never regresses; lower reports are discarded.

use parking_lot::Mutex;

/// Share of the bar covered by transcoding.
pub const TRANSCODE_WEIGHT: f64 = 0.5;

/// Share of the bar covered by uploads (package files plus thumbnail).
pub const UPLOAD_WEIGHT: f64 = 0.45;

/// Pipeline stage a progress report belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Transcoding,
    Uploading,
    Committing,
}

impl Stage {
    fn span(self) -> (f64, f64) {
        match self {
            Stage::Transcoding => (0.0, TRANSCODE_WEIGHT),
            Stage::Uploading => (TRANSCODE_WEIGHT, TRANSCODE_WEIGHT + UPLOAD_WEIGHT),
            Stage::Committing => (TRANSCODE_WEIGHT + UPLOAD_WEIGHT, 1.0),
        }
    }

    fn label(self) -> &'static str {
        match self {
            Stage::Transcoding => "transcoding",
            Stage::Uploading => "uploading",
            Stage::Committing => "committing",
        }
    }
}

type Sink = Box<dyn Fn(f64, &str) + Send + Sync>;

/// Monotonic progress value in `[0, 1]`, shared between the pipeline task
/// (writer) and any number of readers.
pub struct ProgressAggregator {
    value: Mutex<f64>,
    sink: Option<Sink>,
}

impl ProgressAggregator {
    pub fn new() -> Self {
        Self {
            value: Mutex::new(0.0),
            sink: None,
        }
    }

    /// Call `sink` with the new value and stage label whenever progress
    /// advances.
    pub fn with_sink(sink: impl Fn(f64, &str) + Send + Sync + 'static) -> Self {
        Self {
            value: Mutex::new(0.0),
            sink: Some(Box::new(sink)),
        }
    }

    /// Report `fraction` (clamped to `[0, 1]`) of `stage`. Returns whether
    /// the aggregate advanced.
    pub fn report(&self, stage: Stage, fraction: f64) -> bool {
        if fraction.is_nan() {
            return false;
        }
        let (start, end) = stage.span();
        let fraction = fraction.clamp(0.0, 1.0);
        let candidate = if fraction >= 1.0 {
            end
        } else {
            start + (end - start) * fraction
        };

        let advanced = {
            let mut value = self.value.lock();
            if candidate > *value {
                *value = candidate;
                true
            } else {
                false
            }
        };

        if advanced {
            if let Some(sink) = &self.sink {
                sink(candidate, stage.label());
            }
        }
        advanced
    }

    /// Record that `uploaded` of `total` transfers have completed.
    pub fn files_uploaded(&self, uploaded: usize, total: usize) -> bool {
        if total == 0 {
            return false;
        }
        self.report(Stage::Uploading, uploaded as f64 / total as f64)
    }

    /// Record a successful commit.
    pub fn complete(&self) -> bool {
        self.report(Stage::Committing, 1.0)
    }

    /// Current aggregate value.
    pub fn current(&self) -> f64 {
        *self.value.lock()
    }
}

impl Default for ProgressAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ProgressAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressAggregator")
            .field("value", &self.current())
            .finish_non_exhaustive()
    }
}
