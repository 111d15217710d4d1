//! Engine log inspection.
//!
//! Some encoders exit successfully while having logged a failure. An attempt
//! is therefore judged on both the exit status and whether its log matches
//! a configurable error-token pattern.

use popoff_core::config::TranscodeConfig;
use popoff_core::{Error, ProfileKind};
use regex::Regex;

use crate::engine::EngineRun;

/// Rule deciding whether an engine attempt failed.
#[derive(Debug, Clone)]
pub struct LogCheck {
    pattern: Regex,
    check_secondary: bool,
}

impl LogCheck {
    /// Compile `pattern`; `check_secondary` extends the log rule to the
    /// secondary attempt (the primary is always checked).
    pub fn new(pattern: &str, check_secondary: bool) -> popoff_core::Result<Self> {
        let pattern = Regex::new(pattern)
            .map_err(|e| Error::Validation(format!("invalid error pattern '{pattern}': {e}")))?;
        Ok(Self {
            pattern,
            check_secondary,
        })
    }

    pub fn from_config(config: &TranscodeConfig) -> popoff_core::Result<Self> {
        Self::new(&config.error_pattern, config.check_secondary_log)
    }

    fn applies_to(&self, kind: ProfileKind) -> bool {
        match kind {
            ProfileKind::Primary => true,
            ProfileKind::Secondary => self.check_secondary,
        }
    }

    /// The first log line matching the error pattern, if the rule applies.
    pub fn offending_line<'a>(&self, kind: ProfileKind, log: &'a str) -> Option<&'a str> {
        if !self.applies_to(kind) {
            return None;
        }
        log.lines().find(|line| self.pattern.is_match(line))
    }

    /// Whether the attempt made with `kind` counts as failed.
    pub fn attempt_failed(&self, kind: ProfileKind, run: &EngineRun) -> bool {
        !run.success || self.offending_line(kind, &run.log).is_some()
    }
}
