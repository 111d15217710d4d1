//! Application configuration types.
//!
//! The top-level [`Config`] struct is deserialized from JSON and carries the
//! API, tool, transcode and ingest sections. Every section defaults sensibly
//! so a completely empty `{}` file is valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;
use crate::media::EncodeProfile;
use crate::Error;

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api: ApiConfig,
    pub tools: ToolsConfig,
    pub transcode: TranscodeConfig,
    pub ingest: IngestConfig,
}

impl Config {
    /// Deserialize a `Config` from a JSON string.
    pub fn from_json(json_str: &str) -> Result<Self> {
        serde_json::from_str(json_str)
            .map_err(|e| Error::Validation(format!("config parse error: {e}")))
    }

    /// Load configuration from a file path, falling back to defaults if the
    /// path is `None` or the file does not exist.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_json(&contents).unwrap_or_else(|e| {
                tracing::warn!("Failed to parse config file {}: {e}", path.display());
                Self::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No config file at {}; using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                tracing::warn!("Failed to read config file {}: {e}", path.display());
                Self::default()
            }
        }
    }

    /// Return a list of validation warnings (non-fatal issues).
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.api.base_url.is_empty() {
            warnings.push("api.base_url is empty".into());
        } else if !self.api.base_url.starts_with("http://")
            && !self.api.base_url.starts_with("https://")
        {
            warnings.push(format!(
                "api.base_url '{}' is not an http(s) URL",
                self.api.base_url
            ));
        }

        if self.api.timeout_secs == 0 {
            warnings.push("api.timeout_secs is 0; requests will time out immediately".into());
        }
        if self.api.upload_timeout_secs == 0 {
            warnings.push(
                "api.upload_timeout_secs is 0; uploads will time out immediately".into(),
            );
        }

        if let Err(e) = regex::Regex::new(&self.transcode.error_pattern) {
            warnings.push(format!(
                "transcode.error_pattern is not a valid regex: {e}"
            ));
        }

        if self.transcode.primary == self.transcode.secondary {
            warnings.push(
                "transcode.primary and transcode.secondary are identical; fallback cannot help"
                    .into(),
            );
        }
        for (label, profile) in [
            ("primary", &self.transcode.primary),
            ("secondary", &self.transcode.secondary),
        ] {
            if profile.segment_secs == 0 {
                warnings.push(format!("transcode.{label}.segment_secs is 0"));
            }
            if profile.max_width == 0 {
                warnings.push(format!("transcode.{label}.max_width is 0"));
            }
        }

        if self.ingest.max_duration_secs == 0 {
            warnings.push("ingest.max_duration_secs is 0; every source will be rejected".into());
        }
        if self.ingest.package_extensions.is_empty() {
            warnings.push("ingest.package_extensions is empty; no files would be uploaded".into());
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// Remote API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL the registration and post endpoints are joined onto.
    pub base_url: String,
    /// Timeout for registration and commit calls.
    pub timeout_secs: u64,
    /// Timeout for a single object-store PUT.
    pub upload_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.popoffapp.com/api".into(),
            timeout_secs: 5,
            upload_timeout_secs: 120,
        }
    }
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_secs)
    }
}

/// Paths to external CLI tools.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub ffmpeg_path: Option<PathBuf>,
    pub ffprobe_path: Option<PathBuf>,
}

/// Transcoder settings: scratch location, both profiles and the log rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscodeConfig {
    /// Root under which each job gets `<scratch_dir>/<job id>/`.
    pub scratch_dir: PathBuf,
    /// Upper bound for one engine invocation; `None` waits indefinitely.
    pub engine_timeout_secs: Option<u64>,
    pub primary: EncodeProfile,
    pub secondary: EncodeProfile,
    /// Regex applied to the engine log; a match fails the attempt.
    #[serde(default = "default_error_pattern")]
    pub error_pattern: String,
    /// Apply `error_pattern` to the secondary attempt as well.
    pub check_secondary_log: bool,
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            scratch_dir: std::env::temp_dir().join("popoff"),
            engine_timeout_secs: None,
            primary: EncodeProfile::hardware(),
            secondary: EncodeProfile::software(),
            error_pattern: default_error_pattern(),
            check_secondary_log: false,
        }
    }
}

impl TranscodeConfig {
    pub fn engine_timeout(&self) -> Option<Duration> {
        self.engine_timeout_secs.map(Duration::from_secs)
    }
}

fn default_error_pattern() -> String {
    "(?i)error".into()
}

/// Job admission and packaging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Longest source accepted by the service.
    pub max_duration_secs: u64,
    /// Extensions (without dot) that make up the streaming package.
    pub package_extensions: Vec<String>,
    /// Keep the scratch directory after a completed job.
    pub keep_scratch: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_duration_secs: 60,
            package_extensions: vec!["m3u8".into(), "ts".into()],
            keep_scratch: false,
        }
    }
}

impl IngestConfig {
    pub fn max_duration(&self) -> Duration {
        Duration::from_secs(self.max_duration_secs)
    }
}
