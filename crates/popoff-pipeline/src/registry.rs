//! Registration API: transfer-slot allocation and post commit.
//!
//! [`RegistrationApi`] is the seam the pipeline talks to. The production
//! implementation, [`HttpRegistrationApi`], posts JSON to
//! `{base_url}/media/upload_hls/` and `{base_url}/media/post/`.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use popoff_core::PostRef;
use reqwest::Client;
use serde::{Deserialize, Serialize};

/// A pre-signed upload destination for one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferSlot {
    pub file_name: String,
    pub url: String,
}

/// Request to allocate upload slots for a package.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PackageRegistration {
    pub base_name: String,
    pub files: Vec<String>,
    #[serde(rename = "type")]
    pub content_type: String,
}

/// Slots and remote paths returned by registration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RegisteredPackage {
    /// Pre-signed URL per package file name.
    pub upload_urls: BTreeMap<String, String>,
    /// Remote path of the playlist, referenced by the commit.
    pub video_file_path: String,
    /// Pre-signed URL for the thumbnail.
    pub thumb_url: String,
    /// Remote path of the thumbnail, referenced by the commit.
    pub thumb_file_path: String,
}

impl RegisteredPackage {
    /// Slot for a package file, if registration returned one.
    pub fn slot_for(&self, file_name: &str) -> Option<TransferSlot> {
        self.upload_urls.get(file_name).map(|url| TransferSlot {
            file_name: file_name.to_string(),
            url: url.clone(),
        })
    }

    /// Slot for the thumbnail, named after the local thumbnail file.
    pub fn thumbnail_slot(&self, file_name: &str) -> Option<TransferSlot> {
        if self.thumb_url.is_empty() {
            return None;
        }
        Some(TransferSlot {
            file_name: file_name.to_string(),
            url: self.thumb_url.clone(),
        })
    }
}

/// Post metadata committed once every file is stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PostCommit {
    pub file_path: String,
    pub thumbnail_path: String,
    pub file_size: u64,
    /// Duration in milliseconds.
    pub length: u64,
    pub width: u32,
    pub height: u32,
    pub description: String,
    /// Comma-joined tags.
    pub tags: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistrationError {
    #[error("package registration failed: {0}")]
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommitError {
    #[error("post commit failed: {0}")]
    Failed(String),
}

/// Remote API allocating transfer slots and registering posts.
#[async_trait]
pub trait RegistrationApi: Send + Sync {
    async fn register_package(
        &self,
        request: &PackageRegistration,
    ) -> Result<RegisteredPackage, RegistrationError>;

    async fn commit_post(&self, commit: &PostCommit) -> Result<PostRef, CommitError>;
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

/// [`RegistrationApi`] over HTTP with JSON bodies.
pub struct HttpRegistrationApi {
    client: Client,
    base_url: String,
}

impl HttpRegistrationApi {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Failed to build HTTP client with timeout: {}", e);
                Client::new()
            });

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<String, String> {
        let response = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| format!("POST {path}: {e}"))?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(format!("POST {path} returned {status}: {}", text.trim()));
        }
        Ok(text)
    }
}

#[async_trait]
impl RegistrationApi for HttpRegistrationApi {
    async fn register_package(
        &self,
        request: &PackageRegistration,
    ) -> Result<RegisteredPackage, RegistrationError> {
        let body = self
            .post_json("/media/upload_hls/", request)
            .await
            .map_err(RegistrationError::Failed)?;
        serde_json::from_str(&body)
            .map_err(|e| RegistrationError::Failed(format!("unexpected response: {e}")))
    }

    async fn commit_post(&self, commit: &PostCommit) -> Result<PostRef, CommitError> {
        let body = self
            .post_json("/media/post/", commit)
            .await
            .map_err(CommitError::Failed)?;
        Ok(post_ref_from(&body).unwrap_or_else(|| {
            tracing::debug!("commit response carried no post id; using the file path");
            PostRef(commit.file_path.clone())
        }))
    }
}

/// Extract the post id from a commit response (`id` or `post_id`, string or
/// number).
fn post_ref_from(body: &str) -> Option<PostRef> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    ["id", "post_id"].iter().find_map(|key| match value.get(key)? {
        serde_json::Value::String(s) if !s.is_empty() => Some(PostRef(s.clone())),
        serde_json::Value::Number(n) => Some(PostRef(n.to_string())),
        _ => None,
    })
}
