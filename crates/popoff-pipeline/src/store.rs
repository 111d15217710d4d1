//! Object storage reached through pre-signed URLs.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;

use crate::registry::TransferSlot;

/// Why a single `put` did not store the object.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The request could not be completed (connection, timeout, ...).
    #[error("request failed: {0}")]
    Network(String),
    /// The store answered with a non-success status.
    #[error("status {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Remote object storage accepting one complete object per slot.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(
        &self,
        slot: &TransferSlot,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StoreError>;
}

/// [`ObjectStore`] doing a single HTTP `PUT` per slot; any 2xx is success.
pub struct HttpObjectStore {
    client: Client,
}

impl HttpObjectStore {
    pub fn new(timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Failed to build HTTP client with timeout: {}", e);
                Client::new()
            });
        Self { client }
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn put(
        &self,
        slot: &TransferSlot,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StoreError> {
        let response = self
            .client
            .put(&slot.url)
            .header(CONTENT_TYPE, content_type)
            .body(body)
            .send()
            .await
            .map_err(|e| StoreError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Rejected {
                status: status.as_u16(),
                body: body.trim().to_string(),
            });
        }
        Ok(())
    }
}
