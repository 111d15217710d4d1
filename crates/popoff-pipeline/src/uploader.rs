//! One-file transfers into pre-signed slots.

use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::registry::TransferSlot;
use crate::store::ObjectStore;

/// Why a transfer did not complete.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransferError {
    #[error("upload of {file} failed: {detail}")]
    Failed { file: String, detail: String },
    #[error("upload cancelled")]
    Cancelled,
}

/// Uploads a single local file into a single slot. No retries.
#[derive(Clone)]
pub struct ChunkUploader {
    store: Arc<dyn ObjectStore>,
}

impl ChunkUploader {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Read `local_file` and store it under `slot` with `content_type`.
    /// Returns the number of bytes transferred.
    ///
    /// Cancellation is checked before anything is sent; if it fires while
    /// the request is in flight the request is abandoned.
    pub async fn upload(
        &self,
        local_file: &Path,
        slot: &TransferSlot,
        content_type: &str,
        cancel: &CancellationToken,
    ) -> Result<u64, TransferError> {
        let body = tokio::fs::read(local_file).await.map_err(|e| TransferError::Failed {
            file: slot.file_name.clone(),
            detail: format!("failed to read {}: {e}", local_file.display()),
        })?;
        let bytes = body.len() as u64;

        if cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }

        tracing::debug!(file = %slot.file_name, bytes, content_type, "uploading");

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(file = %slot.file_name, "upload abandoned on cancellation");
                Err(TransferError::Cancelled)
            }
            result = self.store.put(slot, body, content_type) => match result {
                Ok(()) => Ok(bytes),
                Err(e) => Err(TransferError::Failed {
                    file: slot.file_name.clone(),
                    detail: e.to_string(),
                }),
            },
        }
    }
}
