//! Cooperative cancellation of one ingestion job.

use tokio_util::sync::CancellationToken;

/// Marker returned by [`CancellationManager::checkpoint`] once cancellation
/// has been requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

/// Owns the cancellation signal shared by the driver, uploader and
/// controller of a single job.
///
/// Requesting cancellation is idempotent. It never rolls anything back; the
/// pipeline observes it at its next checkpoint or through the token handed to
/// the component currently running.
#[derive(Debug, Clone, Default)]
pub struct CancellationManager {
    token: CancellationToken,
}

impl CancellationManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Further calls are no-ops.
    pub fn cancel(&self) {
        if !self.token.is_cancelled() {
            tracing::debug!("cancellation requested");
        }
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Token passed into suspension points.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// `Err(Cancelled)` when cancellation has been requested.
    pub fn checkpoint(&self) -> Result<(), Cancelled> {
        if self.token.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }
}
