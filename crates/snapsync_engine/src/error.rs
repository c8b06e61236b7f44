//! Error types for the sync engine.

use crate::capture::CaptureError;
use snapsync_store::StorageError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
///
/// Transient errors (`Network`, `Timeout`) are absorbed inside the sync
/// worker and retried with bounded exponential backoff; they only surface
/// through the status channel. Fatal errors (`Capture`, `Storage`, `Auth`,
/// exhausted retries) are surfaced with enough detail for the caller to
/// prompt the user, but the engine never panics the host process.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Application state could not be serialized; the mutation is dropped.
    #[error(transparent)]
    Capture(#[from] CaptureError),

    /// Local persistence failed; not retried automatically since the disk
    /// itself is unreliable.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Network or server error; transient and retryable.
    #[error("network error: {0}")]
    Network(String),

    /// A network call exceeded its bounded timeout; retryable.
    #[error("operation timed out")]
    Timeout,

    /// The remote rejected the credential; requires reauthentication and is
    /// never retried with backoff.
    #[error("authentication required: {0}")]
    Auth(String),

    /// The remote sent something outside the sync contract.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The current sync cycle was cancelled by the caller.
    #[error("sync cancelled")]
    Cancelled,
}

impl SyncError {
    /// Returns true if the operation can be retried with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Network(_) | SyncError::Timeout)
    }

    /// Returns true if the error requires reauthentication.
    pub fn is_auth(&self) -> bool {
        matches!(self, SyncError::Auth(_))
    }
}
