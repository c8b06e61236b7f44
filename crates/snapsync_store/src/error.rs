//! Error types for store operations.

use std::io;
use thiserror::Error;

/// Result type for store operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during store operations.
///
/// Storage failures escalate to the caller; the engine never attempts
/// silent data loss to recover from them.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Another process holds the store directory lock.
    #[error("store directory is locked by another process")]
    Locked,

    /// A persisted record could not be decoded.
    #[error("store corrupted: {0}")]
    Corrupted(String),

    /// A record could not be encoded for persistence.
    #[error("encode error: {0}")]
    Encode(String),

    /// The referenced queue operation does not exist.
    #[error("unknown queue operation: {0}")]
    UnknownOperation(uuid::Uuid),
}
