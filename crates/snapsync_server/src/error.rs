//! Error types for the reference server.

use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors the reference server can return.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The bearer credential is missing, malformed, expired, or for the
    /// wrong entity. Maps to HTTP 401.
    #[error("not authorized: {0}")]
    NotAuthorized(String),

    /// The request violates the sync contract. Maps to HTTP 400.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}
