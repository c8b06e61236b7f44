//! State capture: turning in-memory application state into a payload.

use thiserror::Error;

/// Error produced when application state cannot be serialized.
///
/// Fatal to the single mutation that triggered the capture: the mutation is
/// logged and dropped rather than silently corrupting the queue.
#[derive(Debug, Clone, Error)]
#[error("state capture failed: {message}")]
pub struct CaptureError {
    message: String,
}

impl CaptureError {
    /// Creates a capture error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Collects current in-memory application state into an opaque payload.
///
/// Implementations must be pure with respect to their inputs (no side
/// effects on capture) and must complete without blocking on network I/O;
/// `capture` runs synchronously on the mutation path.
///
/// The engine stamps `updated_at` and `device_id` itself; the capture hook
/// only produces bytes.
pub trait StateCapture: Send + Sync {
    /// Serializes the current application state.
    fn capture(&self) -> Result<Vec<u8>, CaptureError>;
}

/// Adapts a closure into a [`StateCapture`].
///
/// ```
/// use snapsync_engine::{FnCapture, StateCapture};
///
/// let capture = FnCapture::new(|| Ok(b"state".to_vec()));
/// assert_eq!(capture.capture().unwrap(), b"state");
/// ```
pub struct FnCapture<F> {
    f: F,
}

impl<F> FnCapture<F>
where
    F: Fn() -> Result<Vec<u8>, CaptureError> + Send + Sync,
{
    /// Wraps the given closure.
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> StateCapture for FnCapture<F>
where
    F: Fn() -> Result<Vec<u8>, CaptureError> + Send + Sync,
{
    fn capture(&self) -> Result<Vec<u8>, CaptureError> {
        (self.f)()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closure_capture() {
        let capture = FnCapture::new(|| Ok(vec![1, 2, 3]));
        assert_eq!(capture.capture().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn capture_failure_carries_message() {
        let capture = FnCapture::new(|| Err(CaptureError::new("cyclic reference")));
        let err = capture.capture().unwrap_err();
        assert!(err.to_string().contains("cyclic reference"));
    }
}
