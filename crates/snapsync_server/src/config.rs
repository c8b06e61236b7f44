//! Server configuration.

use crate::auth::AuthConfig;

/// Configuration for the reference server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Token authentication; `None` disables auth (tests, prototyping).
    pub auth: Option<AuthConfig>,
    /// Maximum accepted payload size in bytes.
    pub max_payload_bytes: usize,
}

impl ServerConfig {
    /// Creates a configuration without authentication.
    pub fn new() -> Self {
        Self {
            auth: None,
            max_payload_bytes: 1024 * 1024,
        }
    }

    /// Enables token authentication.
    #[must_use]
    pub fn with_auth(mut self, auth: AuthConfig) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Sets the maximum accepted payload size.
    #[must_use]
    pub fn with_max_payload_bytes(mut self, bytes: usize) -> Self {
        self.max_payload_bytes = bytes;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}
