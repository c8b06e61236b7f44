//! Bearer-token authentication for the reference server.
//!
//! Tokens are scoped to one entity and signed with HMAC-SHA256:
//!
//! ```text
//! <entity_id>:<issued_at_millis>:<hex signature>
//! ```
//!
//! The signature covers a length-prefixed encoding of the entity id plus
//! the timestamp, so entity ids containing `:` cannot forge another
//! token's fields.

use crate::error::{ServerError, ServerResult};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use snapsync_protocol::unix_millis_now;
use std::time::Duration;

type HmacSha256 = Hmac<Sha256>;

/// Authentication configuration.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Secret key for HMAC.
    pub secret: Vec<u8>,
    /// Token expiration duration.
    pub token_expiry: Duration,
}

impl AuthConfig {
    /// Creates a new auth configuration with a 24 hour expiry.
    pub fn new(secret: Vec<u8>) -> Self {
        Self {
            secret,
            token_expiry: Duration::from_secs(24 * 60 * 60),
        }
    }

    /// Sets the token expiration duration.
    #[must_use]
    pub fn with_expiry(mut self, expiry: Duration) -> Self {
        self.token_expiry = expiry;
        self
    }
}

/// Issues and validates entity-scoped bearer tokens.
#[derive(Clone)]
pub struct TokenValidator {
    config: AuthConfig,
}

impl TokenValidator {
    /// Creates a new token validator.
    pub fn new(config: AuthConfig) -> Self {
        Self { config }
    }

    /// Issues a token for an entity, stamped with the current time.
    pub fn issue_token(&self, entity_id: &str) -> String {
        let issued_at = unix_millis_now();
        let signature = self.sign(entity_id, issued_at);
        format!("{entity_id}:{issued_at}:{}", hex(&signature))
    }

    /// Validates a token against the entity it claims to be scoped to.
    pub fn validate_token(&self, token: &str, expected_entity_id: &str) -> ServerResult<()> {
        // Entity ids may contain ':'; the two trailing fields cannot.
        let mut fields = token.rsplitn(3, ':');
        let signature_hex = fields
            .next()
            .ok_or_else(|| ServerError::NotAuthorized("malformed token".into()))?;
        let issued_at: u64 = fields
            .next()
            .and_then(|ts| ts.parse().ok())
            .ok_or_else(|| ServerError::NotAuthorized("malformed token".into()))?;
        let entity_id = fields
            .next()
            .ok_or_else(|| ServerError::NotAuthorized("malformed token".into()))?;

        if entity_id != expected_entity_id {
            return Err(ServerError::NotAuthorized("entity mismatch".into()));
        }

        let expected = self.sign(entity_id, issued_at);
        if signature_hex != hex(&expected) {
            return Err(ServerError::NotAuthorized("invalid signature".into()));
        }

        let expiry_millis = self.config.token_expiry.as_millis() as u64;
        if unix_millis_now() > issued_at + expiry_millis {
            return Err(ServerError::NotAuthorized("token expired".into()));
        }

        Ok(())
    }

    /// Signs the length-prefixed entity id plus timestamp.
    fn sign(&self, entity_id: &str, issued_at: u64) -> [u8; 32] {
        let mut mac = HmacSha256::new_from_slice(&self.config.secret)
            .expect("HMAC can take key of any size");
        mac.update(&(entity_id.len() as u64).to_be_bytes());
        mac.update(entity_id.as_bytes());
        mac.update(&issued_at.to_be_bytes());
        mac.finalize().into_bytes().into()
    }
}

fn hex(bytes: &[u8]) -> String {
    use std::fmt::Write;
    bytes.iter().fold(String::with_capacity(64), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    })
}
