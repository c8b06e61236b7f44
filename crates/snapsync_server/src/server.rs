//! The reference sync server facade.

use crate::auth::TokenValidator;
use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::state::RowStore;
use snapsync_protocol::{ChangeNotification, FetchResponse, PushOutcome, PushRequest};
use std::sync::Arc;
use tokio::sync::broadcast;

/// An in-memory sync server implementing the remote store contract.
///
/// In a real deployment these handlers sit behind HTTP endpoints
/// (`GET /sync/{id}`, `POST /sync/{id}`, `SUBSCRIBE /sync/{id}/changes`);
/// here they are called directly by integration tests.
///
/// # Example
///
/// ```
/// use snapsync_server::{ServerConfig, SyncServer};
///
/// let server = SyncServer::new(ServerConfig::default());
/// assert!(server.handle_fetch(None, "user-1").unwrap().is_none());
/// ```
pub struct SyncServer {
    config: ServerConfig,
    store: Arc<RowStore>,
    validator: Option<TokenValidator>,
}

impl SyncServer {
    /// Creates a server with a fresh row store.
    pub fn new(config: ServerConfig) -> Self {
        Self::with_store(config, Arc::new(RowStore::new()))
    }

    /// Creates a server over an existing row store.
    pub fn with_store(config: ServerConfig, store: Arc<RowStore>) -> Self {
        let validator = config.auth.clone().map(TokenValidator::new);
        Self {
            config,
            store,
            validator,
        }
    }

    /// Issues a bearer token for an entity, if auth is enabled.
    pub fn issue_token(&self, entity_id: &str) -> Option<String> {
        self.validator
            .as_ref()
            .map(|validator| validator.issue_token(entity_id))
    }

    /// Handles a fetch: the current row, or `None` if no snapshot exists.
    pub fn handle_fetch(
        &self,
        token: Option<&str>,
        entity_id: &str,
    ) -> ServerResult<Option<FetchResponse>> {
        self.authorize(token, entity_id)?;
        Ok(self.store.fetch(entity_id))
    }

    /// Handles a push with optimistic concurrency and idempotency dedup.
    pub fn handle_push(
        &self,
        token: Option<&str>,
        entity_id: &str,
        request: PushRequest,
    ) -> ServerResult<PushOutcome> {
        self.authorize(token, entity_id)?;

        if request.payload.len() > self.config.max_payload_bytes {
            return Err(ServerError::InvalidRequest(format!(
                "payload of {} bytes exceeds limit of {}",
                request.payload.len(),
                self.config.max_payload_bytes
            )));
        }

        self.store.apply_push(entity_id, &request)
    }

    /// Subscribes to change notifications for an entity.
    ///
    /// Subscription does not require a credential; notifications carry
    /// only version numbers, and every data-bearing call is authorized.
    pub fn subscribe(&self, entity_id: &str) -> broadcast::Receiver<ChangeNotification> {
        self.store.subscribe(entity_id)
    }

    /// Returns the current version for an entity (0 if no row exists).
    pub fn version(&self, entity_id: &str) -> u64 {
        self.store.version(entity_id)
    }

    fn authorize(&self, token: Option<&str>, entity_id: &str) -> ServerResult<()> {
        let Some(validator) = &self.validator else {
            return Ok(());
        };
        let token =
            token.ok_or_else(|| ServerError::NotAuthorized("missing bearer token".into()))?;
        validator.validate_token(token, entity_id)
    }
}
