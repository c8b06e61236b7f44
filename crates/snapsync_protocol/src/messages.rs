//! Wire messages for the remote sync contract.
//!
//! The remote store exposes one versioned row per entity:
//!
//! - fetch: returns the current row, or nothing if no snapshot exists yet
//!   (clients treat that as remote version 0)
//! - push: replaces the row if `base_version` matches the current version,
//!   otherwise reports a conflict carrying the current row
//! - a change channel delivers version notifications to listeners

use crate::operation::QueueOperation;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The remote row for an entity, as returned by a fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchResponse {
    /// Current remote version.
    pub version: u64,
    /// Opaque snapshot payload.
    pub payload: Vec<u8>,
    /// Wall-clock timestamp of the write that produced this version.
    pub updated_at_ms: u64,
    /// Device that produced this version.
    pub device_id: String,
}

/// A request to replace the remote row with a new snapshot payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushRequest {
    /// Client-generated idempotency key; the server must de-duplicate
    /// retried pushes bearing the same key.
    pub idempotency_key: Uuid,
    /// The remote version this push is based on.
    pub base_version: u64,
    /// Opaque snapshot payload.
    pub payload: Vec<u8>,
    /// Wall-clock timestamp of the local mutation.
    pub updated_at_ms: u64,
    /// Device issuing the push.
    pub device_id: String,
}

impl PushRequest {
    /// Builds a push request from a queued operation.
    pub fn from_operation(op: &QueueOperation, device_id: impl Into<String>) -> Self {
        Self {
            idempotency_key: op.id,
            base_version: op.base_version,
            payload: op.payload.clone(),
            updated_at_ms: op.updated_at_ms,
            device_id: device_id.into(),
        }
    }

    /// Rebases the push onto a newer remote version.
    ///
    /// Used after a conflict resolves in favor of the local payload.
    #[must_use]
    pub fn rebased_on(mut self, version: u64) -> Self {
        self.base_version = version;
        self
    }
}

/// The result of a push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PushOutcome {
    /// The server accepted the push and assigned a new version.
    Accepted {
        /// The newly assigned remote version.
        version: u64,
    },
    /// The row moved since `base_version`; the current row is returned so
    /// the client can resolve without a second fetch.
    Conflict {
        /// The current remote row.
        current: FetchResponse,
    },
}

impl PushOutcome {
    /// Returns the accepted version, if any.
    pub fn accepted_version(&self) -> Option<u64> {
        match self {
            PushOutcome::Accepted { version } => Some(*version),
            PushOutcome::Conflict { .. } => None,
        }
    }
}

/// A notification that the remote row changed.
///
/// Notifications may be missed or duplicated; it is always safe to trigger
/// an extra sync cycle in response to one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeNotification {
    /// The remote version after the change.
    pub version: u64,
}
