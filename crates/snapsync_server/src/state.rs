//! Server-side row storage and change broadcasting.

use crate::error::{ServerError, ServerResult};
use parking_lot::RwLock;
use snapsync_protocol::{ChangeNotification, FetchResponse, PushOutcome, PushRequest};
use std::collections::HashMap;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Capacity of each per-entity change channel. Slow subscribers that lag
/// past this many notifications simply resubscribe; an extra sync cycle is
/// always safe.
const CHANGE_CHANNEL_CAPACITY: usize = 32;

/// The authoritative store: one versioned row per entity.
///
/// # Invariants
///
/// - `version` strictly increases by 1 per accepted push
/// - a push whose `base_version` does not match the current version leaves
///   the row untouched and reports the current row back
/// - an idempotency key is honored forever: replaying it returns the
///   version assigned to its first application
#[derive(Debug, Default)]
pub struct RowStore {
    rows: RwLock<HashMap<String, FetchResponse>>,
    idempotency: RwLock<HashMap<Uuid, u64>>,
    channels: RwLock<HashMap<String, broadcast::Sender<ChangeNotification>>>,
}

impl RowStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current row for an entity.
    pub fn fetch(&self, entity_id: &str) -> Option<FetchResponse> {
        self.rows.read().get(entity_id).cloned()
    }

    /// Returns the current version for an entity (0 if no row exists).
    pub fn version(&self, entity_id: &str) -> u64 {
        self.rows.read().get(entity_id).map_or(0, |row| row.version)
    }

    /// Applies a push with optimistic concurrency and idempotency-key
    /// dedup, broadcasting a change notification on acceptance.
    pub fn apply_push(
        &self,
        entity_id: &str,
        request: &PushRequest,
    ) -> ServerResult<PushOutcome> {
        // Replayed key: the push already happened, its ack was lost.
        if let Some(version) = self.idempotency.read().get(&request.idempotency_key) {
            tracing::debug!(key = %request.idempotency_key, version, "replayed idempotent push");
            return Ok(PushOutcome::Accepted { version: *version });
        }

        let mut rows = self.rows.write();
        let current_version = rows.get(entity_id).map_or(0, |row| row.version);

        if request.base_version != current_version {
            return match rows.get(entity_id) {
                Some(current) => Ok(PushOutcome::Conflict {
                    current: current.clone(),
                }),
                None => Err(ServerError::InvalidRequest(format!(
                    "base version {} against empty row",
                    request.base_version
                ))),
            };
        }

        let version = current_version + 1;
        rows.insert(
            entity_id.to_string(),
            FetchResponse {
                version,
                payload: request.payload.clone(),
                updated_at_ms: request.updated_at_ms,
                device_id: request.device_id.clone(),
            },
        );
        drop(rows);

        self.idempotency
            .write()
            .insert(request.idempotency_key, version);

        tracing::debug!(entity_id, version, "push accepted");
        self.broadcast(entity_id, ChangeNotification { version });

        Ok(PushOutcome::Accepted { version })
    }

    /// Subscribes to change notifications for an entity.
    pub fn subscribe(&self, entity_id: &str) -> broadcast::Receiver<ChangeNotification> {
        self.channels
            .write()
            .entry(entity_id.to_string())
            .or_insert_with(|| broadcast::channel(CHANGE_CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Returns the number of entities with a row.
    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    /// Returns true if no entity has a row yet.
    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }

    fn broadcast(&self, entity_id: &str, notification: ChangeNotification) {
        if let Some(tx) = self.channels.read().get(entity_id) {
            // No receivers is fine; nobody is listening right now.
            let _ = tx.send(notification);
        }
    }
}
