//! Durable offline-queue operations.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The kind of a queued operation.
///
/// Full-snapshot push is the only kind the engine requires; richer
/// deployments may add incremental kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Push the entire snapshot payload, replacing the remote row.
    FullSnapshotPush,
}

/// Lifecycle status of a queued operation.
///
/// Transitions: `Pending → InFlight` when dequeued, `InFlight → Done` on
/// server acceptance (the entry is then removed), `InFlight → Failed` on
/// error. A failed operation becomes dequeuable again once its backoff
/// deadline passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    /// Waiting to be pushed.
    Pending,
    /// Currently being pushed; at most one per entity.
    InFlight,
    /// The last push attempt failed; waiting out the backoff delay.
    Failed,
    /// Accepted by the server.
    Done,
}

impl OperationStatus {
    /// Returns true for statuses that can still be dequeued (pending, or
    /// failed and awaiting retry).
    pub fn is_queued(&self) -> bool {
        matches!(self, OperationStatus::Pending | OperationStatus::Failed)
    }
}

/// A single entry in the offline mutation queue.
///
/// The `id` doubles as the idempotency key for pushes: a retried push
/// bearing the same id must not advance the remote version twice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueOperation {
    /// Locally generated unique identifier, used as the idempotency key.
    pub id: Uuid,
    /// The entity this operation belongs to.
    pub entity_id: String,
    /// Operation kind.
    pub kind: OperationKind,
    /// Snapshot payload at time of enqueue.
    pub payload: Vec<u8>,
    /// Wall-clock timestamp of the mutation that produced the payload.
    pub updated_at_ms: u64,
    /// The remote version the client believed current when this operation
    /// was created.
    pub base_version: u64,
    /// Current lifecycle status.
    pub status: OperationStatus,
    /// Push attempts so far.
    pub attempt_count: u32,
    /// Creation time, used for FIFO ordering.
    pub created_at_ms: u64,
    /// Earliest time the operation may be dequeued again (backoff deadline).
    pub not_before_ms: u64,
}

impl QueueOperation {
    /// Creates a pending full-snapshot push.
    pub fn full_snapshot_push(
        entity_id: impl Into<String>,
        payload: Vec<u8>,
        updated_at_ms: u64,
        base_version: u64,
        created_at_ms: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            entity_id: entity_id.into(),
            kind: OperationKind::FullSnapshotPush,
            payload,
            updated_at_ms,
            base_version,
            status: OperationStatus::Pending,
            attempt_count: 0,
            created_at_ms,
            not_before_ms: 0,
        }
    }

    /// Returns true if the operation may be dequeued at `now_ms`.
    pub fn is_ready(&self, now_ms: u64) -> bool {
        self.status.is_queued() && self.not_before_ms <= now_ms
    }

    /// Marks the operation as in flight.
    pub fn mark_in_flight(&mut self) {
        self.status = OperationStatus::InFlight;
    }

    /// Marks the operation as done (server accepted it).
    pub fn mark_done(&mut self) {
        self.status = OperationStatus::Done;
    }

    /// Records a failed attempt; the operation waits out the backoff
    /// deadline before it can be dequeued again.
    pub fn mark_failed(&mut self, not_before_ms: u64) {
        self.attempt_count += 1;
        self.not_before_ms = not_before_ms;
        self.status = OperationStatus::Failed;
    }

    /// Returns the operation to `Pending` without counting an attempt.
    ///
    /// Used when an in-flight push is cancelled rather than failed.
    pub fn release(&mut self) {
        self.status = OperationStatus::Pending;
    }
}
