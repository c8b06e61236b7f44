//! Local store trait definition.

use crate::error::StorageResult;
use snapsync_protocol::{QueueOperation, Snapshot};
use uuid::Uuid;

/// What happened to an operation on requeue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequeueDisposition {
    /// The operation went back to pending with the given attempt count.
    Requeued {
        /// Attempts recorded so far, including the one that just failed.
        attempt_count: u32,
    },
    /// A newer pending operation for the same entity superseded this one;
    /// it was dropped instead of requeued.
    Superseded,
}

/// Durable persistence for one sync scope: the latest known snapshot and
/// the offline mutation queue.
///
/// # Invariants
///
/// - `save_snapshot` followed by a restart and `load_snapshot` returns an
///   equal snapshot
/// - the queue holds operations in creation order; `dequeue_next` returns
///   the oldest ready operation and marks it in flight
/// - at most one operation per entity is in flight at a time
/// - `enqueue` supersedes any pending (not in-flight) operation for the
///   same entity, so queue depth per entity stays at one when state is
///   always captured as a full snapshot
/// - every write is atomic per record: after a crash the store holds either
///   the old or the new record, never a torn mix
///
/// Implementations must be `Send + Sync`; the mutation path and the sync
/// worker access the store from different tasks.
pub trait LocalStore: Send + Sync {
    /// Persists the latest known snapshot.
    fn save_snapshot(&self, snapshot: &Snapshot) -> StorageResult<()>;

    /// Loads the persisted snapshot, if any.
    fn load_snapshot(&self) -> StorageResult<Option<Snapshot>>;

    /// Appends an operation, superseding any pending operation for the
    /// same entity.
    fn enqueue(&self, op: QueueOperation) -> StorageResult<()>;

    /// Dequeues the oldest pending operation whose backoff deadline has
    /// passed and whose entity has nothing in flight, marking it in flight.
    fn dequeue_next(&self, now_ms: u64) -> StorageResult<Option<QueueOperation>>;

    /// Acknowledges an operation: the server accepted it and it is removed.
    fn ack(&self, id: Uuid) -> StorageResult<()>;

    /// Requeues a failed in-flight operation with a backoff deadline,
    /// incrementing its attempt count.
    ///
    /// If a newer pending operation for the same entity arrived while this
    /// one was in flight, the failed operation is dropped instead and
    /// [`RequeueDisposition::Superseded`] is returned.
    fn requeue(&self, id: Uuid, not_before_ms: u64) -> StorageResult<RequeueDisposition>;

    /// Returns a cancelled in-flight operation to pending without counting
    /// an attempt.
    fn release(&self, id: Uuid) -> StorageResult<()>;

    /// Lists pending and in-flight operations in queue order, for status
    /// reporting.
    fn list_pending(&self) -> StorageResult<Vec<QueueOperation>>;
}
