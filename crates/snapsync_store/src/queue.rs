//! In-memory queue state shared by the store backends.

use serde::{Deserialize, Serialize};
use snapsync_protocol::{OperationStatus, QueueOperation};
use uuid::Uuid;

/// The offline mutation queue: operations in arrival order, with collapse
/// and per-entity in-flight exclusivity.
///
/// Both [`crate::MemoryStore`] and [`crate::FileStore`] hold one of these;
/// the file store persists it after every mutation.
///
/// # Invariants
///
/// - Entries stay in arrival order
/// - At most one entry per entity is pending at a time (newer enqueues
///   supersede older pending entries)
/// - At most one entry per entity is in flight at a time
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingQueue {
    entries: Vec<QueueOperation>,
}

impl PendingQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restores a persisted queue, recovering interrupted operations.
    ///
    /// An entry that was in flight when the process died goes back to
    /// pending. The push it belonged to is safe to repeat because the
    /// operation id doubles as the idempotency key.
    pub fn recover(mut entries: Vec<QueueOperation>) -> Self {
        let mut recovered = 0usize;
        for entry in &mut entries {
            if entry.status == OperationStatus::InFlight {
                entry.release();
                recovered += 1;
            }
        }
        if recovered > 0 {
            tracing::warn!(recovered, "recovered interrupted queue operations");
        }
        Self { entries }
    }

    /// Appends an operation, dropping any queued (pending or failed) entry
    /// for the same entity. In-flight entries are left alone.
    pub fn enqueue(&mut self, op: QueueOperation) {
        self.entries.retain(|existing| {
            existing.entity_id != op.entity_id || existing.status == OperationStatus::InFlight
        });
        self.entries.push(op);
    }

    /// Dequeues the oldest ready operation, marking it in flight.
    ///
    /// An operation is ready when it is pending, its backoff deadline has
    /// passed, and its entity has nothing in flight.
    pub fn dequeue_next(&mut self, now_ms: u64) -> Option<QueueOperation> {
        let in_flight: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.status == OperationStatus::InFlight)
            .map(|entry| entry.entity_id.clone())
            .collect();

        let next = self.entries.iter_mut().find(|entry| {
            entry.is_ready(now_ms) && !in_flight.contains(&entry.entity_id)
        })?;

        next.mark_in_flight();
        Some(next.clone())
    }

    /// Removes an acknowledged operation. Returns false if unknown.
    pub fn ack(&mut self, id: Uuid) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.id != id);
        self.entries.len() < before
    }

    /// Requeues a failed operation with a backoff deadline, or drops it if
    /// a newer pending entry for the same entity superseded it.
    ///
    /// Returns `None` if the operation is unknown, otherwise
    /// `Some((superseded, attempt_count))`.
    pub fn requeue(&mut self, id: Uuid, not_before_ms: u64) -> Option<(bool, u32)> {
        let index = self.entries.iter().position(|entry| entry.id == id)?;
        let entity_id = self.entries[index].entity_id.clone();

        let superseded = self.entries.iter().any(|entry| {
            entry.id != id
                && entry.entity_id == entity_id
                && entry.status == OperationStatus::Pending
        });

        if superseded {
            let dropped = self.entries.remove(index);
            Some((true, dropped.attempt_count))
        } else {
            let entry = &mut self.entries[index];
            entry.mark_failed(not_before_ms);
            Some((false, entry.attempt_count))
        }
    }

    /// Returns a cancelled operation to pending without counting an
    /// attempt. Returns false if unknown.
    pub fn release(&mut self, id: Uuid) -> bool {
        match self.entries.iter_mut().find(|entry| entry.id == id) {
            Some(entry) => {
                entry.release();
                true
            }
            None => false,
        }
    }

    /// Returns all entries in queue order.
    pub fn list(&self) -> Vec<QueueOperation> {
        self.entries.clone()
    }

    /// Returns the number of queued operations.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_op(entity_id: &str, payload: u8, created_at_ms: u64) -> QueueOperation {
        QueueOperation::full_snapshot_push(entity_id, vec![payload], created_at_ms, 0, created_at_ms)
    }

    #[test]
    fn fifo_order() {
        let mut queue = PendingQueue::new();
        queue.enqueue(make_op("a", 1, 10));
        queue.enqueue(make_op("b", 2, 20));

        let first = queue.dequeue_next(100).unwrap();
        assert_eq!(first.entity_id, "a");

        let second = queue.dequeue_next(100).unwrap();
        assert_eq!(second.entity_id, "b");

        assert!(queue.dequeue_next(100).is_none());
    }

    #[test]
    fn enqueue_collapses_pending_for_same_entity() {
        let mut queue = PendingQueue::new();
        queue.enqueue(make_op("a", 1, 10));
        queue.enqueue(make_op("a", 2, 20));

        assert_eq!(queue.len(), 1);
        let op = queue.dequeue_next(100).unwrap();
        assert_eq!(op.payload, vec![2]);
    }

    #[test]
    fn enqueue_keeps_in_flight_entry() {
        let mut queue = PendingQueue::new();
        queue.enqueue(make_op("a", 1, 10));
        let in_flight = queue.dequeue_next(100).unwrap();

        queue.enqueue(make_op("a", 2, 20));
        assert_eq!(queue.len(), 2);

        // The entity already has an op in flight, so the newer one waits.
        assert!(queue.dequeue_next(100).is_none());

        assert!(queue.ack(in_flight.id));
        let next = queue.dequeue_next(100).unwrap();
        assert_eq!(next.payload, vec![2]);
    }

    #[test]
    fn requeue_respects_backoff_deadline() {
        let mut queue = PendingQueue::new();
        queue.enqueue(make_op("a", 1, 10));
        let op = queue.dequeue_next(100).unwrap();

        let (superseded, attempts) = queue.requeue(op.id, 500).unwrap();
        assert!(!superseded);
        assert_eq!(attempts, 1);

        assert!(queue.dequeue_next(499).is_none());
        assert!(queue.dequeue_next(500).is_some());
    }

    #[test]
    fn requeue_drops_superseded_operation() {
        let mut queue = PendingQueue::new();
        queue.enqueue(make_op("a", 1, 10));
        let old = queue.dequeue_next(100).unwrap();

        // A newer mutation arrives while the old one is in flight.
        queue.enqueue(make_op("a", 2, 20));

        let (superseded, _) = queue.requeue(old.id, 500).unwrap();
        assert!(superseded);
        assert_eq!(queue.len(), 1);

        let survivor = queue.dequeue_next(100).unwrap();
        assert_eq!(survivor.payload, vec![2]);
    }

    #[test]
    fn release_returns_to_pending_without_attempt() {
        let mut queue = PendingQueue::new();
        queue.enqueue(make_op("a", 1, 10));
        let op = queue.dequeue_next(100).unwrap();

        assert!(queue.release(op.id));
        let again = queue.dequeue_next(100).unwrap();
        assert_eq!(again.id, op.id);
        assert_eq!(again.attempt_count, 0);
    }

    #[test]
    fn recover_resets_in_flight() {
        let mut queue = PendingQueue::new();
        queue.enqueue(make_op("a", 1, 10));
        let op = queue.dequeue_next(100).unwrap();

        let recovered = PendingQueue::recover(queue.list());
        let replayed = recovered.list();
        assert_eq!(replayed.len(), 1);
        assert_eq!(replayed[0].id, op.id);
        assert_eq!(replayed[0].status, OperationStatus::Pending);
    }

    #[test]
    fn unknown_ids_are_reported() {
        let mut queue = PendingQueue::new();
        assert!(!queue.ack(Uuid::new_v4()));
        assert!(queue.requeue(Uuid::new_v4(), 0).is_none());
        assert!(!queue.release(Uuid::new_v4()));
    }
}
