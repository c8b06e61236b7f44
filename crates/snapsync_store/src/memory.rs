//! In-memory store for testing and ephemeral sessions.

use crate::error::{StorageError, StorageResult};
use crate::queue::PendingQueue;
use crate::store::{LocalStore, RequeueDisposition};
use parking_lot::Mutex;
use snapsync_protocol::{QueueOperation, Snapshot};
use uuid::Uuid;

#[derive(Debug, Default)]
struct Inner {
    snapshot: Option<Snapshot>,
    queue: PendingQueue,
}

/// An in-memory [`LocalStore`].
///
/// Mirrors [`crate::FileStore`] semantics without persistence. Useful for
/// tests and for sessions that do not need to survive a restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl LocalStore for MemoryStore {
    fn save_snapshot(&self, snapshot: &Snapshot) -> StorageResult<()> {
        self.inner.lock().snapshot = Some(snapshot.clone());
        Ok(())
    }

    fn load_snapshot(&self) -> StorageResult<Option<Snapshot>> {
        Ok(self.inner.lock().snapshot.clone())
    }

    fn enqueue(&self, op: QueueOperation) -> StorageResult<()> {
        self.inner.lock().queue.enqueue(op);
        Ok(())
    }

    fn dequeue_next(&self, now_ms: u64) -> StorageResult<Option<QueueOperation>> {
        Ok(self.inner.lock().queue.dequeue_next(now_ms))
    }

    fn ack(&self, id: Uuid) -> StorageResult<()> {
        if self.inner.lock().queue.ack(id) {
            Ok(())
        } else {
            Err(StorageError::UnknownOperation(id))
        }
    }

    fn requeue(&self, id: Uuid, not_before_ms: u64) -> StorageResult<RequeueDisposition> {
        match self.inner.lock().queue.requeue(id, not_before_ms) {
            Some((true, _)) => Ok(RequeueDisposition::Superseded),
            Some((false, attempt_count)) => Ok(RequeueDisposition::Requeued { attempt_count }),
            None => Err(StorageError::UnknownOperation(id)),
        }
    }

    fn release(&self, id: Uuid) -> StorageResult<()> {
        if self.inner.lock().queue.release(id) {
            Ok(())
        } else {
            Err(StorageError::UnknownOperation(id))
        }
    }

    fn list_pending(&self) -> StorageResult<Vec<QueueOperation>> {
        Ok(self.inner.lock().queue.list())
    }
}
