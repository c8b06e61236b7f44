//! File-based store for persistent sync scopes.

use crate::error::{StorageError, StorageResult};
use crate::queue::PendingQueue;
use crate::store::{LocalStore, RequeueDisposition};
use fs2::FileExt;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use snapsync_protocol::{QueueOperation, Snapshot};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// File names within the store directory.
const LOCK_FILE: &str = "LOCK";
const SNAPSHOT_FILE: &str = "snapshot.json";
const QUEUE_FILE: &str = "queue.json";

#[derive(Debug)]
struct Inner {
    snapshot: Option<Snapshot>,
    queue: PendingQueue,
}

/// A persistent [`LocalStore`] backed by a locked directory.
///
/// ```text
/// <store_path>/
/// ├─ LOCK            # Advisory lock for single-writer scope
/// ├─ snapshot.json   # Latest known snapshot
/// └─ queue.json      # Offline mutation queue
/// ```
///
/// The LOCK file ensures only one process owns a sync scope at a time.
/// Records are written to a temporary file, fsynced, and renamed into
/// place, so a crash mid-write leaves either the old or the new record.
///
/// Operations that were in flight when the process died are recovered to
/// pending on open; repeating their push is safe because the operation id
/// is the idempotency key.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    inner: Mutex<Inner>,
    /// Held for the lifetime of the store; the lock releases on drop.
    _lock_file: File,
}

impl FileStore {
    /// Opens or creates a store directory.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Locked`] if another process holds the lock,
    /// [`StorageError::Corrupted`] if a persisted record cannot be decoded,
    /// or an I/O error.
    pub fn open(path: &Path) -> StorageResult<Self> {
        fs::create_dir_all(path)?;

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked);
        }

        let snapshot: Option<Snapshot> = read_record(&path.join(SNAPSHOT_FILE))?;
        let entries: Vec<QueueOperation> =
            read_record(&path.join(QUEUE_FILE))?.unwrap_or_default();
        let queue = PendingQueue::recover(entries);

        tracing::debug!(
            path = %path.display(),
            queued = queue.len(),
            has_snapshot = snapshot.is_some(),
            "opened file store"
        );

        Ok(Self {
            path: path.to_path_buf(),
            inner: Mutex::new(Inner { snapshot, queue }),
            _lock_file: lock_file,
        })
    }

    /// Returns the store directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist_queue(&self, queue: &PendingQueue) -> StorageResult<()> {
        write_record(&self.path.join(QUEUE_FILE), &queue.list())
    }
}

/// Reads a JSON record, returning `None` if the file does not exist.
fn read_record<T: DeserializeOwned>(path: &Path) -> StorageResult<Option<T>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };

    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|err| StorageError::Corrupted(format!("{}: {err}", path.display())))
}

/// Writes a JSON record atomically: temp file, fsync, rename.
fn write_record<T: Serialize>(path: &Path, record: &T) -> StorageResult<()> {
    let bytes =
        serde_json::to_vec_pretty(record).map_err(|err| StorageError::Encode(err.to_string()))?;

    let tmp_path = path.with_extension("tmp");
    let mut tmp = File::create(&tmp_path)?;
    tmp.write_all(&bytes)?;
    tmp.sync_all()?;
    drop(tmp);

    fs::rename(&tmp_path, path)?;
    Ok(())
}

impl LocalStore for FileStore {
    fn save_snapshot(&self, snapshot: &Snapshot) -> StorageResult<()> {
        let mut inner = self.inner.lock();
        write_record(&self.path.join(SNAPSHOT_FILE), snapshot)?;
        inner.snapshot = Some(snapshot.clone());
        Ok(())
    }

    fn load_snapshot(&self) -> StorageResult<Option<Snapshot>> {
        Ok(self.inner.lock().snapshot.clone())
    }

    fn enqueue(&self, op: QueueOperation) -> StorageResult<()> {
        let mut inner = self.inner.lock();
        let mut queue = inner.queue.clone();
        queue.enqueue(op);
        self.persist_queue(&queue)?;
        inner.queue = queue;
        Ok(())
    }

    fn dequeue_next(&self, now_ms: u64) -> StorageResult<Option<QueueOperation>> {
        let mut inner = self.inner.lock();
        let mut queue = inner.queue.clone();
        let dequeued = queue.dequeue_next(now_ms);
        if dequeued.is_some() {
            self.persist_queue(&queue)?;
            inner.queue = queue;
        }
        Ok(dequeued)
    }

    fn ack(&self, id: Uuid) -> StorageResult<()> {
        let mut inner = self.inner.lock();
        let mut queue = inner.queue.clone();
        if !queue.ack(id) {
            return Err(StorageError::UnknownOperation(id));
        }
        self.persist_queue(&queue)?;
        inner.queue = queue;
        Ok(())
    }

    fn requeue(&self, id: Uuid, not_before_ms: u64) -> StorageResult<RequeueDisposition> {
        let mut inner = self.inner.lock();
        let mut queue = inner.queue.clone();
        let disposition = match queue.requeue(id, not_before_ms) {
            Some((true, _)) => RequeueDisposition::Superseded,
            Some((false, attempt_count)) => RequeueDisposition::Requeued { attempt_count },
            None => return Err(StorageError::UnknownOperation(id)),
        };
        self.persist_queue(&queue)?;
        inner.queue = queue;
        Ok(disposition)
    }

    fn release(&self, id: Uuid) -> StorageResult<()> {
        let mut inner = self.inner.lock();
        let mut queue = inner.queue.clone();
        if !queue.release(id) {
            return Err(StorageError::UnknownOperation(id));
        }
        self.persist_queue(&queue)?;
        inner.queue = queue;
        Ok(())
    }

    fn list_pending(&self) -> StorageResult<Vec<QueueOperation>> {
        Ok(self.inner.lock().queue.list())
    }
}
