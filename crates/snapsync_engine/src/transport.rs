//! Remote store abstraction for sync operations.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use snapsync_protocol::{ChangeNotification, FetchResponse, PushOutcome, PushRequest};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use tokio::sync::mpsc;
use uuid::Uuid;

/// The remote versioned row store consumed by the sync worker.
///
/// This trait abstracts the network layer, allowing different
/// implementations (HTTP via [`crate::HttpRemote`], an in-process server
/// for tests, etc.). Implementations must uphold the idempotence contract:
/// a retried push bearing an already-seen idempotency key returns the
/// originally assigned version without advancing the row again.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Fetches the current remote row, or `None` if no snapshot exists yet
    /// (clients treat that as remote version 0).
    async fn fetch(&self, entity_id: &str) -> SyncResult<Option<FetchResponse>>;

    /// Pushes a snapshot payload, replacing the row if `base_version`
    /// matches.
    async fn push(&self, entity_id: &str, request: PushRequest) -> SyncResult<PushOutcome>;
}

/// A server-pushed channel of remote change notifications.
///
/// Notifications may be missed or duplicated; triggering an extra sync
/// cycle is always safe, so implementations do not need delivery
/// guarantees.
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    /// Subscribes to change notifications for an entity.
    async fn subscribe(
        &self,
        entity_id: &str,
    ) -> SyncResult<mpsc::Receiver<ChangeNotification>>;
}

/// An in-process remote store for testing.
///
/// Behaves like a minimal compliant server (versioned row, optimistic
/// concurrency, idempotency-key dedup) with scripted failure injection.
#[derive(Debug, Default)]
pub struct MockRemote {
    row: Mutex<Option<FetchResponse>>,
    idempotency: Mutex<HashMap<Uuid, u64>>,
    pushes: Mutex<Vec<PushRequest>>,
    fetch_failures: AtomicU32,
    push_failures: AtomicU32,
    auth_denied: AtomicBool,
}

impl MockRemote {
    /// Creates an empty remote (no snapshot exists yet).
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the remote row.
    pub fn set_row(&self, row: FetchResponse) {
        *self.row.lock() = Some(row);
    }

    /// Returns the current remote row.
    pub fn row(&self) -> Option<FetchResponse> {
        self.row.lock().clone()
    }

    /// Makes the next `n` fetches fail with a network error.
    pub fn fail_next_fetches(&self, n: u32) {
        self.fetch_failures.store(n, Ordering::SeqCst);
    }

    /// Makes the next `n` pushes fail with a network error.
    pub fn fail_next_pushes(&self, n: u32) {
        self.push_failures.store(n, Ordering::SeqCst);
    }

    /// Makes every call fail with an authentication error.
    pub fn deny_auth(&self, denied: bool) {
        self.auth_denied.store(denied, Ordering::SeqCst);
    }

    /// Returns every push request received, including failed ones.
    pub fn recorded_pushes(&self) -> Vec<PushRequest> {
        self.pushes.lock().clone()
    }

    fn check_auth(&self) -> SyncResult<()> {
        if self.auth_denied.load(Ordering::SeqCst) {
            Err(SyncError::Auth("token rejected".into()))
        } else {
            Ok(())
        }
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl RemoteStore for MockRemote {
    async fn fetch(&self, _entity_id: &str) -> SyncResult<Option<FetchResponse>> {
        self.check_auth()?;
        if Self::take_failure(&self.fetch_failures) {
            return Err(SyncError::Network("injected fetch failure".into()));
        }
        Ok(self.row.lock().clone())
    }

    async fn push(&self, _entity_id: &str, request: PushRequest) -> SyncResult<PushOutcome> {
        self.check_auth()?;
        self.pushes.lock().push(request.clone());

        if Self::take_failure(&self.push_failures) {
            return Err(SyncError::Network("injected push failure".into()));
        }

        // Idempotent replay: same key, same version, no bump.
        if let Some(version) = self.idempotency.lock().get(&request.idempotency_key) {
            return Ok(PushOutcome::Accepted { version: *version });
        }

        let mut row = self.row.lock();
        let current_version = row.as_ref().map_or(0, |r| r.version);

        if request.base_version != current_version {
            let current = row.clone().ok_or_else(|| {
                SyncError::Protocol("push conflict against a missing row".into())
            })?;
            return Ok(PushOutcome::Conflict { current });
        }

        let version = current_version + 1;
        *row = Some(FetchResponse {
            version,
            payload: request.payload.clone(),
            updated_at_ms: request.updated_at_ms,
            device_id: request.device_id.clone(),
        });
        self.idempotency
            .lock()
            .insert(request.idempotency_key, version);

        Ok(PushOutcome::Accepted { version })
    }
}

/// An in-process change feed for testing.
#[derive(Debug, Default)]
pub struct MockChangeFeed {
    subscribers: Mutex<Vec<mpsc::Sender<ChangeNotification>>>,
}

impl MockChangeFeed {
    /// Creates a feed with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivers a notification to every live subscriber.
    pub fn notify(&self, notification: ChangeNotification) {
        self.subscribers
            .lock()
            .retain(|tx| tx.try_send(notification).is_ok());
    }

    /// Returns the number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

#[async_trait]
impl ChangeFeed for MockChangeFeed {
    async fn subscribe(
        &self,
        _entity_id: &str,
    ) -> SyncResult<mpsc::Receiver<ChangeNotification>> {
        let (tx, rx) = mpsc::channel(16);
        self.subscribers.lock().push(tx);
        Ok(rx)
    }
}
