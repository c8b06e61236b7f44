//! The sync manager: mutation intake and the background sync worker.
//!
//! One worker runs per synchronized entity. Mutation capture and enqueue
//! are synchronous and fast on the caller's thread; the worker drains the
//! queue asynchronously, one push/pull round-trip in flight at a time.
//!
//! The cycle machine follows `Idle → Syncing → {Idle, Conflict, Error}`:
//! pull the remote row, compare versions against the queue head's base
//! version, push or resolve, and repeat until the queue is drained or a
//! backoff deadline is scheduled.

use crate::capture::StateCapture;
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::listener::run_listener;
use crate::status::{ErrorDetail, ErrorKind, SyncState, SyncStatus};
use crate::transport::{ChangeFeed, RemoteStore};
use parking_lot::Mutex;
use snapsync_protocol::{
    unix_millis_now, ConflictRecord, ConflictWinner, FetchResponse, PushOutcome, PushRequest,
    QueueOperation, Snapshot,
};
use snapsync_store::{LocalStore, RequeueDisposition, StorageError};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Internal wake-up events for the worker.
#[derive(Debug)]
pub(crate) enum Trigger {
    /// A local mutation was captured and enqueued.
    Mutation,
    /// A caller-invoked manual sync.
    Manual,
    /// The remote change listener reported a newer version.
    RemoteChange {
        /// Version announced by the notification.
        version: u64,
    },
    /// The host reported a connectivity transition.
    Online(bool),
    /// A failure on the mutation path that the worker should surface.
    Fault(ErrorDetail),
}

/// Outcome of one pull-compare-push iteration.
enum CycleOutcome {
    /// Queue empty and local matches remote; nothing to do.
    Clean,
    /// One operation was committed or dropped; keep draining.
    Progress,
    /// A transient failure or a not-yet-due entry; wake again at the
    /// given time.
    Backoff { until_ms: u64 },
}

/// Why a cycle stopped early.
enum CycleAbort {
    /// Shutdown was requested mid-call.
    Cancelled,
    /// The credential was rejected; park until reauthentication.
    Auth(ErrorDetail),
    /// The retry budget is spent; park until a manual trigger or a fresh
    /// mutation.
    Exhausted(ErrorDetail),
    /// Storage or protocol failure; park.
    Fatal(ErrorDetail),
}

/// Millisecond clock anchored to the async runtime.
///
/// Backoff deadlines and queue readiness use this clock so they follow the
/// runtime's (possibly virtual) time; wall-clock stamps on snapshots and
/// conflict records come from [`unix_millis_now`] instead.
#[derive(Debug, Clone, Copy)]
struct WorkerClock {
    start: Instant,
    epoch_ms: u64,
}

impl WorkerClock {
    fn new() -> Self {
        Self {
            start: Instant::now(),
            epoch_ms: unix_millis_now(),
        }
    }

    fn now_ms(&self) -> u64 {
        self.epoch_ms + self.start.elapsed().as_millis() as u64
    }

    fn instant_at_ms(&self, ms: u64) -> Instant {
        self.start + Duration::from_millis(ms.saturating_sub(self.epoch_ms))
    }
}

/// Awaits a network call with the bounded request timeout, aborting early
/// on shutdown. `None` means the call was cancelled.
async fn guarded<T>(
    mut shutdown: watch::Receiver<bool>,
    timeout: Duration,
    fut: impl Future<Output = SyncResult<T>>,
) -> Option<SyncResult<T>> {
    tokio::select! {
        _ = shutdown.wait_for(|stop| *stop) => None,
        result = tokio::time::timeout(timeout, fut) => Some(match result {
            Ok(inner) => inner,
            Err(_) => Err(SyncError::Timeout),
        }),
    }
}

/// Builds a sync worker for one entity and spawns it.
///
/// Identity (entity, device, credential) is passed in explicitly so that
/// multiple workers can coexist in one process.
///
/// # Example
///
/// ```rust,ignore
/// let handle = SyncManager::new(config, store, capture, remote)
///     .with_change_feed(feed)
///     .spawn();
///
/// handle.notify_mutation()?;
/// ```
pub struct SyncManager {
    config: SyncConfig,
    store: Arc<dyn LocalStore>,
    capture: Arc<dyn StateCapture>,
    remote: Arc<dyn RemoteStore>,
    changes: Option<Arc<dyn ChangeFeed>>,
}

impl SyncManager {
    /// Creates a manager without a change feed (pull/push only).
    pub fn new(
        config: SyncConfig,
        store: Arc<dyn LocalStore>,
        capture: Arc<dyn StateCapture>,
        remote: Arc<dyn RemoteStore>,
    ) -> Self {
        Self {
            config,
            store,
            capture,
            remote,
            changes: None,
        }
    }

    /// Attaches a remote change feed; the worker will react to pushed
    /// notifications in near-real-time.
    #[must_use]
    pub fn with_change_feed(mut self, changes: Arc<dyn ChangeFeed>) -> Self {
        self.changes = Some(changes);
        self
    }

    /// Spawns the worker (and listener, if configured) onto the current
    /// tokio runtime and returns the caller-facing handle.
    pub fn spawn(self) -> SyncHandle {
        let initial_pending = self.store.list_pending().map(|p| p.len()).unwrap_or(0);

        let (status_tx, status_rx) = watch::channel(SyncStatus::idle(initial_pending));
        let (trigger_tx, trigger_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let worker = SyncWorker {
            config: self.config.clone(),
            store: Arc::clone(&self.store),
            remote: self.remote,
            trigger_rx,
            shutdown_rx: shutdown_rx.clone(),
            status_tx,
            status: SyncStatus::idle(initial_pending),
            clock: WorkerClock::new(),
            online: true,
            error_latched: false,
            pull_failures: 0,
            debounce_deadline: None,
            retry_deadline: None,
        };

        let mut tasks: Vec<JoinHandle<()>> = vec![tokio::spawn(worker.run())];

        if let Some(feed) = self.changes {
            tasks.push(tokio::spawn(run_listener(
                feed,
                self.config.entity_id.clone(),
                trigger_tx.clone(),
                shutdown_rx,
                self.config.retry.clone(),
            )));
        }

        SyncHandle {
            inner: Arc::new(HandleInner {
                config: self.config,
                store: self.store,
                capture: self.capture,
                trigger_tx,
                status_rx,
                shutdown_tx,
                tasks: Mutex::new(tasks),
            }),
        }
    }
}

struct HandleInner {
    config: SyncConfig,
    store: Arc<dyn LocalStore>,
    capture: Arc<dyn StateCapture>,
    trigger_tx: mpsc::UnboundedSender<Trigger>,
    status_rx: watch::Receiver<SyncStatus>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Caller-facing handle to a running sync worker.
///
/// Cheap to clone; all clones drive the same worker.
#[derive(Clone)]
pub struct SyncHandle {
    inner: Arc<HandleInner>,
}

impl SyncHandle {
    /// Captures the current application state, persists it, enqueues a
    /// push, and nudges the debounced worker.
    ///
    /// Runs synchronously on the caller's thread and never blocks on the
    /// network. A capture failure is fatal to this mutation only: it is
    /// logged, surfaced through the status channel, and the mutation is
    /// dropped.
    pub fn notify_mutation(&self) -> SyncResult<()> {
        let inner = &self.inner;

        let payload = match inner.capture.capture() {
            Ok(payload) => payload,
            Err(err) => {
                tracing::error!(error = %err, "state capture failed; mutation dropped");
                self.report_fault(ErrorKind::Capture, err.to_string());
                return Err(err.into());
            }
        };

        let now_ms = unix_millis_now();
        let base_version = match inner.store.load_snapshot() {
            Ok(snapshot) => snapshot.map_or(0, |s| s.version),
            Err(err) => return self.storage_fault(err),
        };

        let snapshot = Snapshot {
            entity_id: inner.config.entity_id.clone(),
            version: base_version,
            payload: payload.clone(),
            updated_at_ms: now_ms,
            device_id: inner.config.device_id.clone(),
        };
        if let Err(err) = inner.store.save_snapshot(&snapshot) {
            return self.storage_fault(err);
        }

        let op = QueueOperation::full_snapshot_push(
            &inner.config.entity_id,
            payload,
            now_ms,
            base_version,
            now_ms,
        );
        if let Err(err) = inner.store.enqueue(op) {
            return self.storage_fault(err);
        }

        let _ = inner.trigger_tx.send(Trigger::Mutation);
        Ok(())
    }

    /// Triggers a sync cycle immediately, bypassing debounce and backoff
    /// deadlines and clearing a parked error state.
    pub fn force_sync(&self) {
        let _ = self.inner.trigger_tx.send(Trigger::Manual);
    }

    /// Reports a connectivity transition from the host application.
    ///
    /// Workers start assuming they are online. While offline, mutations
    /// queue locally and no network calls are made; going online drains
    /// the queue.
    pub fn set_online(&self, online: bool) {
        let _ = self.inner.trigger_tx.send(Trigger::Online(online));
    }

    /// Returns the current sync status.
    pub fn status(&self) -> SyncStatus {
        self.inner.status_rx.borrow().clone()
    }

    /// Returns a watch receiver that yields every status transition.
    pub fn watch_status(&self) -> watch::Receiver<SyncStatus> {
        self.inner.status_rx.clone()
    }

    /// Stops the worker and the change listener.
    ///
    /// Aborts any in-flight network call; a dequeued operation goes back
    /// to pending (not done), so no queued write is lost.
    pub async fn shutdown(&self) {
        let _ = self.inner.shutdown_tx.send(true);
        let tasks: Vec<JoinHandle<()>> = self.inner.tasks.lock().drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }
    }

    fn report_fault(&self, kind: ErrorKind, message: String) {
        let detail = ErrorDetail::new(
            kind,
            message,
            &self.inner.config.entity_id,
            unix_millis_now(),
        );
        let _ = self.inner.trigger_tx.send(Trigger::Fault(detail));
    }

    fn storage_fault(&self, err: StorageError) -> SyncResult<()> {
        tracing::error!(error = %err, "local store failed on mutation path");
        self.report_fault(ErrorKind::Storage, err.to_string());
        Err(err.into())
    }
}

/// The background worker that owns all status and queue transitions.
struct SyncWorker {
    config: SyncConfig,
    store: Arc<dyn LocalStore>,
    remote: Arc<dyn RemoteStore>,
    trigger_rx: mpsc::UnboundedReceiver<Trigger>,
    shutdown_rx: watch::Receiver<bool>,
    status_tx: watch::Sender<SyncStatus>,
    status: SyncStatus,
    clock: WorkerClock,
    online: bool,
    error_latched: bool,
    pull_failures: u32,
    debounce_deadline: Option<Instant>,
    retry_deadline: Option<Instant>,
}

impl SyncWorker {
    async fn run(mut self) {
        // Drain any backlog left over from a previous process.
        if self.status.pending_count > 0 {
            tracing::info!(
                pending = self.status.pending_count,
                "draining restart backlog"
            );
            self.run_cycle(false).await;
        }

        loop {
            let wake = match (self.debounce_deadline, self.retry_deadline) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };
            let mut stop = self.shutdown_rx.clone();

            tokio::select! {
                () = async { let _ = stop.wait_for(|stop| *stop).await; } => break,
                trigger = self.trigger_rx.recv() => match trigger {
                    Some(trigger) => self.handle_trigger(trigger).await,
                    None => break,
                },
                () = async {
                    match wake {
                        Some(deadline) => tokio::time::sleep_until(deadline).await,
                        None => std::future::pending().await,
                    }
                } => {
                    self.debounce_deadline = None;
                    self.retry_deadline = None;
                    self.run_cycle(false).await;
                }
            }
        }

        tracing::debug!(entity_id = %self.config.entity_id, "sync worker stopped");
    }

    async fn handle_trigger(&mut self, trigger: Trigger) {
        match trigger {
            Trigger::Mutation => {
                self.error_latched = false;
                self.refresh_pending();
                if self.online {
                    self.debounce_deadline = Some(Instant::now() + self.config.debounce);
                    self.publish();
                } else {
                    self.set_state(SyncState::Offline);
                }
            }
            Trigger::Manual => {
                self.error_latched = false;
                self.debounce_deadline = None;
                self.retry_deadline = None;
                self.run_cycle(true).await;
            }
            Trigger::RemoteChange { version } => {
                if self.error_latched {
                    return;
                }
                let v_local = self
                    .store
                    .load_snapshot()
                    .ok()
                    .flatten()
                    .map_or(0, |s| s.version);
                if version > v_local {
                    self.run_cycle(false).await;
                }
            }
            Trigger::Online(online) => {
                let was_online = self.online;
                self.online = online;
                if !online {
                    self.debounce_deadline = None;
                    self.retry_deadline = None;
                    self.set_state(SyncState::Offline);
                } else if !was_online {
                    tracing::info!("connectivity restored; draining queue");
                    self.run_cycle(false).await;
                }
            }
            Trigger::Fault(detail) => {
                let parks = detail.kind == ErrorKind::Storage;
                self.status.last_error = Some(detail);
                self.refresh_pending();
                if parks {
                    self.error_latched = true;
                    self.set_state(SyncState::Error);
                } else {
                    self.publish();
                }
            }
        }
    }

    /// Runs sync cycles until the queue drains, a backoff deadline is
    /// scheduled, or the worker parks on a fatal condition.
    async fn run_cycle(&mut self, manual: bool) {
        if !self.online {
            self.set_state(SyncState::Offline);
            return;
        }
        if self.error_latched {
            return;
        }

        self.refresh_pending();
        self.set_state(SyncState::Syncing);

        let mut first = true;
        loop {
            match self.sync_once(manual && first).await {
                Ok(CycleOutcome::Progress) => {
                    first = false;
                }
                Ok(CycleOutcome::Clean) => {
                    self.pull_failures = 0;
                    self.status.last_error = None;
                    self.status.reauth_required = false;
                    self.status.last_synced_at_ms = Some(unix_millis_now());
                    self.refresh_pending();
                    self.set_state(SyncState::Idle);
                    return;
                }
                Ok(CycleOutcome::Backoff { until_ms }) => {
                    self.retry_deadline = Some(self.clock.instant_at_ms(until_ms));
                    self.refresh_pending();
                    self.set_state(SyncState::Idle);
                    return;
                }
                Err(CycleAbort::Cancelled) => {
                    tracing::debug!("sync cycle cancelled");
                    return;
                }
                Err(CycleAbort::Auth(detail)) => {
                    self.error_latched = true;
                    self.status.reauth_required = true;
                    self.status.last_error = Some(detail);
                    self.refresh_pending();
                    self.set_state(SyncState::Error);
                    return;
                }
                Err(CycleAbort::Exhausted(detail)) | Err(CycleAbort::Fatal(detail)) => {
                    self.error_latched = true;
                    self.status.last_error = Some(detail);
                    self.refresh_pending();
                    self.set_state(SyncState::Error);
                    return;
                }
            }
        }
    }

    /// One pull-compare-push iteration against the remote row.
    async fn sync_once(&mut self, ignore_backoff: bool) -> Result<CycleOutcome, CycleAbort> {
        let entity_id = self.config.entity_id.clone();

        // Step 1: pull the remote row.
        let fetched = guarded(
            self.shutdown_rx.clone(),
            self.config.request_timeout,
            self.remote.fetch(&entity_id),
        )
        .await;
        let remote_row = match fetched {
            None => return Err(CycleAbort::Cancelled),
            Some(Ok(row)) => {
                self.pull_failures = 0;
                row
            }
            Some(Err(err)) => return self.on_pull_error(&err),
        };
        let v_remote = remote_row.as_ref().map_or(0, |r| r.version);

        let local = self
            .store
            .load_snapshot()
            .map_err(|err| self.fatal_storage(&err))?;
        let v_local = local.as_ref().map_or(0, |s| s.version);

        // Step 2: compare against the queue head.
        let now_ms = self.clock.now_ms();
        let dequeue_now = if ignore_backoff { u64::MAX } else { now_ms };
        let head = self
            .store
            .dequeue_next(dequeue_now)
            .map_err(|err| self.fatal_storage(&err))?;

        let Some(op) = head else {
            let pending = self
                .store
                .list_pending()
                .map_err(|err| self.fatal_storage(&err))?;

            if pending.is_empty() {
                if let Some(row) = remote_row {
                    if row.version > v_local {
                        // Another device pushed; adopt the remote snapshot
                        // verbatim.
                        tracing::info!(
                            from = v_local,
                            to = row.version,
                            "adopting newer remote snapshot"
                        );
                        let snapshot = Snapshot::from_remote(&entity_id, row);
                        self.store
                            .save_snapshot(&snapshot)
                            .map_err(|err| self.fatal_storage(&err))?;
                    }
                }
                return Ok(CycleOutcome::Clean);
            }

            // Backlog exists but every entry is still backing off.
            let until_ms = pending
                .iter()
                .filter(|entry| entry.status.is_queued())
                .map(|entry| entry.not_before_ms)
                .min()
                .unwrap_or_else(|| {
                    now_ms + self.config.retry.initial_delay.as_millis() as u64
                });
            return Ok(CycleOutcome::Backoff {
                until_ms: until_ms.max(now_ms),
            });
        };

        match remote_row {
            // Step 3: the remote moved past our base; resolve the conflict.
            Some(row) if row.version > op.base_version => self.resolve_conflict(op, row).await,
            // No divergence (or the remote regressed below our base, e.g.
            // restored from an older backup; rebase and overwrite).
            _ => {
                if v_remote != op.base_version {
                    tracing::warn!(
                        v_remote,
                        base_version = op.base_version,
                        "remote version behind queued base; rebasing"
                    );
                }
                let request =
                    PushRequest::from_operation(&op, &self.config.device_id).rebased_on(v_remote);
                self.push_and_commit(op, request).await
            }
        }
    }

    /// Pushes a request and commits the outcome.
    async fn push_and_commit(
        &mut self,
        op: QueueOperation,
        request: PushRequest,
    ) -> Result<CycleOutcome, CycleAbort> {
        let entity_id = self.config.entity_id.clone();
        let pushed = guarded(
            self.shutdown_rx.clone(),
            self.config.request_timeout,
            self.remote.push(&entity_id, request),
        )
        .await;

        let outcome = match pushed {
            None => {
                let _ = self.store.release(op.id);
                return Err(CycleAbort::Cancelled);
            }
            Some(Ok(outcome)) => outcome,
            Some(Err(err)) => return self.on_push_error(&op, &err),
        };

        match outcome {
            PushOutcome::Accepted { version } => {
                self.commit_accepted(&op, version)?;
                Ok(CycleOutcome::Progress)
            }
            PushOutcome::Conflict { current } => self.resolve_conflict(op, current).await,
        }
    }

    /// Step 3 of the cycle: deterministic last-writer-wins resolution.
    async fn resolve_conflict(
        &mut self,
        op: QueueOperation,
        current: FetchResponse,
    ) -> Result<CycleOutcome, CycleAbort> {
        self.set_state(SyncState::Conflict);

        let record = ConflictRecord::resolve(
            &self.config.entity_id,
            op.base_version,
            current.version,
            op.updated_at_ms,
            current.updated_at_ms,
            unix_millis_now(),
        );
        tracing::info!(
            winner = ?record.winner,
            base_version = op.base_version,
            remote_version = current.version,
            "resolving divergence"
        );
        let capacity = self.config.conflict_log_capacity;
        self.status.record_conflict(record.clone(), capacity);

        match record.winner {
            ConflictWinner::Remote => {
                let snapshot = Snapshot::from_remote(&self.config.entity_id, current);
                self.store
                    .save_snapshot(&snapshot)
                    .map_err(|err| self.fatal_storage(&err))?;
                self.store
                    .ack(op.id)
                    .map_err(|err| self.fatal_storage(&err))?;
                self.refresh_pending();
                self.set_state(SyncState::Syncing);
                Ok(CycleOutcome::Progress)
            }
            ConflictWinner::Local => {
                self.set_state(SyncState::Syncing);
                let request = PushRequest::from_operation(&op, &self.config.device_id)
                    .rebased_on(current.version);

                let entity_id = self.config.entity_id.clone();
                let pushed = guarded(
                    self.shutdown_rx.clone(),
                    self.config.request_timeout,
                    self.remote.push(&entity_id, request),
                )
                .await;

                match pushed {
                    None => {
                        let _ = self.store.release(op.id);
                        Err(CycleAbort::Cancelled)
                    }
                    Some(Ok(PushOutcome::Accepted { version })) => {
                        self.commit_accepted(&op, version)?;
                        Ok(CycleOutcome::Progress)
                    }
                    Some(Ok(PushOutcome::Conflict { current })) => {
                        // The row moved again mid-resolution; back off and
                        // let the next cycle resolve against the fresh row.
                        tracing::warn!(
                            version = current.version,
                            "row moved during conflict resolution"
                        );
                        self.on_push_error(
                            &op,
                            &SyncError::Network("concurrent writer during resolution".into()),
                        )
                    }
                    Some(Err(err)) => self.on_push_error(&op, &err),
                }
            }
        }
    }

    /// Applies an accepted push: bump the local version, drop the queue
    /// entry.
    ///
    /// The stored payload is left as-is; a mutation captured while the push
    /// was in flight must not be clobbered by the older pushed payload.
    fn commit_accepted(&mut self, op: &QueueOperation, version: u64) -> Result<(), CycleAbort> {
        let snapshot = match self
            .store
            .load_snapshot()
            .map_err(|err| self.fatal_storage(&err))?
        {
            Some(mut snapshot) => {
                snapshot.version = version;
                snapshot
            }
            None => Snapshot {
                entity_id: self.config.entity_id.clone(),
                version,
                payload: op.payload.clone(),
                updated_at_ms: op.updated_at_ms,
                device_id: self.config.device_id.clone(),
            },
        };

        self.store
            .save_snapshot(&snapshot)
            .map_err(|err| self.fatal_storage(&err))?;
        self.store
            .ack(op.id)
            .map_err(|err| self.fatal_storage(&err))?;
        self.refresh_pending();
        tracing::debug!(version, "push accepted");
        Ok(())
    }

    fn on_pull_error(&mut self, err: &SyncError) -> Result<CycleOutcome, CycleAbort> {
        if err.is_auth() {
            return Err(CycleAbort::Auth(self.detail_of(err)));
        }

        if err.is_retryable() {
            self.pull_failures += 1;
            let detail = self.detail_of(err);
            self.status.last_error = Some(detail.clone());

            if self.pull_failures >= self.config.retry.max_attempts {
                tracing::error!(attempts = self.pull_failures, "pull retries exhausted");
                return Err(CycleAbort::Exhausted(detail));
            }

            let delay = self.config.retry.delay_for_attempt(self.pull_failures);
            tracing::warn!(error = %err, attempt = self.pull_failures, ?delay, "pull failed; backing off");
            return Ok(CycleOutcome::Backoff {
                until_ms: self.clock.now_ms() + delay.as_millis() as u64,
            });
        }

        Err(CycleAbort::Fatal(self.detail_of(err)))
    }

    fn on_push_error(
        &mut self,
        op: &QueueOperation,
        err: &SyncError,
    ) -> Result<CycleOutcome, CycleAbort> {
        if err.is_auth() {
            // Never retried with backoff; the entry stays queued for after
            // reauthentication.
            let _ = self.store.release(op.id);
            self.refresh_pending();
            return Err(CycleAbort::Auth(self.detail_of(err)));
        }

        if err.is_retryable() {
            let next_attempt = op.attempt_count + 1;
            let delay = self.config.retry.delay_for_attempt(next_attempt);
            let until_ms = self.clock.now_ms() + delay.as_millis() as u64;
            let detail = self.detail_of(err);
            self.status.last_error = Some(detail.clone());

            let disposition = self
                .store
                .requeue(op.id, until_ms)
                .map_err(|storage_err| self.fatal_storage(&storage_err))?;

            return match disposition {
                RequeueDisposition::Superseded => {
                    tracing::debug!("failed push superseded by newer mutation");
                    Ok(CycleOutcome::Progress)
                }
                RequeueDisposition::Requeued { attempt_count } => {
                    if attempt_count >= self.config.retry.max_attempts {
                        tracing::error!(attempts = attempt_count, "push retries exhausted");
                        Err(CycleAbort::Exhausted(detail))
                    } else {
                        tracing::warn!(error = %err, attempt = attempt_count, ?delay, "push failed; backing off");
                        Ok(CycleOutcome::Backoff { until_ms })
                    }
                }
            };
        }

        let _ = self.store.release(op.id);
        self.refresh_pending();
        Err(CycleAbort::Fatal(self.detail_of(err)))
    }

    fn detail_of(&self, err: &SyncError) -> ErrorDetail {
        let kind = match err {
            SyncError::Capture(_) => ErrorKind::Capture,
            SyncError::Storage(_) => ErrorKind::Storage,
            SyncError::Network(_) => ErrorKind::Network,
            SyncError::Timeout => ErrorKind::Timeout,
            SyncError::Auth(_) => ErrorKind::Auth,
            SyncError::Protocol(_) | SyncError::Cancelled => ErrorKind::Protocol,
        };
        ErrorDetail::new(
            kind,
            err.to_string(),
            &self.config.entity_id,
            unix_millis_now(),
        )
    }

    fn fatal_storage(&self, err: &StorageError) -> CycleAbort {
        tracing::error!(error = %err, "local store failed during sync");
        CycleAbort::Fatal(ErrorDetail::new(
            ErrorKind::Storage,
            err.to_string(),
            &self.config.entity_id,
            unix_millis_now(),
        ))
    }

    fn refresh_pending(&mut self) {
        if let Ok(pending) = self.store.list_pending() {
            self.status.pending_count = pending.len();
        }
    }

    fn set_state(&mut self, state: SyncState) {
        self.status.state = state;
        self.publish();
    }

    fn publish(&mut self) {
        let _ = self.status_tx.send(self.status.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{CaptureError, FnCapture};
    use crate::transport::{MockChangeFeed, MockRemote};
    use snapsync_protocol::ChangeNotification;
    use snapsync_store::MemoryStore;

    struct Fixture {
        store: Arc<MemoryStore>,
        remote: Arc<MockRemote>,
        payload: Arc<Mutex<Vec<u8>>>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                store: Arc::new(MemoryStore::new()),
                remote: Arc::new(MockRemote::new()),
                payload: Arc::new(Mutex::new(vec![1])),
            }
        }

        fn config(&self) -> SyncConfig {
            SyncConfig::new("user-1", "device-a").with_debounce(Duration::from_millis(50))
        }

        fn spawn(&self) -> SyncHandle {
            self.spawn_with(self.config())
        }

        fn spawn_with(&self, config: SyncConfig) -> SyncHandle {
            let payload = Arc::clone(&self.payload);
            SyncManager::new(
                config,
                Arc::clone(&self.store) as Arc<dyn LocalStore>,
                Arc::new(FnCapture::new(move || Ok(payload.lock().clone()))),
                Arc::clone(&self.remote) as Arc<dyn RemoteStore>,
            )
            .spawn()
        }
    }

    async fn wait_status(
        rx: &mut watch::Receiver<SyncStatus>,
        pred: impl FnMut(&SyncStatus) -> bool,
    ) -> SyncStatus {
        tokio::time::timeout(Duration::from_secs(120), rx.wait_for(pred))
            .await
            .expect("status condition not reached")
            .expect("worker stopped")
            .clone()
    }

    #[tokio::test(start_paused = true)]
    async fn simple_push_drains_queue() {
        let fixture = Fixture::new();
        let handle = fixture.spawn();
        let mut status_rx = handle.watch_status();

        handle.notify_mutation().unwrap();

        let status = wait_status(&mut status_rx, |s| {
            s.pending_count == 0 && s.last_synced_at_ms.is_some()
        })
        .await;
        assert_eq!(status.state, SyncState::Idle);

        let row = fixture.remote.row().unwrap();
        assert_eq!(row.version, 1);
        assert_eq!(row.payload, vec![1]);
        assert_eq!(fixture.store.load_snapshot().unwrap().unwrap().version, 1);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn clean_cycle_is_a_no_op() {
        let fixture = Fixture::new();
        let snapshot = Snapshot::new("user-1", "device-a", vec![1], 100).with_version(3);
        fixture.store.save_snapshot(&snapshot).unwrap();
        fixture.remote.set_row(FetchResponse {
            version: 3,
            payload: vec![1],
            updated_at_ms: 100,
            device_id: "device-a".into(),
        });

        let handle = fixture.spawn();
        let mut status_rx = handle.watch_status();

        handle.force_sync();

        let status = wait_status(&mut status_rx, |s| s.last_synced_at_ms.is_some()).await;
        assert_eq!(status.state, SyncState::Idle);
        assert!(fixture.remote.recorded_pushes().is_empty());
        assert_eq!(fixture.store.load_snapshot().unwrap().unwrap().version, 3);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn remote_ahead_is_adopted_verbatim() {
        let fixture = Fixture::new();
        let snapshot = Snapshot::new("user-1", "device-a", vec![1], 100).with_version(3);
        fixture.store.save_snapshot(&snapshot).unwrap();
        fixture.remote.set_row(FetchResponse {
            version: 5,
            payload: vec![9, 9],
            updated_at_ms: 900,
            device_id: "device-b".into(),
        });

        let handle = fixture.spawn();
        let mut status_rx = handle.watch_status();

        handle.force_sync();
        wait_status(&mut status_rx, |s| s.last_synced_at_ms.is_some()).await;

        let local = fixture.store.load_snapshot().unwrap().unwrap();
        assert_eq!(local.version, 5);
        assert_eq!(local.payload, vec![9, 9]);
        assert_eq!(local.device_id, "device-b");
        assert!(fixture.remote.recorded_pushes().is_empty());

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn conflict_remote_wins_adopts_and_drops() {
        let fixture = Fixture::new();
        let snapshot = Snapshot::new("user-1", "device-a", vec![1], 1_000).with_version(3);
        fixture.store.save_snapshot(&snapshot).unwrap();
        fixture
            .store
            .enqueue(QueueOperation::full_snapshot_push(
                "user-1",
                vec![1],
                1_000,
                3,
                1_000,
            ))
            .unwrap();
        fixture.remote.set_row(FetchResponse {
            version: 4,
            payload: vec![7],
            updated_at_ms: 2_000,
            device_id: "device-b".into(),
        });

        let handle = fixture.spawn();
        let mut status_rx = handle.watch_status();

        let status = wait_status(&mut status_rx, |s| {
            s.pending_count == 0 && s.last_synced_at_ms.is_some()
        })
        .await;

        let local = fixture.store.load_snapshot().unwrap().unwrap();
        assert_eq!(local.version, 4);
        assert_eq!(local.payload, vec![7]);
        assert!(fixture.remote.recorded_pushes().is_empty());

        assert_eq!(status.recent_conflicts.len(), 1);
        assert_eq!(status.recent_conflicts[0].winner, ConflictWinner::Remote);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn conflict_local_wins_rebases_and_pushes() {
        let fixture = Fixture::new();
        let snapshot = Snapshot::new("user-1", "device-a", vec![1], 2_000).with_version(3);
        fixture.store.save_snapshot(&snapshot).unwrap();
        fixture
            .store
            .enqueue(QueueOperation::full_snapshot_push(
                "user-1",
                vec![1],
                2_000,
                3,
                2_000,
            ))
            .unwrap();
        fixture.remote.set_row(FetchResponse {
            version: 4,
            payload: vec![7],
            updated_at_ms: 1_000,
            device_id: "device-b".into(),
        });

        let handle = fixture.spawn();
        let mut status_rx = handle.watch_status();

        let status = wait_status(&mut status_rx, |s| {
            s.pending_count == 0 && s.last_synced_at_ms.is_some()
        })
        .await;

        let row = fixture.remote.row().unwrap();
        assert_eq!(row.version, 5);
        assert_eq!(row.payload, vec![1]);
        assert_eq!(fixture.store.load_snapshot().unwrap().unwrap().version, 5);

        assert_eq!(status.recent_conflicts.len(), 1);
        assert_eq!(status.recent_conflicts[0].winner, ConflictWinner::Local);

        let pushes = fixture.remote.recorded_pushes();
        assert_eq!(pushes.len(), 1);
        assert_eq!(pushes[0].base_version, 4);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_retry_then_succeed() {
        let fixture = Fixture::new();
        fixture.remote.fail_next_pushes(2);

        let handle = fixture.spawn();
        let mut status_rx = handle.watch_status();

        handle.notify_mutation().unwrap();

        wait_status(&mut status_rx, |s| {
            s.pending_count == 0 && s.last_synced_at_ms.is_some()
        })
        .await;

        assert_eq!(fixture.remote.recorded_pushes().len(), 3);
        assert_eq!(fixture.remote.row().unwrap().version, 1);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_park_in_error() {
        let fixture = Fixture::new();
        fixture.remote.fail_next_pushes(5);

        let handle = fixture.spawn();
        let mut status_rx = handle.watch_status();

        handle.notify_mutation().unwrap();

        let status = wait_status(&mut status_rx, |s| s.state == SyncState::Error).await;
        assert_eq!(status.pending_count, 1);
        assert_eq!(
            status.last_error.as_ref().map(|e| e.kind),
            Some(ErrorKind::Network)
        );
        assert_eq!(fixture.remote.recorded_pushes().len(), 5);
        assert!(fixture.remote.row().is_none());

        // A manual retry clears the parked state and drains the entry.
        handle.force_sync();
        let status = wait_status(&mut status_rx, |s| {
            s.pending_count == 0 && s.last_synced_at_ms.is_some()
        })
        .await;
        assert_eq!(status.state, SyncState::Idle);
        assert_eq!(fixture.remote.row().unwrap().version, 1);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn rapid_mutations_collapse_to_one_push() {
        let fixture = Fixture::new();
        let handle = fixture.spawn();
        let mut status_rx = handle.watch_status();

        handle.notify_mutation().unwrap();
        *fixture.payload.lock() = vec![2];
        handle.notify_mutation().unwrap();

        wait_status(&mut status_rx, |s| {
            s.pending_count == 0 && s.last_synced_at_ms.is_some()
        })
        .await;

        let pushes = fixture.remote.recorded_pushes();
        assert_eq!(pushes.len(), 1);
        assert_eq!(pushes[0].payload, vec![2]);
        assert_eq!(fixture.remote.row().unwrap().version, 1);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn offline_queues_and_online_drains() {
        let fixture = Fixture::new();
        let handle = fixture.spawn();
        let mut status_rx = handle.watch_status();

        handle.set_online(false);
        handle.notify_mutation().unwrap();

        let status = wait_status(&mut status_rx, |s| {
            s.state == SyncState::Offline && s.pending_count == 1
        })
        .await;
        assert!(status.last_synced_at_ms.is_none());
        assert!(fixture.remote.recorded_pushes().is_empty());

        handle.set_online(true);
        wait_status(&mut status_rx, |s| {
            s.pending_count == 0 && s.last_synced_at_ms.is_some()
        })
        .await;
        assert_eq!(fixture.remote.row().unwrap().version, 1);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn capture_failure_drops_mutation() {
        let fixture = Fixture::new();
        let config = fixture.config();
        let handle = SyncManager::new(
            config,
            Arc::clone(&fixture.store) as Arc<dyn LocalStore>,
            Arc::new(FnCapture::new(|| Err(CaptureError::new("cyclic value")))),
            Arc::clone(&fixture.remote) as Arc<dyn RemoteStore>,
        )
        .spawn();
        let mut status_rx = handle.watch_status();

        let err = handle.notify_mutation().unwrap_err();
        assert!(matches!(err, SyncError::Capture(_)));

        let status = wait_status(&mut status_rx, |s| s.last_error.is_some()).await;
        assert_eq!(status.last_error.unwrap().kind, ErrorKind::Capture);
        assert_eq!(status.pending_count, 0);
        // The engine keeps running; a dropped mutation does not park it.
        assert_ne!(status.state, SyncState::Error);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn auth_rejection_parks_until_manual_retry() {
        let fixture = Fixture::new();
        fixture.remote.deny_auth(true);

        let handle = fixture.spawn();
        let mut status_rx = handle.watch_status();

        handle.notify_mutation().unwrap();

        let status = wait_status(&mut status_rx, |s| s.state == SyncState::Error).await;
        assert!(status.reauth_required);
        assert_eq!(status.pending_count, 1);

        // Reauthenticate and retry manually.
        fixture.remote.deny_auth(false);
        handle.force_sync();

        let status = wait_status(&mut status_rx, |s| {
            s.pending_count == 0 && s.last_synced_at_ms.is_some()
        })
        .await;
        assert!(!status.reauth_required);
        assert_eq!(fixture.remote.row().unwrap().version, 1);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn change_notification_triggers_adoption() {
        let fixture = Fixture::new();
        let feed = Arc::new(MockChangeFeed::new());

        let payload = Arc::clone(&fixture.payload);
        let handle = SyncManager::new(
            fixture.config(),
            Arc::clone(&fixture.store) as Arc<dyn LocalStore>,
            Arc::new(FnCapture::new(move || Ok(payload.lock().clone()))),
            Arc::clone(&fixture.remote) as Arc<dyn RemoteStore>,
        )
        .with_change_feed(Arc::clone(&feed) as Arc<dyn ChangeFeed>)
        .spawn();
        let mut status_rx = handle.watch_status();

        tokio::time::timeout(Duration::from_secs(5), async {
            while feed.subscriber_count() == 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        fixture.remote.set_row(FetchResponse {
            version: 2,
            payload: vec![5],
            updated_at_ms: 500,
            device_id: "device-b".into(),
        });
        feed.notify(ChangeNotification { version: 2 });

        wait_status(&mut status_rx, |s| s.last_synced_at_ms.is_some()).await;
        let local = fixture.store.load_snapshot().unwrap().unwrap();
        assert_eq!(local.version, 2);
        assert_eq!(local.payload, vec![5]);

        // A duplicate notification for a version we already hold is a
        // no-op.
        feed.notify(ChangeNotification { version: 2 });
        tokio::task::yield_now().await;
        assert!(fixture.remote.recorded_pushes().is_empty());

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn restart_backlog_drains_without_trigger() {
        let fixture = Fixture::new();
        fixture
            .store
            .enqueue(QueueOperation::full_snapshot_push(
                "user-1",
                vec![3],
                300,
                0,
                300,
            ))
            .unwrap();

        let handle = fixture.spawn();
        let mut status_rx = handle.watch_status();

        wait_status(&mut status_rx, |s| {
            s.pending_count == 0 && s.last_synced_at_ms.is_some()
        })
        .await;
        assert_eq!(fixture.remote.row().unwrap().payload, vec![3]);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_the_worker() {
        let fixture = Fixture::new();
        let handle = fixture.spawn();

        handle.notify_mutation().unwrap();
        handle.shutdown().await;

        // No queued write is lost by shutting down.
        let pending = fixture.store.list_pending().unwrap();
        assert!(pending.len() <= 1);
    }
}
