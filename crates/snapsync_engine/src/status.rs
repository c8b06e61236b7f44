//! Sync status reporting.

use snapsync_protocol::ConflictRecord;

/// The state of the sync worker's cycle machine.
///
/// `Idle → Syncing → {Idle, Conflict, Error}`. `Conflict` resolves
/// automatically and returns to `Syncing`; `Error` clears on a manual
/// trigger or a fresh mutation. There is no terminal state; the worker runs
/// for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Nothing to do; waiting for a trigger.
    Idle,
    /// A sync cycle is running.
    Syncing,
    /// The host reported no connectivity; mutations queue locally.
    Offline,
    /// A divergence was detected and is being resolved.
    Conflict,
    /// A fatal error or exhausted retries; awaiting manual retry,
    /// reauthentication, or a fresh mutation.
    Error,
}

impl SyncState {
    /// Returns true if a sync cycle is currently in progress.
    pub fn is_active(&self) -> bool {
        matches!(self, SyncState::Syncing | SyncState::Conflict)
    }
}

/// What kind of failure produced an [`ErrorDetail`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Application state could not be serialized.
    Capture,
    /// Local persistence failed.
    Storage,
    /// Transient network or server failure.
    Network,
    /// A network call timed out.
    Timeout,
    /// The credential was rejected; reauthentication required.
    Auth,
    /// The remote sent something outside the sync contract.
    Protocol,
}

/// A surfaced failure, with enough detail for the UI collaborator to
/// prompt the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorDetail {
    /// Failure classification.
    pub kind: ErrorKind,
    /// Human-readable description.
    pub message: String,
    /// The entity the failure affected.
    pub entity_id: String,
    /// When the failure was recorded, in Unix millis.
    pub at_ms: u64,
}

impl ErrorDetail {
    /// Creates an error detail stamped with the given time.
    pub fn new(
        kind: ErrorKind,
        message: impl Into<String>,
        entity_id: impl Into<String>,
        at_ms: u64,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            entity_id: entity_id.into(),
            at_ms,
        }
    }
}

/// A read-only view of the sync worker, published on every transition.
///
/// Derived, not persisted. Only the sync worker mutates it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStatus {
    /// Current cycle state.
    pub state: SyncState,
    /// When the last successful cycle finished, in Unix millis.
    pub last_synced_at_ms: Option<u64>,
    /// Number of queued operations (pending or in flight).
    pub pending_count: usize,
    /// The most recent surfaced failure, if any.
    pub last_error: Option<ErrorDetail>,
    /// True when the remote rejected the credential; sync stays parked
    /// until the host reauthenticates and triggers a manual sync.
    pub reauth_required: bool,
    /// Audit log of resolved conflicts, oldest first, bounded.
    pub recent_conflicts: Vec<ConflictRecord>,
}

impl SyncStatus {
    /// Creates an idle status with the given backlog.
    pub fn idle(pending_count: usize) -> Self {
        Self {
            state: SyncState::Idle,
            last_synced_at_ms: None,
            pending_count,
            last_error: None,
            reauth_required: false,
            recent_conflicts: Vec::new(),
        }
    }

    /// Appends a conflict record, evicting the oldest past `capacity`.
    pub fn record_conflict(&mut self, record: ConflictRecord, capacity: usize) {
        self.recent_conflicts.push(record);
        if self.recent_conflicts.len() > capacity {
            let excess = self.recent_conflicts.len() - capacity;
            self.recent_conflicts.drain(..excess);
        }
    }
}
