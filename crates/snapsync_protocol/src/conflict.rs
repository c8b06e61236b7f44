//! Conflict detection records and last-writer-wins resolution.

use serde::{Deserialize, Serialize};

/// Which side a conflict resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictWinner {
    /// The locally queued payload won and will be re-pushed.
    Local,
    /// The remote payload won and is adopted; the queued local operation is
    /// dropped.
    Remote,
}

/// Resolves a pairwise local-vs-remote conflict by last-writer-wins at
/// snapshot granularity.
///
/// The payload with the strictly later `updated_at` timestamp wins
/// wholesale. An exact tie resolves to [`ConflictWinner::Remote`]: the
/// server is authoritative, and the choice must be deterministic so that
/// re-running the same cycle always yields the same outcome.
pub fn resolve_last_writer_wins(
    local_updated_at_ms: u64,
    remote_updated_at_ms: u64,
) -> ConflictWinner {
    if local_updated_at_ms > remote_updated_at_ms {
        ConflictWinner::Local
    } else {
        ConflictWinner::Remote
    }
}

/// An audit record of a resolved conflict.
///
/// The losing payload is discarded, but its existence and both timestamps
/// are kept for observability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictRecord {
    /// The entity the conflict occurred on.
    pub entity_id: String,
    /// The remote version the local operation was based on.
    pub base_version: u64,
    /// The remote version observed at resolution time.
    pub remote_version: u64,
    /// Timestamp of the local queued payload.
    pub local_updated_at_ms: u64,
    /// Timestamp of the remote payload.
    pub remote_updated_at_ms: u64,
    /// Which side won.
    pub winner: ConflictWinner,
    /// When the conflict was resolved.
    pub resolved_at_ms: u64,
}

impl ConflictRecord {
    /// Creates an audit record, deriving the winner from the timestamps.
    pub fn resolve(
        entity_id: impl Into<String>,
        base_version: u64,
        remote_version: u64,
        local_updated_at_ms: u64,
        remote_updated_at_ms: u64,
        resolved_at_ms: u64,
    ) -> Self {
        Self {
            entity_id: entity_id.into(),
            base_version,
            remote_version,
            local_updated_at_ms,
            remote_updated_at_ms,
            winner: resolve_last_writer_wins(local_updated_at_ms, remote_updated_at_ms),
            resolved_at_ms,
        }
    }
}
