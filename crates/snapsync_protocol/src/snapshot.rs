//! Versioned application-state snapshots.

use crate::messages::FetchResponse;
use serde::{Deserialize, Serialize};

/// The full serialized application state for one entity, versioned.
///
/// For a given `entity_id` the remote store holds exactly one row, and
/// `version` strictly increases with each accepted write. A client may hold
/// a version less than, equal to, or greater than the last-known remote
/// version at any time; that gap is what conflict detection observes.
///
/// `payload` is an opaque blob owned by the caller. The engine never
/// inspects it beyond byte equality.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Identifier of the synchronized entity (one per owning user).
    pub entity_id: String,
    /// Monotonically increasing version; 0 means "never synced".
    pub version: u64,
    /// Opaque serialized application state.
    pub payload: Vec<u8>,
    /// Wall-clock timestamp of the last mutation, in Unix millis.
    ///
    /// Used only as a conflict tie-breaker, never as the primary ordering
    /// key.
    pub updated_at_ms: u64,
    /// Identifier of the device/process that produced this version.
    pub device_id: String,
}

impl Snapshot {
    /// Creates an unsynced snapshot (version 0).
    pub fn new(
        entity_id: impl Into<String>,
        device_id: impl Into<String>,
        payload: Vec<u8>,
        updated_at_ms: u64,
    ) -> Self {
        Self {
            entity_id: entity_id.into(),
            version: 0,
            payload,
            updated_at_ms,
            device_id: device_id.into(),
        }
    }

    /// Sets the version.
    #[must_use]
    pub fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    /// Builds a local snapshot from remote state, adopting it verbatim.
    pub fn from_remote(entity_id: impl Into<String>, remote: FetchResponse) -> Self {
        Self {
            entity_id: entity_id.into(),
            version: remote.version,
            payload: remote.payload,
            updated_at_ms: remote.updated_at_ms,
            device_id: remote.device_id,
        }
    }

    /// Returns true if this snapshot has never been accepted by the remote.
    pub fn is_unsynced(&self) -> bool {
        self.version == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_snapshot_is_unsynced() {
        let snapshot = Snapshot::new("user-1", "device-a", vec![1, 2, 3], 1_000);
        assert!(snapshot.is_unsynced());
        assert_eq!(snapshot.version, 0);
        assert_eq!(snapshot.payload, vec![1, 2, 3]);
    }

    #[test]
    fn with_version() {
        let snapshot = Snapshot::new("user-1", "device-a", vec![], 0).with_version(7);
        assert_eq!(snapshot.version, 7);
        assert!(!snapshot.is_unsynced());
    }

    #[test]
    fn from_remote_adopts_all_fields() {
        let remote = FetchResponse {
            version: 4,
            payload: vec![9, 9],
            updated_at_ms: 5_000,
            device_id: "device-b".into(),
        };

        let snapshot = Snapshot::from_remote("user-1", remote);
        assert_eq!(snapshot.entity_id, "user-1");
        assert_eq!(snapshot.version, 4);
        assert_eq!(snapshot.payload, vec![9, 9]);
        assert_eq!(snapshot.updated_at_ms, 5_000);
        assert_eq!(snapshot.device_id, "device-b");
    }

    #[test]
    fn serde_roundtrip() {
        let snapshot = Snapshot::new("user-1", "device-a", vec![0xFF, 0x00], 42).with_version(3);
        let json = serde_json::to_string(&snapshot).unwrap();
        let back: Snapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snapshot);
    }
}
