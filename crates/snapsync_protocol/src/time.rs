//! Wall-clock helpers.

use std::time::{SystemTime, UNIX_EPOCH};

/// Returns the current wall-clock time as milliseconds since the Unix epoch.
///
/// Timestamps produced here are used only as conflict tie-breakers, never as
/// a primary ordering key, so a clock that jumps backwards degrades conflict
/// resolution quality but cannot corrupt version ordering.
pub fn unix_millis_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
