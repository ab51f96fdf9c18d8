//! Core types

use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds since the Unix epoch. All token and key timestamps use this unit.
pub type UnixSeconds = u64;

/// Current wall-clock time in whole seconds.
pub fn unix_now_secs() -> UnixSeconds {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
