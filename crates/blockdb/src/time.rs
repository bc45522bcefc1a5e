//! Record timestamps.
//!
//! Records store whole seconds since [`EPOCH_UNIX_SECS`] (2010-01-01T00:00:00Z)
//! as an `i32`, which covers roughly 68 years past the epoch.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Unix timestamp of the record epoch, 2010-01-01T00:00:00Z.
pub const EPOCH_UNIX_SECS: u64 = 1_262_304_000;

/// The record epoch as a `SystemTime`.
#[must_use]
pub fn epoch() -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(EPOCH_UNIX_SECS)
}

/// Seconds between the epoch and `time`, saturating at the `i32` range.
#[must_use]
pub fn delta_from(time: SystemTime) -> i32 {
    match time.duration_since(epoch()) {
        Ok(after) => i32::try_from(after.as_secs()).unwrap_or(i32::MAX),
        Err(before) => i32::try_from(before.duration().as_secs()).map_or(i32::MIN, |secs| -secs),
    }
}

/// Seconds between the epoch and now.
#[must_use]
pub fn now_delta() -> i32 {
    delta_from(SystemTime::now())
}

/// Convert an epoch-relative delta back into a `SystemTime`.
#[must_use]
pub fn to_system_time(delta: i32) -> SystemTime {
    let secs = Duration::from_secs(u64::from(delta.unsigned_abs()));
    if delta >= 0 {
        epoch() + secs
    } else {
        epoch() - secs
    }
}
