//! Timestamp helpers shared by the stores and the retry policy.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

/// `at + delay`, saturating at the maximum representable instant.
pub fn offset(at: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(delay)
        .ok()
        .and_then(|delta| at.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Milliseconds since the Unix epoch (the persisted representation).
pub fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub fn from_millis(millis: i64) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(millis)
}

/// Drop sub-millisecond precision so in-memory values match persisted ones.
pub fn truncate_millis(at: DateTime<Utc>) -> DateTime<Utc> {
    from_millis(to_millis(at)).unwrap_or(at)
}
