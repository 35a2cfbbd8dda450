//! Timestamp helpers for the epoch-milliseconds storage convention.

use chrono::{DateTime, Utc};

/// Current time as Unix epoch milliseconds (UTC).
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Convert epoch milliseconds to a `DateTime<Utc>`.
///
/// Out-of-range values fall back to the Unix epoch rather than panicking.
pub fn from_ms(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or_default()
}

/// Convert a `DateTime<Utc>` to epoch milliseconds.
pub fn to_ms(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}
