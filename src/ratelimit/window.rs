//! Fixed-window arithmetic.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::clock::millis_to_datetime;

/// A fixed time window of a given length.
///
/// Time is cut into non-overlapping buckets of `length` starting at the
/// Unix epoch; bucket `n` covers `[n * length, (n + 1) * length)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FixedWindow {
    length_ms: i64,
}

impl FixedWindow {
    /// Create a window of the given length.
    ///
    /// Returns `None` for a zero-length window or one too long to represent
    /// in epoch milliseconds.
    pub fn new(length: Duration) -> Option<Self> {
        let length_ms = i64::try_from(length.as_millis()).ok()?;
        Self::from_millis(length_ms)
    }

    /// Create a window from a length in milliseconds.
    pub fn from_millis(length_ms: i64) -> Option<Self> {
        (length_ms > 0).then_some(Self { length_ms })
    }

    /// Length of the window in milliseconds.
    pub fn length_ms(&self) -> i64 {
        self.length_ms
    }

    /// The bucket that contains `now`.
    pub fn bucket(&self, now: DateTime<Utc>) -> i64 {
        now.timestamp_millis().div_euclid(self.length_ms)
    }

    /// When the given bucket starts.
    pub fn start_of(&self, bucket: i64) -> DateTime<Utc> {
        millis_to_datetime(bucket.saturating_mul(self.length_ms))
    }

    /// When the given bucket ends, which is also when the next one starts.
    pub fn end_of(&self, bucket: i64) -> DateTime<Utc> {
        millis_to_datetime(bucket.saturating_add(1).saturating_mul(self.length_ms))
    }
}
