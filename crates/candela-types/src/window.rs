//! Time windows candles are bucketed into.

use chrono::{DateTime, TimeDelta, Utc};

use crate::{CandelaError, Result};

/// A half-open time interval `[start, end)`.
///
/// Window boundaries are exact multiples of the window length since the
/// Unix epoch, so windows of nested granularities always line up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Window {
    /// Start of the window (inclusive).
    pub start: DateTime<Utc>,
    /// End of the window (exclusive).
    pub end: DateTime<Utc>,
}

impl Window {
    /// Returns the window of the given length that contains `timestamp`.
    ///
    /// The start is the largest multiple of `length` since the Unix epoch
    /// that is not after `timestamp`.
    ///
    /// # Errors
    ///
    /// Returns an error if `length` is not a positive number of milliseconds.
    pub fn containing(length: TimeDelta, timestamp: DateTime<Utc>) -> Result<Self> {
        let length_ms = length.num_milliseconds();
        if length_ms <= 0 {
            return Err(CandelaError::InvalidUnit(length_ms));
        }

        let start_ms = timestamp.timestamp_millis().div_euclid(length_ms) * length_ms;
        let out_of_range = || CandelaError::Config(format!("window out of range: {timestamp}"));
        let start = DateTime::from_timestamp_millis(start_ms).ok_or_else(out_of_range)?;
        let end = start.checked_add_signed(length).ok_or_else(out_of_range)?;

        Ok(Self { start, end })
    }

    /// Returns the window length.
    #[must_use]
    pub fn length(&self) -> TimeDelta {
        self.end - self.start
    }

    /// Returns true if `timestamp` falls inside the window.
    #[must_use]
    pub fn contains(&self, timestamp: DateTime<Utc>) -> bool {
        timestamp >= self.start && timestamp < self.end
    }

    /// Returns the window immediately following this one, or `None` if it
    /// would end past the representable time range.
    #[must_use]
    pub fn next(&self) -> Option<Self> {
        let end = self.end.checked_add_signed(self.length())?;
        Some(Self {
            start: self.end,
            end,
        })
    }
}

impl std::fmt::Display for Window {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}, {})",
            self.start.format("%Y-%m-%dT%H:%M:%SZ"),
            self.end.format("%Y-%m-%dT%H:%M:%SZ")
        )
    }
}
