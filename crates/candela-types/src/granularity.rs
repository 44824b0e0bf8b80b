//! Candle granularity definitions.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::{CandelaError, InvalidGranularity, Result, Window};

/// Default time quantum a granularity is a multiple of (one minute).
pub const DEFAULT_UNIT: TimeDelta = TimeDelta::minutes(1);

/// Width of a candle window, expressed as a multiple of a time unit.
///
/// With the default unit of one minute, [`Granularity::Minute2`] covers two
/// minutes. Tests and demos may shrink the unit to seconds without changing
/// the relative nesting of the granularities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Granularity {
    /// One unit.
    #[serde(rename = "1m")]
    Minute1,
    /// Two units.
    #[serde(rename = "2m")]
    Minute2,
    /// Ten units.
    #[serde(rename = "10m")]
    Minute10,
}

impl Granularity {
    /// Returns the number of units in one window.
    #[must_use]
    pub const fn multiple(&self) -> u32 {
        match self {
            Self::Minute1 => 1,
            Self::Minute2 => 2,
            Self::Minute10 => 10,
        }
    }

    /// Looks up a granularity by its unit multiple.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidGranularity`] if no granularity has that multiple.
    pub fn from_multiple(multiple: u32) -> std::result::Result<Self, InvalidGranularity> {
        match multiple {
            1 => Ok(Self::Minute1),
            2 => Ok(Self::Minute2),
            10 => Ok(Self::Minute10),
            other => Err(InvalidGranularity(other.to_string())),
        }
    }

    /// Returns the window length for the given unit.
    ///
    /// # Errors
    ///
    /// Returns [`CandelaError::InvalidUnit`] if `unit` is not positive or the
    /// window length does not fit in a [`TimeDelta`].
    pub fn length(&self, unit: TimeDelta) -> Result<TimeDelta> {
        let multiple = i32::try_from(self.multiple()).unwrap_or(i32::MAX);
        unit.checked_mul(multiple)
            .filter(|length| length.num_milliseconds() > 0)
            .ok_or_else(|| CandelaError::InvalidUnit(unit.num_milliseconds()))
    }

    /// Returns the window length with the default one-minute unit.
    #[must_use]
    pub fn duration(&self) -> TimeDelta {
        TimeDelta::minutes(i64::from(self.multiple()))
    }

    /// Returns the window containing `timestamp`.
    ///
    /// # Errors
    ///
    /// Returns an error if `unit` is not positive or too large.
    pub fn window(&self, unit: TimeDelta, timestamp: DateTime<Utc>) -> Result<Window> {
        Window::containing(self.length(unit)?, timestamp)
    }

    /// Returns the start of the window containing `timestamp`.
    ///
    /// # Errors
    ///
    /// Returns an error if `unit` is not positive.
    pub fn window_start(&self, unit: TimeDelta, timestamp: DateTime<Utc>) -> Result<DateTime<Utc>> {
        self.window(unit, timestamp).map(|w| w.start)
    }

    /// Returns the granularity as a string identifier.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Minute1 => "1m",
            Self::Minute2 => "2m",
            Self::Minute10 => "10m",
        }
    }

    /// Returns all granularities, finest first.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::Minute1, Self::Minute2, Self::Minute10]
    }
}

impl std::fmt::Display for Granularity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Granularity {
    type Err = InvalidGranularity;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "1m" | "m1" | "1" | "minute" | "minute1" => Ok(Self::Minute1),
            "2m" | "m2" | "2" | "minute2" => Ok(Self::Minute2),
            "10m" | "m10" | "10" | "minute10" => Ok(Self::Minute10),
            _ => Err(InvalidGranularity(s.to_string())),
        }
    }
}
