//! Anything a stage can aggregate.

use candela_types::Price;
use chrono::{DateTime, Utc};

use crate::Candle;

/// A keyed, timestamped observation that can be folded into a candle.
///
/// Raw ticks are degenerate observations whose open, high, low and close
/// are all the tick value. Candles re-observed by a coarser stage carry
/// their full OHLC, so folding finer candles gives the same result as
/// folding the raw ticks directly.
pub trait Observation: Send + 'static {
    /// Grouping key (the ticker).
    fn key(&self) -> &str;

    /// Timestamp used for window boundary detection.
    fn timestamp(&self) -> DateTime<Utc>;

    /// First value of the observation.
    fn open(&self) -> f64;

    /// Highest value of the observation.
    fn high(&self) -> f64;

    /// Lowest value of the observation.
    fn low(&self) -> f64;

    /// Last value of the observation.
    fn close(&self) -> f64;

    /// Number of raw ticks the observation stands for.
    fn count(&self) -> u32 {
        1
    }
}

impl Observation for Price {
    fn key(&self) -> &str {
        &self.ticker
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    fn open(&self) -> f64 {
        self.value
    }

    fn high(&self) -> f64 {
        self.value
    }

    fn low(&self) -> f64 {
        self.value
    }

    fn close(&self) -> f64 {
        self.value
    }
}

impl Observation for Candle {
    fn key(&self) -> &str {
        &self.ticker
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    fn open(&self) -> f64 {
        self.open
    }

    fn high(&self) -> f64 {
        self.high
    }

    fn low(&self) -> f64 {
        self.low
    }

    fn close(&self) -> f64 {
        self.close
    }

    fn count(&self) -> u32 {
        self.count
    }
}
