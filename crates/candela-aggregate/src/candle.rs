//! OHLC candle data structure.

use candela_types::Granularity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// OHLC summary of one ticker over one window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Ticker symbol the candle was built for.
    pub ticker: String,
    /// Window width the candle covers.
    pub granularity: Granularity,
    /// Window open time (start of the period).
    pub timestamp: DateTime<Utc>,
    /// Opening price (first observation in arrival order).
    pub open: f64,
    /// Highest price during the period.
    pub high: f64,
    /// Lowest price during the period.
    pub low: f64,
    /// Closing price (last observation in arrival order).
    pub close: f64,
    /// Number of raw ticks folded into the candle.
    pub count: u32,
}

impl Candle {
    /// Creates a new candle.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ticker: impl Into<String>,
        granularity: Granularity,
        timestamp: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        count: u32,
    ) -> Self {
        Self {
            ticker: ticker.into(),
            granularity,
            timestamp,
            open,
            high,
            low,
            close,
            count,
        }
    }

    /// Returns the price range (high - low).
    #[must_use]
    pub fn range(&self) -> f64 {
        self.high - self.low
    }

    /// Returns true if this is a bullish (green) candle.
    #[must_use]
    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    /// Returns true if `low <= open, close <= high`.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.low <= self.open.min(self.close) && self.high >= self.open.max(self.close)
    }
}

impl std::fmt::Display for Candle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} {} O={} H={} L={} C={}",
            self.ticker,
            self.granularity,
            self.timestamp.format("%Y-%m-%dT%H:%M:%SZ"),
            self.open,
            self.high,
            self.low,
            self.close
        )
    }
}
