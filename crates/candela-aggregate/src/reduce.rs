//! Folding a window's observations into a candle.

use candela_types::Granularity;
use chrono::{DateTime, Utc};

use crate::{Candle, Observation};

/// Folds one ticker's observations for one window into a candle.
///
/// `open` comes from the first observation in arrival order, `close` from
/// the last, `high` and `low` are the extremes over all of them. Returns
/// `None` for an empty slice; stages never hold empty buffers.
#[must_use]
pub fn reduce<T: Observation>(
    granularity: Granularity,
    window_start: DateTime<Utc>,
    observations: &[T],
) -> Option<Candle> {
    let (first, rest) = observations.split_first()?;

    let mut builder = CandleBuilder::new(first);
    for observation in rest {
        builder.update(observation);
    }

    Some(builder.finish(granularity, window_start))
}

/// Builder for candles.
#[derive(Debug)]
struct CandleBuilder {
    ticker: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    count: u32,
}

impl CandleBuilder {
    /// Creates a new builder from the first observation.
    fn new<T: Observation>(first: &T) -> Self {
        Self {
            ticker: first.key().to_string(),
            open: first.open(),
            high: first.high(),
            low: first.low(),
            close: first.close(),
            count: first.count(),
        }
    }

    /// Updates the builder with the next observation.
    fn update<T: Observation>(&mut self, observation: &T) {
        debug_assert_eq!(observation.key(), self.ticker);
        self.high = self.high.max(observation.high());
        self.low = self.low.min(observation.low());
        self.close = observation.close();
        self.count = self.count.saturating_add(observation.count());
    }

    /// Finishes building and returns the candle.
    fn finish(self, granularity: Granularity, window_start: DateTime<Utc>) -> Candle {
        Candle {
            ticker: self.ticker,
            granularity,
            timestamp: window_start,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            count: self.count,
        }
    }
}
