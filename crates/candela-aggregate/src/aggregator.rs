//! Per-ticker window state machine.

use std::collections::BTreeMap;
use std::str::FromStr;

use candela_types::{CandelaError, Granularity, Window};
use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{Candle, Observation, reduce};

/// What to do with an observation older than the current window's start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LatePolicy {
    /// Discard the observation and count it.
    #[default]
    Drop,
    /// Fold the observation into the current window in arrival order.
    Merge,
}

impl LatePolicy {
    /// Returns the policy as a string identifier.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Drop => "drop",
            Self::Merge => "merge",
        }
    }
}

impl std::fmt::Display for LatePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for LatePolicy {
    type Err = CandelaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "drop" => Ok(Self::Drop),
            "merge" => Ok(Self::Merge),
            _ => Err(CandelaError::Config(format!(
                "invalid late policy '{s}', expected one of: drop, merge"
            ))),
        }
    }
}

/// Counters kept by a [`WindowAggregator`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregatorStats {
    /// Observations received.
    pub observations: u64,
    /// Observations discarded under [`LatePolicy::Drop`].
    pub late_dropped: u64,
    /// Observations merged under [`LatePolicy::Merge`].
    pub late_merged: u64,
    /// Window flushes that emitted at least one candle.
    pub flushes: u64,
    /// Candles emitted.
    pub candles: u64,
}

/// Streaming windowed aggregator for many tickers at once.
///
/// Observations are buffered per ticker for the current window. When an
/// observation at or past the window end arrives, every buffered ticker is
/// reduced to a candle, the window moves to the epoch-aligned window that
/// contains the new observation, and the observation seeds the new buffer.
/// Window boundaries therefore never drift with the arrival pattern.
#[derive(Debug)]
pub struct WindowAggregator<T> {
    granularity: Granularity,
    length: TimeDelta,
    late_policy: LatePolicy,
    window: Option<Window>,
    buffers: BTreeMap<String, Vec<T>>,
    stats: AggregatorStats,
}

impl<T: Observation> WindowAggregator<T> {
    /// Creates a new aggregator for the given granularity and time unit.
    ///
    /// # Errors
    ///
    /// Returns an error if `unit` is not a positive number of milliseconds,
    /// or the window length overflows.
    pub fn new(granularity: Granularity, unit: TimeDelta) -> Result<Self, CandelaError> {
        let length = granularity.length(unit)?;

        Ok(Self {
            granularity,
            length,
            late_policy: LatePolicy::default(),
            window: None,
            buffers: BTreeMap::new(),
            stats: AggregatorStats::default(),
        })
    }

    /// Sets the policy for observations older than the current window.
    #[must_use]
    pub const fn with_late_policy(mut self, late_policy: LatePolicy) -> Self {
        self.late_policy = late_policy;
        self
    }

    /// Returns the granularity being aggregated to.
    #[must_use]
    pub const fn granularity(&self) -> Granularity {
        self.granularity
    }

    /// Returns the current window, or `None` before the first observation.
    #[must_use]
    pub const fn current_window(&self) -> Option<Window> {
        self.window
    }

    /// Returns the number of tickers buffered in the current window.
    #[must_use]
    pub fn buffered_keys(&self) -> usize {
        self.buffers.len()
    }

    /// Returns the counters accumulated so far.
    #[must_use]
    pub const fn stats(&self) -> AggregatorStats {
        self.stats
    }

    /// Processes an observation, returning the candles of any window it closed.
    ///
    /// The returned vector is empty unless `observation` crossed the current
    /// window boundary. Candles are ordered by ticker.
    pub fn process(&mut self, observation: T) -> Vec<Candle> {
        self.stats.observations += 1;
        let timestamp = observation.timestamp();

        let Some(window) = self.window else {
            match Window::containing(self.length, timestamp) {
                Ok(window) => {
                    debug!(granularity = %self.granularity, %window, "opened first window");
                    self.window = Some(window);
                    self.push(observation);
                }
                Err(e) => warn!(granularity = %self.granularity, error = %e, "discarding observation"),
            }
            return Vec::new();
        };

        if timestamp < window.start {
            match self.late_policy {
                LatePolicy::Drop => {
                    self.stats.late_dropped += 1;
                    debug!(
                        granularity = %self.granularity,
                        key = observation.key(),
                        %timestamp,
                        %window,
                        "dropping late observation"
                    );
                }
                LatePolicy::Merge => {
                    self.stats.late_merged += 1;
                    self.push(observation);
                }
            }
            return Vec::new();
        }

        if timestamp < window.end {
            self.push(observation);
            return Vec::new();
        }

        let candles = self.flush(window);

        match Window::containing(self.length, timestamp) {
            Ok(next) => {
                let skipped = (next.start - window.end).num_milliseconds()
                    / self.length.num_milliseconds();
                if skipped > 0 {
                    debug!(granularity = %self.granularity, skipped, "skipped empty windows");
                }
                self.window = Some(next);
                self.push(observation);
            }
            Err(e) => {
                self.window = None;
                warn!(granularity = %self.granularity, error = %e, "discarding observation");
            }
        }
        candles
    }

    /// Flushes the current, possibly incomplete, window and closes the aggregator.
    #[must_use]
    pub fn finish(mut self) -> (Vec<Candle>, AggregatorStats) {
        let candles = match self.window.take() {
            Some(window) => self.flush(window),
            None => Vec::new(),
        };
        (candles, self.stats)
    }

    fn push(&mut self, observation: T) {
        if let Some(buffer) = self.buffers.get_mut(observation.key()) {
            buffer.push(observation);
        } else {
            self.buffers.insert(observation.key().to_string(), vec![observation]);
        }
    }

    fn flush(&mut self, window: Window) -> Vec<Candle> {
        let candles: Vec<Candle> = std::mem::take(&mut self.buffers)
            .values()
            .filter_map(|buffer| reduce(self.granularity, window.start, buffer))
            .collect();

        if !candles.is_empty() {
            self.stats.flushes += 1;
            self.stats.candles += candles.len() as u64;
            debug!(
                granularity = %self.granularity,
                %window,
                candles = candles.len(),
                "flushed window"
            );
        }

        candles
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use candela_types::{DEFAULT_UNIT, Price};
    use chrono::{DateTime, TimeZone, Utc};

    fn at(minute: u32, second: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, minute, second).unwrap()
    }

    fn tick(ticker: &str, value: f64, minute: u32, second: u32) -> Price {
        Price::new(ticker, value, at(minute, second))
    }

    fn minute_aggregator() -> WindowAggregator<Price> {
        WindowAggregator::new(Granularity::Minute1, DEFAULT_UNIT).unwrap()
    }

    #[test]
    fn test_single_window_then_boundary() {
        let mut agg = minute_aggregator();

        for (i, value) in [10.0, 12.0, 9.0, 11.0].into_iter().enumerate() {
            assert!(agg.process(tick("AAPL", value, 0, i as u32 * 10)).is_empty());
        }

        let candles = agg.process(tick("AAPL", 15.0, 1, 0));
        assert_eq!(candles.len(), 1);

        let candle = &candles[0];
        assert_eq!(candle.timestamp, at(0, 0));
        assert_relative_eq!(candle.open, 10.0);
        assert_relative_eq!(candle.high, 12.0);
        assert_relative_eq!(candle.low, 9.0);
        assert_relative_eq!(candle.close, 11.0);

        // The triggering tick seeds the next window.
        assert_eq!(agg.current_window().unwrap().start, at(1, 0));
        let (rest, _) = agg.finish();
        assert_eq!(rest.len(), 1);
        assert_relative_eq!(rest[0].open, 15.0);
        assert_relative_eq!(rest[0].close, 15.0);
    }

    #[test]
    fn test_keys_are_not_mixed() {
        let mut agg = minute_aggregator();
        agg.process(tick("SBER", 250.0, 0, 1));
        agg.process(tick("AAPL", 10.0, 0, 2));
        agg.process(tick("SBER", 255.0, 0, 3));
        agg.process(tick("AAPL", 8.0, 0, 4));

        let candles = agg.process(tick("AAPL", 9.0, 1, 5));
        assert_eq!(candles.len(), 2);

        assert_eq!(candles[0].ticker, "AAPL");
        assert_relative_eq!(candles[0].open, 10.0);
        assert_relative_eq!(candles[0].low, 8.0);

        assert_eq!(candles[1].ticker, "SBER");
        assert_relative_eq!(candles[1].open, 250.0);
        assert_relative_eq!(candles[1].high, 255.0);
    }

    #[test]
    fn test_silent_key_not_emitted() {
        let mut agg = minute_aggregator();
        agg.process(tick("AAPL", 10.0, 0, 0));
        agg.process(tick("SBER", 250.0, 0, 1));

        let first = agg.process(tick("AAPL", 11.0, 1, 0));
        assert_eq!(first.len(), 2);

        let second = agg.process(tick("AAPL", 12.0, 2, 0));
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].ticker, "AAPL");
    }

    #[test]
    fn test_gap_skips_empty_windows() {
        let mut agg = WindowAggregator::new(Granularity::Minute2, DEFAULT_UNIT).unwrap();
        agg.process(tick("AAPL", 10.0, 1, 0));

        // Seven minutes later: windows [12:02, 12:04) and [12:04, 12:06) stay empty.
        let candles = agg.process(tick("AAPL", 20.0, 7, 30));
        assert_eq!(candles.len(), 1);
        assert_eq!(candles[0].timestamp, at(0, 0));

        let window = agg.current_window().unwrap();
        assert_eq!(window.start, at(6, 0));
        assert_eq!(window.end, at(8, 0));

        let stats = agg.stats();
        assert_eq!(stats.flushes, 1);
        assert_eq!(stats.candles, 1);
    }

    #[test]
    fn test_window_start_is_floored_first_timestamp() {
        let mut agg = WindowAggregator::new(Granularity::Minute10, DEFAULT_UNIT).unwrap();
        agg.process(tick("AAPL", 10.0, 7, 42));
        assert_eq!(agg.current_window().unwrap().start, at(0, 0));
        assert_eq!(agg.current_window().unwrap().end, at(10, 0));
    }

    #[test]
    fn test_late_observation_dropped_by_default() {
        let mut agg = minute_aggregator();
        agg.process(tick("AAPL", 10.0, 0, 30));
        agg.process(tick("AAPL", 11.0, 1, 10));

        assert!(agg.process(tick("AAPL", 99.0, 0, 59)).is_empty());
        assert_eq!(agg.stats().late_dropped, 1);

        let (candles, stats) = agg.finish();
        assert_eq!(candles.len(), 1);
        assert_relative_eq!(candles[0].high, 11.0);
        assert_eq!(stats.observations, 3);
    }

    #[test]
    fn test_late_observation_merged() {
        let mut agg = minute_aggregator().with_late_policy(LatePolicy::Merge);
        agg.process(tick("AAPL", 10.0, 0, 30));
        agg.process(tick("AAPL", 11.0, 1, 10));

        assert!(agg.process(tick("AAPL", 99.0, 0, 59)).is_empty());

        let (candles, stats) = agg.finish();
        assert_eq!(stats.late_merged, 1);
        assert_eq!(candles[0].timestamp, at(1, 0));
        assert_relative_eq!(candles[0].open, 11.0);
        assert_relative_eq!(candles[0].high, 99.0);
        assert_relative_eq!(candles[0].close, 99.0);
    }

    #[test]
    fn test_finish_without_observations() {
        let agg = minute_aggregator();
        let (candles, stats) = agg.finish();
        assert!(candles.is_empty());
        assert_eq!(stats, AggregatorStats::default());
    }

    #[test]
    fn test_nested_windows_match_direct_aggregation() {
        let ticks = vec![
            tick("AAPL", 10.0, 0, 5),
            tick("SBER", 250.0, 0, 7),
            tick("AAPL", 14.0, 0, 40),
            tick("AAPL", 9.0, 1, 10),
            tick("SBER", 240.0, 1, 50),
            tick("AAPL", 12.0, 1, 59),
            tick("AAPL", 13.0, 2, 1),
            tick("SBER", 260.0, 3, 30),
        ];

        let mut minute = minute_aggregator();
        let mut two_from_minutes = WindowAggregator::new(Granularity::Minute2, DEFAULT_UNIT).unwrap();
        let mut from_minutes = Vec::new();
        for t in ticks.clone() {
            for candle in minute.process(t) {
                from_minutes.extend(two_from_minutes.process(candle));
            }
        }
        for candle in minute.finish().0 {
            from_minutes.extend(two_from_minutes.process(candle));
        }
        from_minutes.extend(two_from_minutes.finish().0);

        let mut direct = WindowAggregator::new(Granularity::Minute2, DEFAULT_UNIT).unwrap();
        let mut from_ticks = Vec::new();
        for t in ticks {
            from_ticks.extend(direct.process(t));
        }
        from_ticks.extend(direct.finish().0);

        assert_eq!(from_minutes, from_ticks);
        assert_eq!(from_ticks.len(), 4);
    }

    #[test]
    fn test_late_policy_parse() {
        assert_eq!("drop".parse::<LatePolicy>().unwrap(), LatePolicy::Drop);
        assert_eq!("MERGE".parse::<LatePolicy>().unwrap(), LatePolicy::Merge);
        assert!("clamp".parse::<LatePolicy>().is_err());
    }

    #[test]
    fn test_invalid_unit() {
        assert!(WindowAggregator::<Price>::new(Granularity::Minute1, TimeDelta::zero()).is_err());

        let huge = TimeDelta::milliseconds(2_000_000_000_000_000_000);
        assert!(matches!(
            WindowAggregator::<Price>::new(Granularity::Minute10, huge),
            Err(CandelaError::InvalidUnit(_))
        ));
    }
}
