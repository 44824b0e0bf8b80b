//! Synthetic price generator.

use candela_types::Price;
use chrono::{DateTime, Utc};
use futures::stream::{self, Stream, StreamExt};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;
use tokio::time::MissedTickBehavior;

use crate::SourceError;

/// Largest relative move of a price between two ticks.
const MAX_STEP: f64 = 0.01;

/// Lower bound prices never fall below.
const MIN_PRICE: f64 = 0.01;

/// Configuration for the price generator.
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// Tickers to emit a price for on every cycle.
    pub tickers: Vec<String>,
    /// Time between cycles.
    pub delay: Duration,
    /// Scale of starting prices; each ticker starts between `factor` and `10 * factor`.
    pub factor: f64,
    /// Seed for reproducible prices; `None` seeds from the OS.
    pub seed: Option<u64>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            tickers: ["AAPL", "SBER", "NVDA", "TSLA"]
                .into_iter()
                .map(String::from)
                .collect(),
            delay: Duration::from_millis(500),
            factor: 10.0,
            seed: None,
        }
    }
}

/// Emits one price per configured ticker every `delay`, as a random walk.
#[derive(Debug)]
pub struct PriceGenerator {
    config: GeneratorConfig,
    rng: StdRng,
    prices: Vec<f64>,
}

impl PriceGenerator {
    /// Creates a new generator.
    ///
    /// # Errors
    ///
    /// Returns an error if no tickers are configured, the delay is zero, or
    /// the factor is not a positive finite number.
    pub fn new(config: GeneratorConfig) -> Result<Self, SourceError> {
        if config.tickers.is_empty() {
            return Err(SourceError::InvalidConfig("no tickers configured".to_string()));
        }
        if config.delay.is_zero() {
            return Err(SourceError::InvalidConfig("delay must be positive".to_string()));
        }
        if !(config.factor.is_finite() && config.factor > 0.0) {
            return Err(SourceError::InvalidConfig(format!(
                "factor must be positive, got {}",
                config.factor
            )));
        }

        let mut rng = config
            .seed
            .map_or_else(StdRng::from_entropy, StdRng::seed_from_u64);
        let prices = config
            .tickers
            .iter()
            .map(|_| config.factor * rng.gen_range(1.0..10.0))
            .collect();

        Ok(Self {
            config,
            rng,
            prices,
        })
    }

    /// Returns the generator configuration.
    #[must_use]
    pub const fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    /// Advances every ticker one step and returns the new prices, all
    /// stamped with `timestamp`, in ticker order.
    pub fn next_batch(&mut self, timestamp: DateTime<Utc>) -> Vec<Price> {
        self.config
            .tickers
            .iter()
            .zip(self.prices.iter_mut())
            .map(|(ticker, price)| {
                let step = self.rng.gen_range(-MAX_STEP..=MAX_STEP);
                *price = (*price * (1.0 + step)).max(MIN_PRICE);
                Price::new(ticker.clone(), *price, timestamp)
            })
            .collect()
    }

    /// Turns the generator into an unbounded stream stamped with wall-clock time.
    ///
    /// The first batch is emitted immediately, then one batch every `delay`.
    pub fn into_stream(self) -> impl Stream<Item = Price> + Send + 'static {
        let mut interval = tokio::time::interval(self.config.delay);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        stream::unfold((self, interval), |(mut generator, mut interval)| async move {
            interval.tick().await;
            let batch = generator.next_batch(Utc::now());
            Some((stream::iter(batch), (generator, interval)))
        })
        .flatten()
    }
}
