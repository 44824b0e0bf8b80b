//! Pipeline configuration.

use candela_aggregate::LatePolicy;
use candela_types::Granularity;
use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::PipelineError;

/// Default capacity of each hand-off queue between stages.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 4;

/// Default time allowed for stages to drain on shutdown.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Default time a cancelled stage keeps receiving from an upstream stage that
/// is still draining.
pub const DEFAULT_DRAIN_GRACE: Duration = Duration::from_secs(1);

/// Configuration for a pipeline.
///
/// Every field has a default, so a configuration file only needs to list
/// the values it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Stage granularities in chain order, finest first.
    pub granularities: Vec<Granularity>,
    /// Time quantum granularities are multiples of, in milliseconds.
    pub unit_ms: u64,
    /// Capacity of each bounded hand-off queue.
    pub channel_capacity: usize,
    /// Handling of observations older than the current window.
    pub late_policy: LatePolicy,
    /// Time allowed for stages to drain on shutdown, in milliseconds.
    pub shutdown_timeout_ms: u64,
    /// Time a cancelled stage waits for its upstream to close, in milliseconds.
    pub drain_grace_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            granularities: Granularity::all().to_vec(),
            unit_ms: 60_000,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            late_policy: LatePolicy::default(),
            shutdown_timeout_ms: DEFAULT_SHUTDOWN_TIMEOUT.as_millis() as u64,
            drain_grace_ms: DEFAULT_DRAIN_GRACE.as_millis() as u64,
        }
    }
}

impl PipelineConfig {
    /// Returns the time unit as a chrono delta.
    ///
    /// # Errors
    ///
    /// Returns an error if `unit_ms` is zero or out of range.
    pub fn unit(&self) -> Result<TimeDelta, PipelineError> {
        i64::try_from(self.unit_ms)
            .ok()
            .and_then(TimeDelta::try_milliseconds)
            .filter(|unit| *unit > TimeDelta::zero())
            .ok_or_else(|| {
                PipelineError::Config(format!(
                    "unit_ms must be positive and in range, got {}",
                    self.unit_ms
                ))
            })
    }

    /// Returns how long a cancelled stage waits for its upstream to close.
    #[must_use]
    pub const fn drain_grace(&self) -> Duration {
        Duration::from_millis(self.drain_grace_ms)
    }

    /// Returns the shutdown timeout.
    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Checks the configuration for values a pipeline cannot run with.
    ///
    /// # Errors
    ///
    /// Returns an error if there are no stages, the chain is not strictly
    /// nested (each granularity a larger multiple of the previous one), the
    /// unit is zero or too large for the coarsest window, or the channel
    /// capacity is zero.
    pub fn validate(&self) -> Result<(), PipelineError> {
        validate_chain(&self.granularities)?;
        let unit = self.unit()?;
        for granularity in &self.granularities {
            granularity.length(unit).map_err(|_| {
                PipelineError::Config(format!(
                    "unit_ms {} is too large for {granularity} windows",
                    self.unit_ms
                ))
            })?;
        }
        if self.channel_capacity == 0 {
            return Err(PipelineError::Config(
                "channel_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Checks that stage granularities nest: each window splits evenly into
/// windows of the previous stage.
pub(crate) fn validate_chain(granularities: &[Granularity]) -> Result<(), PipelineError> {
    if granularities.is_empty() {
        return Err(PipelineError::Config("no stages configured".to_string()));
    }

    for pair in granularities.windows(2) {
        let (finer, coarser) = (pair[0], pair[1]);
        if coarser.multiple() <= finer.multiple() || coarser.multiple() % finer.multiple() != 0 {
            return Err(PipelineError::Config(format!(
                "{coarser} cannot follow {finer}: each stage must be a larger multiple of the previous one"
            )));
        }
    }

    Ok(())
}
