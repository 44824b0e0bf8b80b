//! Aggregation stage worker.

use candela_aggregate::{Candle, Observation, WindowAggregator};
use candela_format::CandleSink;
use candela_types::Granularity;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::DEFAULT_DRAIN_GRACE;

/// Summary of a stage's run, returned once it has closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageReport {
    /// Granularity the stage aggregated to.
    pub granularity: Granularity,
    /// Observations received.
    pub observations: u64,
    /// Candles emitted, including the final drain.
    pub candles: u64,
    /// Window flushes that emitted at least one candle.
    pub flushes: u64,
    /// Late observations discarded.
    pub late_dropped: u64,
    /// Late observations merged into the current window.
    pub late_merged: u64,
    /// Candles the sink failed to persist.
    pub sink_failures: u64,
    /// Candles that could not be handed to the downstream stage.
    pub forward_failures: u64,
    /// Whether the stage drained because of cancellation rather than end of input.
    pub cancelled: bool,
}

/// One aggregation stage: a window aggregator, its sink, and optionally the
/// queue feeding the next stage.
///
/// A stage runs as a single sequential task. All window state is owned by
/// that task, so nothing in it is shared or locked.
#[derive(Debug)]
pub struct Stage<T> {
    aggregator: WindowAggregator<T>,
    outputs: Outputs,
    cancel: CancellationToken,
    drain: CancellationToken,
    drain_grace: Duration,
}

impl<T: Observation> Stage<T> {
    /// Creates a stage.
    ///
    /// With `downstream` set, every emitted candle is also forwarded to the
    /// next stage; otherwise the stage is terminal and only persists.
    #[must_use]
    pub fn new(
        aggregator: WindowAggregator<T>,
        sink: Box<dyn CandleSink>,
        downstream: Option<mpsc::Sender<Candle>>,
        cancel: CancellationToken,
    ) -> Self {
        let granularity = aggregator.granularity();
        Self {
            aggregator,
            outputs: Outputs {
                granularity,
                sink,
                downstream,
                sink_failures: 0,
                forward_failures: 0,
            },
            cancel,
            drain: CancellationToken::new(),
            drain_grace: DEFAULT_DRAIN_GRACE,
        }
    }

    /// Sets how long a cancelled stage keeps receiving while its upstream
    /// is still open.
    #[must_use]
    pub const fn with_drain_grace(mut self, grace: Duration) -> Self {
        self.drain_grace = grace;
        self
    }

    /// Sets a token that, once the stage is cancelled, makes it stop
    /// receiving at once instead of waiting out the grace period.
    #[must_use]
    pub fn with_drain_signal(mut self, drain: CancellationToken) -> Self {
        self.drain = drain;
        self
    }

    /// Returns the stage granularity.
    #[must_use]
    pub const fn granularity(&self) -> Granularity {
        self.outputs.granularity
    }

    /// Returns true if the stage forwards its candles to another stage.
    #[must_use]
    pub const fn has_downstream(&self) -> bool {
        self.outputs.downstream.is_some()
    }

    /// Runs the stage until its input ends, then drains and closes.
    ///
    /// On cancellation the stage waits at most the drain grace for its
    /// upstream to close, so candles an upstream stage flushes while it
    /// drains still reach this one. When the grace runs out or the drain
    /// signal fires, the input is closed and only what is already queued is
    /// folded. The partial window is then flushed and the output closed, so
    /// the next stage drains in turn.
    pub async fn run(self, mut input: mpsc::Receiver<T>) -> StageReport {
        let Self {
            mut aggregator,
            mut outputs,
            cancel,
            drain,
            drain_grace,
        } = self;
        let granularity = outputs.granularity;
        info!(%granularity, has_downstream = outputs.downstream.is_some(), "stage started");

        let mut deadline: Option<Instant> = None;
        let mut upstream_open = true;
        while upstream_open {
            let draining = deadline.is_some();
            let grace_end = deadline.unwrap_or_else(Instant::now);
            tokio::select! {
                biased;
                () = cancel.cancelled(), if !draining => {
                    deadline = Some(Instant::now() + drain_grace);
                    info!(%granularity, ?drain_grace, "cancellation observed, draining");
                }
                () = drain.cancelled(), if draining => break,
                () = tokio::time::sleep_until(grace_end), if draining => break,
                next = input.recv() => match next {
                    Some(observation) => {
                        let candles = aggregator.process(observation);
                        outputs.emit(candles).await;
                    }
                    None => upstream_open = false,
                },
            }
        }

        if upstream_open {
            warn!(%granularity, "upstream still open, folding queued input only");
            input.close();
            while let Ok(observation) = input.try_recv() {
                let candles = aggregator.process(observation);
                outputs.emit(candles).await;
            }
        }

        let (candles, stats) = aggregator.finish();
        debug!(%granularity, candles = candles.len(), "draining partial window");
        outputs.emit(candles).await;

        if let Err(e) = outputs.sink.close().await {
            warn!(%granularity, error = %e, "failed to close sink");
        }
        // Dropping the sender closes the downstream stage's input.
        drop(outputs.downstream.take());

        let report = StageReport {
            granularity,
            observations: stats.observations,
            candles: stats.candles,
            flushes: stats.flushes,
            late_dropped: stats.late_dropped,
            late_merged: stats.late_merged,
            sink_failures: outputs.sink_failures,
            forward_failures: outputs.forward_failures,
            cancelled: deadline.is_some(),
        };
        info!(
            %granularity,
            observations = report.observations,
            candles = report.candles,
            sink_failures = report.sink_failures,
            "stage closed"
        );
        report
    }
}

/// Where a stage's candles go.
#[derive(Debug)]
struct Outputs {
    granularity: Granularity,
    sink: Box<dyn CandleSink>,
    downstream: Option<mpsc::Sender<Candle>>,
    sink_failures: u64,
    forward_failures: u64,
}

impl Outputs {
    /// Persists every candle and forwards it downstream if there is a
    /// downstream. A failure on one path never skips the other.
    async fn emit(&mut self, candles: Vec<Candle>) {
        for candle in candles {
            if let Err(e) = self.sink.write(&candle).await {
                self.sink_failures += 1;
                warn!(
                    granularity = %self.granularity,
                    ticker = %candle.ticker,
                    timestamp = %candle.timestamp,
                    error = %e,
                    "failed to persist candle"
                );
            }

            if let Some(downstream) = &self.downstream {
                if let Err(mpsc::error::SendError(candle)) = downstream.send(candle).await {
                    self.forward_failures += 1;
                    warn!(
                        granularity = %self.granularity,
                        ticker = %candle.ticker,
                        "downstream closed, candle not forwarded"
                    );
                }
            }
        }
    }
}
