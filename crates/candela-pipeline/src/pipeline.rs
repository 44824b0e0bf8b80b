//! Pipeline composition and control.

use candela_aggregate::{Candle, LatePolicy, WindowAggregator};
use candela_format::{CandleSink, OutputFormat, open_sink};
use candela_types::{Granularity, Price};
use chrono::TimeDelta;
use futures::future::join_all;
use futures::stream::{Stream, StreamExt};
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::error::Elapsed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{PipelineConfig, PipelineError, Stage, StageReport};

/// Summary of a finished pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineReport {
    /// Ticks taken from the source and handed to the first stage.
    pub ticks: u64,
    /// Stage reports in chain order.
    pub stages: Vec<StageReport>,
    /// Whether the pipeline was cancelled rather than running out of input.
    pub cancelled: bool,
}

impl PipelineReport {
    /// Returns the report of the stage with `granularity`, if present.
    #[must_use]
    pub fn stage(&self, granularity: Granularity) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.granularity == granularity)
    }

    /// Returns the total number of candles that failed to persist.
    #[must_use]
    pub fn sink_failures(&self) -> u64 {
        self.stages.iter().map(|s| s.sink_failures).sum()
    }
}

/// Builder for [`Pipeline`].
#[derive(Debug)]
pub struct PipelineBuilder {
    config: PipelineConfig,
    stages: Vec<(Granularity, Box<dyn CandleSink>)>,
    tap_output: bool,
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self {
            config: PipelineConfig::default(),
            stages: Vec::new(),
            tap_output: false,
        }
    }
}

impl PipelineBuilder {
    /// Applies unit, capacity, late policy and shutdown timeout from `config`.
    ///
    /// Stages are not taken from the configuration; add them with
    /// [`stage`](Self::stage) or [`file_sinks`](Self::file_sinks).
    #[must_use]
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the time unit granularities are multiples of.
    ///
    /// Sub-millisecond precision is truncated.
    #[must_use]
    pub fn unit(mut self, unit: TimeDelta) -> Self {
        self.config.unit_ms = u64::try_from(unit.num_milliseconds()).unwrap_or(0);
        self
    }

    /// Sets the capacity of each hand-off queue.
    #[must_use]
    pub const fn channel_capacity(mut self, capacity: usize) -> Self {
        self.config.channel_capacity = capacity;
        self
    }

    /// Sets the handling of late observations for every stage.
    #[must_use]
    pub const fn late_policy(mut self, policy: LatePolicy) -> Self {
        self.config.late_policy = policy;
        self
    }

    /// Sets how long a cancelled stage keeps waiting for its upstream to
    /// close before it folds only what is already queued.
    #[must_use]
    pub const fn drain_grace(mut self, grace: Duration) -> Self {
        self.config.drain_grace_ms = grace.as_millis() as u64;
        self
    }

    /// Sets the default timeout used by [`PipelineHandle::shutdown_default`].
    #[must_use]
    pub const fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.config.shutdown_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Appends a stage to the chain. Stages are chained in call order.
    #[must_use]
    pub fn stage(mut self, granularity: Granularity, sink: Box<dyn CandleSink>) -> Self {
        self.stages.push((granularity, sink));
        self
    }

    /// Appends one stage per configured granularity, each writing to its
    /// own file in `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if a sink file cannot be opened.
    pub async fn file_sinks(
        mut self,
        dir: &Path,
        format: OutputFormat,
        include_header: bool,
    ) -> Result<Self, PipelineError> {
        for granularity in self.config.granularities.clone() {
            let sink = open_sink(dir, granularity, format, include_header).await?;
            self.stages.push((granularity, sink));
        }
        Ok(self)
    }

    /// Exposes the terminal stage's candles through
    /// [`PipelineHandle::take_output`].
    ///
    /// The tap is a bounded queue like every other hand-off, so a caller
    /// that requests it must keep reading or drop the receiver.
    #[must_use]
    pub const fn tap_output(mut self, tap: bool) -> Self {
        self.tap_output = tap;
        self
    }

    /// Wires the stages together.
    ///
    /// # Errors
    ///
    /// Returns an error if no stage was added, the chain does not nest, the
    /// unit is not positive, or the channel capacity is zero.
    pub fn build(self) -> Result<Pipeline, PipelineError> {
        let Self {
            mut config,
            stages,
            tap_output,
        } = self;
        config.granularities = stages.iter().map(|(g, _)| *g).collect();
        config.validate()?;

        let unit = config.unit()?;
        let capacity = config.channel_capacity;
        let grace = config.drain_grace();
        let cancel = CancellationToken::new();
        let drain = CancellationToken::new();

        let mut stages = stages.into_iter();
        let Some((head_granularity, head_sink)) = stages.next() else {
            return Err(PipelineError::Config("no stages configured".to_string()));
        };

        let (ingest_tx, head_rx) = mpsc::channel::<Price>(capacity);

        // Build back to front so each stage can be handed its downstream sender.
        let rest: Vec<_> = stages.collect();
        let (output_tx, output_rx) = if tap_output {
            let (tx, rx) = mpsc::channel(capacity);
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };

        let mut downstream = output_tx;
        let mut tail = Vec::with_capacity(rest.len());
        for (granularity, sink) in rest.into_iter().rev() {
            let aggregator = WindowAggregator::<Candle>::new(granularity, unit)?
                .with_late_policy(config.late_policy);
            let (tx, rx) = mpsc::channel(capacity);
            let stage = Stage::new(aggregator, sink, downstream.take(), cancel.clone())
                .with_drain_grace(grace)
                .with_drain_signal(drain.clone());
            tail.push((stage, rx));
            downstream = Some(tx);
        }
        tail.reverse();

        let aggregator = WindowAggregator::<Price>::new(head_granularity, unit)?
            .with_late_policy(config.late_policy);
        let head = Stage::new(aggregator, head_sink, downstream, cancel.clone())
            .with_drain_grace(grace)
            .with_drain_signal(drain.clone());

        Ok(Pipeline {
            config,
            cancel,
            drain,
            ingest_tx,
            head: (head, head_rx),
            tail,
            output: output_rx,
        })
    }
}

/// A wired but not yet running chain of aggregation stages.
///
/// Raw ticks enter the first stage; every stage persists its candles and
/// forwards them to the next, coarser stage.
#[derive(Debug)]
pub struct Pipeline {
    config: PipelineConfig,
    cancel: CancellationToken,
    drain: CancellationToken,
    ingest_tx: mpsc::Sender<Price>,
    head: (Stage<Price>, mpsc::Receiver<Price>),
    tail: Vec<(Stage<Candle>, mpsc::Receiver<Candle>)>,
    output: Option<mpsc::Receiver<Candle>>,
}

impl Pipeline {
    /// Returns a builder with default configuration and no stages.
    #[must_use]
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    /// Returns the stage granularities in chain order.
    #[must_use]
    pub fn granularities(&self) -> &[Granularity] {
        &self.config.granularities
    }

    /// Starts consuming `source`, running every stage as its own task.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn spawn<S>(self, source: S) -> PipelineHandle
    where
        S: Stream<Item = Price> + Send + 'static,
    {
        let Self {
            config,
            cancel,
            drain,
            ingest_tx,
            head,
            tail,
            output,
        } = self;

        info!(
            stages = ?config.granularities,
            unit_ms = config.unit_ms,
            capacity = config.channel_capacity,
            late_policy = %config.late_policy,
            "pipeline started"
        );

        let ingest = tokio::spawn(ingest(source, ingest_tx, cancel.clone()));

        let (head_stage, head_rx) = head;
        let mut stages = Vec::with_capacity(tail.len() + 1);
        stages.push(tokio::spawn(head_stage.run(head_rx)));
        for (stage, rx) in tail {
            stages.push(tokio::spawn(stage.run(rx)));
        }

        PipelineHandle {
            cancel,
            drain,
            ingest,
            stages,
            output,
            shutdown_timeout: config.shutdown_timeout(),
        }
    }
}

/// Pulls ticks from the source into the first stage until the source ends
/// or cancellation is requested. Returns the number of ticks handed off.
async fn ingest<S>(source: S, tx: mpsc::Sender<Price>, cancel: CancellationToken) -> u64
where
    S: Stream<Item = Price> + Send + 'static,
{
    let mut source = std::pin::pin!(source);
    let mut ticks = 0u64;

    loop {
        let price = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            next = source.next() => match next {
                Some(price) => price,
                None => {
                    debug!(ticks, "source exhausted");
                    break;
                }
            },
        };

        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            sent = tx.send(price) => {
                if sent.is_err() {
                    warn!("first stage closed, stopping ingest");
                    break;
                }
                ticks += 1;
            }
        }
    }

    debug!(ticks, cancelled = cancel.is_cancelled(), "ingest stopped");
    ticks
}

/// Waits up to `timeout` for `wait`.
///
/// Once the pipeline is cancelled, half the timeout is given to a normal
/// drain. If stages are still waiting on their upstream after that, the
/// drain signal makes them fold only their queued input and close.
async fn wait_bounded<F>(
    cancel: &CancellationToken,
    drain: &CancellationToken,
    mut wait: Pin<&mut F>,
    timeout: Duration,
) -> Result<F::Output, Elapsed>
where
    F: Future,
{
    if !cancel.is_cancelled() {
        return tokio::time::timeout(timeout, wait).await;
    }

    let first = timeout / 2;
    match tokio::time::timeout(first, wait.as_mut()).await {
        Ok(output) => Ok(output),
        Err(_) => {
            debug!(elapsed = ?first, "stages still draining, closing their inputs");
            drain.cancel();
            tokio::time::timeout(timeout.saturating_sub(first), wait).await
        }
    }
}

fn abort_all(aborts: &[AbortHandle]) {
    for handle in aborts {
        handle.abort();
    }
}

/// Turns the outcome of waiting on the pipeline tasks into a report,
/// aborting whatever is still running if the wait timed out or a task
/// failed.
fn close(
    cancel: &CancellationToken,
    aborts: &[AbortHandle],
    outcome: Result<Result<(u64, Vec<StageReport>), PipelineError>, Elapsed>,
    timeout: Duration,
) -> Result<PipelineReport, PipelineError> {
    let Ok(result) = outcome else {
        warn!(?timeout, "pipeline did not drain in time, aborting remaining tasks");
        abort_all(aborts);
        return Err(PipelineError::ShutdownTimeout(timeout));
    };

    let (ticks, stages) = result.inspect_err(|e| {
        warn!(error = %e, "pipeline task failed, aborting remaining tasks");
        abort_all(aborts);
    })?;
    let report = PipelineReport {
        ticks,
        cancelled: cancel.is_cancelled(),
        stages,
    };
    info!(
        ticks = report.ticks,
        cancelled = report.cancelled,
        sink_failures = report.sink_failures(),
        "pipeline closed"
    );
    Ok(report)
}

/// Handle to a running pipeline.
#[derive(Debug)]
pub struct PipelineHandle {
    cancel: CancellationToken,
    drain: CancellationToken,
    ingest: JoinHandle<u64>,
    stages: Vec<JoinHandle<StageReport>>,
    output: Option<mpsc::Receiver<Candle>>,
    shutdown_timeout: Duration,
}

impl PipelineHandle {
    /// Requests cooperative shutdown. Stages flush what they hold and close.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Returns the token shared by every pipeline task.
    ///
    /// Cancelling it is equivalent to calling [`cancel`](Self::cancel).
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Returns true once cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Takes the receiver of the terminal stage's candles.
    ///
    /// Returns `None` unless the pipeline was built with
    /// [`tap_output`](PipelineBuilder::tap_output), or if already taken.
    pub fn take_output(&mut self) -> Option<mpsc::Receiver<Candle>> {
        self.output.take()
    }

    /// Waits for every stage to close.
    ///
    /// Without a prior [`cancel`](Self::cancel) this waits for the source to
    /// end. After a cancel, stages still waiting on their upstream halfway
    /// through `timeout` are told to fold only their queued input. If the
    /// stages have not all closed within `timeout`, the remaining tasks are
    /// aborted.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::ShutdownTimeout`] if the timeout elapses, or
    /// [`PipelineError::Join`] if a task panicked.
    pub async fn join(self, timeout: Duration) -> Result<PipelineReport, PipelineError> {
        let (cancel, drain, aborts, wait) = self.into_parts();
        let wait = std::pin::pin!(wait);
        let outcome = wait_bounded(&cancel, &drain, wait, timeout).await;
        close(&cancel, &aborts, outcome, timeout)
    }

    /// Runs until the source ends or `stop` completes, whichever is first.
    ///
    /// When `stop` wins the pipeline is cancelled and given `timeout` to
    /// drain. A natural end of input is waited for without limit.
    ///
    /// # Errors
    ///
    /// See [`join`](Self::join).
    pub async fn run_until<F>(
        self,
        stop: F,
        timeout: Duration,
    ) -> Result<PipelineReport, PipelineError>
    where
        F: Future<Output = ()>,
    {
        let (cancel, drain, aborts, wait) = self.into_parts();
        let mut wait = std::pin::pin!(wait);

        let outcome = tokio::select! {
            result = &mut wait => Ok(result),
            () = stop => {
                info!(?timeout, "shutdown requested");
                cancel.cancel();
                wait_bounded(&cancel, &drain, wait.as_mut(), timeout).await
            }
        };
        close(&cancel, &aborts, outcome, timeout)
    }

    /// Splits the handle into its tokens, abort handles for every task, and
    /// a future collecting the task results.
    ///
    /// The future waits for every task even if one of them failed, so no
    /// stage is left running unobserved.
    fn into_parts(
        self,
    ) -> (
        CancellationToken,
        CancellationToken,
        Vec<AbortHandle>,
        impl Future<Output = Result<(u64, Vec<StageReport>), PipelineError>>,
    ) {
        let Self {
            cancel,
            drain,
            ingest,
            stages,
            output,
            ..
        } = self;
        // An untaken tap would block the terminal stage on a full queue.
        drop(output);

        let mut aborts = vec![ingest.abort_handle()];
        aborts.extend(stages.iter().map(JoinHandle::abort_handle));

        let wait = async move {
            let ingested = ingest.await;
            let results = join_all(stages).await;
            let ticks = ingested?;
            let mut reports = Vec::with_capacity(results.len());
            for result in results {
                reports.push(result?);
            }
            Ok((ticks, reports))
        };

        (cancel, drain, aborts, wait)
    }

    /// Cancels the pipeline and waits up to `timeout` for it to drain.
    ///
    /// # Errors
    ///
    /// See [`join`](Self::join).
    pub async fn shutdown(self, timeout: Duration) -> Result<PipelineReport, PipelineError> {
        info!(?timeout, "shutdown requested");
        self.cancel();
        let report = self.join(timeout).await?;
        info!("shutdown complete");
        Ok(report)
    }

    /// Like [`shutdown`](Self::shutdown), using the configured shutdown timeout.
    ///
    /// # Errors
    ///
    /// See [`join`](Self::join).
    pub async fn shutdown_default(self) -> Result<PipelineReport, PipelineError> {
        let timeout = self.shutdown_timeout;
        self.shutdown(timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use async_trait::async_trait;
    use candela_aggregate::reduce;
    use candela_format::{MemorySink, SinkError};
    use chrono::{DateTime, TimeZone, Utc};
    use futures::stream;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn at(minute: u32, second: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, minute, second).unwrap()
    }

    struct Sinks {
        m1: MemorySink,
        m2: MemorySink,
        m10: MemorySink,
    }

    fn three_stage() -> (PipelineBuilder, Sinks) {
        let sinks = Sinks {
            m1: MemorySink::new(),
            m2: MemorySink::new(),
            m10: MemorySink::new(),
        };
        let builder = Pipeline::builder()
            .stage(Granularity::Minute1, Box::new(sinks.m1.clone()))
            .stage(Granularity::Minute2, Box::new(sinks.m2.clone()))
            .stage(Granularity::Minute10, Box::new(sinks.m10.clone()));
        (builder, sinks)
    }

    /// A price per second for `ticker`, covering `minutes` minutes.
    fn ticks(ticker: &str, minutes: u32) -> Vec<Price> {
        (0..minutes * 60)
            .map(|s| {
                let value = 100.0 + f64::from(s % 37) - f64::from(s % 11);
                Price::new(ticker, value, at(s / 60, s % 60))
            })
            .collect()
    }

    #[tokio::test]
    async fn test_minute_scenario_end_to_end() {
        let (builder, sinks) = three_stage();
        let pipeline = builder.build().unwrap();

        let source = stream::iter(vec![
            Price::new("AAPL", 10.0, at(0, 0)),
            Price::new("AAPL", 12.0, at(0, 20)),
            Price::new("AAPL", 9.0, at(0, 40)),
            Price::new("AAPL", 11.0, at(0, 59)),
            Price::new("AAPL", 15.0, at(1, 0)),
        ]);
        let report = pipeline.spawn(source).join(TIMEOUT).await.unwrap();

        let minute = sinks.m1.candles();
        assert_eq!(minute.len(), 2);
        assert_eq!(minute[0].timestamp, at(0, 0));
        assert_relative_eq!(minute[0].open, 10.0);
        assert_relative_eq!(minute[0].high, 12.0);
        assert_relative_eq!(minute[0].low, 9.0);
        assert_relative_eq!(minute[0].close, 11.0);
        assert_eq!(minute[1].timestamp, at(1, 0));
        assert_relative_eq!(minute[1].close, 15.0);

        // Both minutes fall in the same 2m and 10m windows.
        let two = sinks.m2.candles();
        assert_eq!(two.len(), 1);
        assert_relative_eq!(two[0].open, 10.0);
        assert_relative_eq!(two[0].high, 15.0);
        assert_relative_eq!(two[0].low, 9.0);
        assert_relative_eq!(two[0].close, 15.0);
        assert_eq!(two[0].count, 5);
        assert_eq!(sinks.m10.len(), 1);

        assert_eq!(report.ticks, 5);
        assert_eq!(report.stages.len(), 3);
        assert!(!report.cancelled);
        assert_eq!(report.stage(Granularity::Minute1).unwrap().candles, 2);
    }

    #[tokio::test]
    async fn test_tickers_aggregate_independently() {
        let (builder, sinks) = three_stage();
        let pipeline = builder.build().unwrap();

        let source = stream::iter(vec![
            Price::new("AAPL", 10.0, at(0, 0)),
            Price::new("SBER", 200.0, at(0, 1)),
            Price::new("AAPL", 11.0, at(0, 2)),
            Price::new("SBER", 190.0, at(0, 3)),
        ]);
        pipeline.spawn(source).join(TIMEOUT).await.unwrap();

        let minute = sinks.m1.candles();
        assert_eq!(minute.len(), 2);
        let aapl = minute.iter().find(|c| c.ticker == "AAPL").unwrap();
        let sber = minute.iter().find(|c| c.ticker == "SBER").unwrap();
        assert_relative_eq!(aapl.high, 11.0);
        assert_relative_eq!(aapl.low, 10.0);
        assert_relative_eq!(sber.high, 200.0);
        assert_relative_eq!(sber.low, 190.0);
    }

    #[tokio::test]
    async fn test_nested_candles_match_direct_aggregation() {
        let (builder, sinks) = three_stage();
        let pipeline = builder.build().unwrap();

        let prices = ticks("NVDA", 20);
        pipeline
            .spawn(stream::iter(prices.clone()))
            .join(TIMEOUT)
            .await
            .unwrap();

        let ten = sinks.m10.candles();
        assert_eq!(ten.len(), 2);
        assert_eq!(sinks.m2.len(), 10);
        assert_eq!(sinks.m1.len(), 20);

        for candle in &ten {
            let window = Granularity::Minute10
                .window(chrono::TimeDelta::minutes(1), candle.timestamp)
                .unwrap();
            let direct: Vec<Price> = prices
                .iter()
                .filter(|p| window.contains(p.timestamp))
                .cloned()
                .collect();
            let expected = reduce(Granularity::Minute10, window.start, &direct).unwrap();
            assert_eq!(*candle, expected);
        }
    }

    #[tokio::test]
    async fn test_replay_is_idempotent() {
        let prices: Vec<Price> = ticks("AAPL", 12)
            .into_iter()
            .zip(ticks("TSLA", 12))
            .flat_map(|(a, b)| [a, b])
            .collect();

        let mut outputs = Vec::new();
        for _ in 0..2 {
            let dir = tempfile::tempdir().unwrap();
            let pipeline = Pipeline::builder()
                .file_sinks(dir.path(), OutputFormat::Csv, true)
                .await
                .unwrap()
                .build()
                .unwrap();
            pipeline
                .spawn(stream::iter(prices.clone()))
                .join(TIMEOUT)
                .await
                .unwrap();

            let mut files = Vec::new();
            for granularity in Granularity::all() {
                let path = candela_format::sink_path(dir.path(), *granularity, OutputFormat::Csv);
                files.push(std::fs::read(path).unwrap());
            }
            outputs.push(files);
        }

        assert_eq!(outputs[0], outputs[1]);
        assert!(outputs[0].iter().all(|file| !file.is_empty()));
    }

    #[tokio::test]
    async fn test_cancellation_mid_window_flushes_once() {
        let (builder, sinks) = three_stage();
        let pipeline = builder.build().unwrap();

        let sent = Arc::new(Notify::new());
        let notify = Arc::clone(&sent);
        let source = stream::iter(vec![
            Price::new("AAPL", 10.0, at(0, 1)),
            Price::new("AAPL", 12.0, at(0, 2)),
            Price::new("SBER", 5.0, at(0, 3)),
        ])
        .chain(stream::once(async move {
            notify.notify_one();
            futures::future::pending::<Price>().await
        }));

        let handle = pipeline.spawn(source);
        sent.notified().await;
        let report = handle.shutdown(TIMEOUT).await.unwrap();

        let minute = sinks.m1.candles();
        assert_eq!(minute.len(), 2);
        assert_eq!(minute[0].ticker, "AAPL");
        assert_relative_eq!(minute[0].close, 12.0);
        assert_eq!(minute[1].ticker, "SBER");
        assert_eq!(sinks.m2.len(), 2);
        assert_eq!(sinks.m10.len(), 2);

        assert!(report.cancelled);
        assert_eq!(report.ticks, 3);
        assert!(report.stages.iter().all(|s| s.cancelled));
    }

    #[tokio::test]
    async fn test_run_until_natural_end() {
        let (builder, sinks) = three_stage();
        let pipeline = builder.build().unwrap();

        let report = pipeline
            .spawn(stream::iter(ticks("AAPL", 3)))
            .run_until(futures::future::pending(), TIMEOUT)
            .await
            .unwrap();

        assert!(!report.cancelled);
        assert_eq!(report.ticks, 180);
        assert_eq!(sinks.m1.len(), 3);
        assert_eq!(sinks.m2.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_until_stop_drains_endless_source() {
        let (builder, sinks) = three_stage();
        let pipeline = builder.build().unwrap();

        // One tick per second, forever.
        let source = stream::unfold(0u32, |s| async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Some((Price::new("AAPL", f64::from(s % 7), at(s / 60 % 60, s % 60)), s + 1))
        });

        let stop = tokio::time::sleep(Duration::from_secs(150));
        let report = pipeline.spawn(source).run_until(stop, TIMEOUT).await.unwrap();

        assert!(report.cancelled);
        // Two full minutes plus the partial third one.
        assert_eq!(sinks.m1.len(), 3);
        assert_eq!(sinks.m2.len(), 2);
        assert_eq!(sinks.m10.len(), 1);
        assert_eq!(report.stage(Granularity::Minute1).unwrap().observations, report.ticks);
    }

    #[derive(Debug)]
    struct FailingSink;

    #[async_trait]
    impl CandleSink for FailingSink {
        async fn write(&mut self, _candle: &Candle) -> Result<(), SinkError> {
            Err(SinkError::Closed)
        }
    }

    #[tokio::test]
    async fn test_sink_failure_does_not_stop_forwarding() {
        let m2 = MemorySink::new();
        let pipeline = Pipeline::builder()
            .stage(Granularity::Minute1, Box::new(FailingSink))
            .stage(Granularity::Minute2, Box::new(m2.clone()))
            .build()
            .unwrap();

        let report = pipeline
            .spawn(stream::iter(ticks("AAPL", 4)))
            .join(TIMEOUT)
            .await
            .unwrap();

        assert_eq!(m2.len(), 2);
        let minute = report.stage(Granularity::Minute1).unwrap();
        assert_eq!(minute.sink_failures, 4);
        assert_eq!(minute.candles, 4);
        assert_eq!(report.sink_failures(), 4);
    }

    /// Sink whose writes never complete.
    #[derive(Debug)]
    struct StuckSink;

    #[async_trait]
    impl CandleSink for StuckSink {
        async fn write(&mut self, _candle: &Candle) -> Result<(), SinkError> {
            futures::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_times_out_on_stuck_sink() {
        let pipeline = Pipeline::builder()
            .stage(Granularity::Minute1, Box::new(StuckSink))
            .build()
            .unwrap();

        let handle = pipeline.spawn(stream::iter(ticks("AAPL", 2)));
        let result = handle.shutdown(Duration::from_millis(100)).await;

        assert!(matches!(result, Err(PipelineError::ShutdownTimeout(t)) if t == Duration::from_millis(100)));
    }

    /// Sink that counts writes and yields to the scheduler on each one.
    #[derive(Debug, Clone, Default)]
    struct SlowSink {
        writes: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl CandleSink for SlowSink {
        async fn write(&mut self, _candle: &Candle) -> Result<(), SinkError> {
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.writes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_backpressure_loses_nothing() {
        let slow = SlowSink::default();
        let m1 = MemorySink::new();
        let pipeline = Pipeline::builder()
            .channel_capacity(1)
            .stage(Granularity::Minute1, Box::new(m1.clone()))
            .stage(Granularity::Minute2, Box::new(slow.clone()))
            .build()
            .unwrap();

        let report = pipeline
            .spawn(stream::iter(ticks("AAPL", 30)))
            .join(Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(m1.len(), 30);
        assert_eq!(slow.writes.load(Ordering::SeqCst), 15);
        assert_eq!(report.ticks, 1800);
        assert!(report.stages.iter().all(|s| s.forward_failures == 0));
    }

    #[tokio::test]
    async fn test_output_tap_receives_terminal_candles() {
        let (builder, sinks) = three_stage();
        let pipeline = builder.tap_output(true).build().unwrap();

        let mut handle = pipeline.spawn(stream::iter(ticks("AAPL", 20)));
        let mut output = handle.take_output().unwrap();
        assert!(handle.take_output().is_none());

        let mut tapped = Vec::new();
        while let Some(candle) = output.recv().await {
            tapped.push(candle);
        }
        let report = handle.join(TIMEOUT).await.unwrap();

        assert_eq!(tapped, sinks.m10.candles());
        assert_eq!(tapped.len(), 2);
        assert_eq!(report.stage(Granularity::Minute10).unwrap().forward_failures, 0);
    }

    #[tokio::test]
    async fn test_late_policy_applies_to_every_stage() {
        let m1 = MemorySink::new();
        let pipeline = Pipeline::builder()
            .late_policy(LatePolicy::Merge)
            .stage(Granularity::Minute1, Box::new(m1.clone()))
            .build()
            .unwrap();

        let source = stream::iter(vec![
            Price::new("AAPL", 10.0, at(1, 0)),
            Price::new("AAPL", 50.0, at(0, 30)),
        ]);
        let report = pipeline.spawn(source).join(TIMEOUT).await.unwrap();

        let candles = m1.candles();
        assert_eq!(candles.len(), 1);
        assert_relative_eq!(candles[0].high, 50.0);
        assert_eq!(report.stages[0].late_merged, 1);
    }

    #[test]
    fn test_builder_rejects_invalid_chains() {
        assert!(Pipeline::builder().build().is_err());

        let reversed = Pipeline::builder()
            .stage(Granularity::Minute10, Box::new(MemorySink::new()))
            .stage(Granularity::Minute2, Box::new(MemorySink::new()))
            .build();
        assert!(matches!(reversed, Err(PipelineError::Config(_))));

        let zero_capacity = Pipeline::builder()
            .channel_capacity(0)
            .stage(Granularity::Minute1, Box::new(MemorySink::new()))
            .build();
        assert!(zero_capacity.is_err());

        let zero_unit = Pipeline::builder()
            .unit(TimeDelta::zero())
            .stage(Granularity::Minute1, Box::new(MemorySink::new()))
            .build();
        assert!(zero_unit.is_err());
    }

    #[test]
    fn test_builder_custom_unit() {
        let pipeline = Pipeline::builder()
            .unit(TimeDelta::seconds(1))
            .stage(Granularity::Minute2, Box::new(MemorySink::new()))
            .stage(Granularity::Minute10, Box::new(MemorySink::new()))
            .build()
            .unwrap();

        assert_eq!(pipeline.granularities(), [Granularity::Minute2, Granularity::Minute10]);
        assert_eq!(pipeline.config.unit().unwrap(), TimeDelta::seconds(1));
        assert_eq!(pipeline.config.drain_grace(), crate::DEFAULT_DRAIN_GRACE);
    }

    #[test]
    fn test_builder_rejects_unit_too_large_for_chain() {
        let result = Pipeline::builder()
            .unit(TimeDelta::milliseconds(2_000_000_000_000_000_000))
            .stage(Granularity::Minute1, Box::new(MemorySink::new()))
            .stage(Granularity::Minute10, Box::new(MemorySink::new()))
            .build();

        assert!(matches!(result, Err(PipelineError::Config(_))));
    }

    /// Sink that persists its first candle and then never completes a write.
    #[derive(Debug)]
    struct HangsAfterFirstSink {
        written: usize,
        hung: Arc<Notify>,
    }

    #[async_trait]
    impl CandleSink for HangsAfterFirstSink {
        async fn write(&mut self, _candle: &Candle) -> Result<(), SinkError> {
            if self.written == 0 {
                self.written += 1;
                return Ok(());
            }
            self.hung.notify_one();
            futures::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_drains_stage_behind_stuck_upstream() {
        let hung = Arc::new(Notify::new());
        let m2 = MemorySink::new();
        let pipeline = Pipeline::builder()
            .stage(
                Granularity::Minute1,
                Box::new(HangsAfterFirstSink {
                    written: 0,
                    hung: Arc::clone(&hung),
                }),
            )
            .stage(Granularity::Minute2, Box::new(m2.clone()))
            .build()
            .unwrap();

        let handle = pipeline.spawn(stream::iter(ticks("AAPL", 3)));
        hung.notified().await;
        let result = handle.shutdown(Duration::from_millis(100)).await;

        // The 1m stage never closes, but the 2m stage still flushes the
        // candle it was forwarded before the deadline.
        assert!(matches!(result, Err(PipelineError::ShutdownTimeout(_))));
        let two = m2.candles();
        assert_eq!(two.len(), 1);
        assert_eq!(two[0].timestamp, at(0, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_grace_bounds_wait_on_live_upstream() {
        let hung = Arc::new(Notify::new());
        let m2 = MemorySink::new();
        let pipeline = Pipeline::builder()
            .drain_grace(Duration::from_millis(10))
            .stage(
                Granularity::Minute1,
                Box::new(HangsAfterFirstSink {
                    written: 0,
                    hung: Arc::clone(&hung),
                }),
            )
            .stage(Granularity::Minute2, Box::new(m2.clone()))
            .build()
            .unwrap();

        let handle = pipeline.spawn(stream::iter(ticks("AAPL", 3)));
        hung.notified().await;
        handle.cancel();
        tokio::time::sleep(Duration::from_millis(20)).await;

        // The grace alone lets the 2m stage flush, before any join.
        assert_eq!(m2.len(), 1);
    }

    #[tokio::test]
    async fn test_source_panic_is_reported_after_stages_close() {
        let (builder, sinks) = three_stage();
        let pipeline = builder.build().unwrap();

        let source = stream::iter(ticks("AAPL", 2)).chain(stream::poll_fn(
            |_| -> std::task::Poll<Option<Price>> { panic!("price feed crashed") },
        ));
        let result = pipeline.spawn(source).join(TIMEOUT).await;

        assert!(matches!(result, Err(PipelineError::Join(ref e)) if e.is_panic()));
        // The stages saw their input close and flushed everything they had.
        assert_eq!(sinks.m1.len(), 2);
        assert_eq!(sinks.m2.len(), 1);
        assert_eq!(sinks.m10.len(), 1);
    }
}
