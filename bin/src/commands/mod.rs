//! CLI command implementations.

pub(crate) mod replay;
pub(crate) mod run;

use crate::config::Settings;
use anyhow::{Context, Result};
use candela_lib::{Pipeline, PipelineError, PipelineReport};
use tracing::{info, warn};

/// Builds a pipeline writing one file per configured granularity.
pub(crate) async fn build_pipeline(settings: &Settings) -> Result<Pipeline> {
    let format = settings.output.format()?;
    let dir = &settings.output.dir;

    let pipeline = Pipeline::builder()
        .config(settings.pipeline.clone())
        .file_sinks(dir, format, settings.output.header)
        .await
        .with_context(|| format!("Failed to open candle files in {}", dir.display()))?
        .build()
        .context("Invalid pipeline settings")?;

    info!(dir = %dir.display(), %format, "writing candles");
    Ok(pipeline)
}

/// Resolves once the process is interrupted.
pub(crate) async fn interrupted() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("interrupt received"),
        Err(e) => {
            warn!(error = %e, "cannot listen for interrupts");
            std::future::pending::<()>().await;
        }
    }
}

/// Logs the outcome of a pipeline run.
///
/// A shutdown timeout is reported but is not a failure of the command.
pub(crate) fn finish(result: Result<PipelineReport, PipelineError>) -> Result<()> {
    match result {
        Ok(report) => {
            for stage in &report.stages {
                info!(
                    granularity = %stage.granularity,
                    observations = stage.observations,
                    candles = stage.candles,
                    late_dropped = stage.late_dropped,
                    sink_failures = stage.sink_failures,
                    "stage summary"
                );
            }
            info!(ticks = report.ticks, "shutdown complete");
            Ok(())
        }
        Err(PipelineError::ShutdownTimeout(timeout)) => {
            warn!(?timeout, "shutdown timed out, recent candles may be missing");
            Ok(())
        }
        Err(e) => Err(e).context("Pipeline failed"),
    }
}
