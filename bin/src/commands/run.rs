//! Run command implementation.
//!
//! Aggregates synthetic prices until interrupted or a run duration elapses.

use super::{build_pipeline, finish, interrupted};
use crate::config::Settings;
use anyhow::{Context, Result};
use candela_lib::prelude::*;
use std::time::Duration;
use tracing::info;

/// Runs the pipeline on generated prices.
pub(crate) async fn run(settings: Settings, duration: Option<Duration>) -> Result<()> {
    let generator =
        PriceGenerator::new(settings.generator.to_config()).context("Invalid generator settings")?;
    let pipeline = build_pipeline(&settings).await?;

    info!(
        tickers = ?generator.config().tickers,
        delay = ?generator.config().delay,
        "generating prices"
    );

    let stop = async move {
        match duration {
            Some(duration) => tokio::select! {
                () = interrupted() => {}
                () = tokio::time::sleep(duration) => info!(?duration, "run duration elapsed"),
            },
            None => interrupted().await,
        }
    };

    let timeout = settings.pipeline.shutdown_timeout();
    finish(
        pipeline
            .spawn(generator.into_stream())
            .run_until(stop, timeout)
            .await,
    )
}
