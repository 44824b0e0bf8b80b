//! Replay command implementation.

use super::{build_pipeline, finish, interrupted};
use crate::config::Settings;
use anyhow::{Context, Result};
use candela_lib::prelude::*;
use std::path::Path;
use tracing::info;

/// Aggregates a recorded tick file, stopping early if interrupted.
pub(crate) async fn replay(settings: Settings, file: &Path) -> Result<()> {
    let source = replay_csv_resilient(file)
        .await
        .with_context(|| format!("Failed to open {}", file.display()))?;
    let pipeline = build_pipeline(&settings).await?;

    info!(file = %file.display(), "replaying recorded ticks");
    let timeout = settings.pipeline.shutdown_timeout();
    finish(pipeline.spawn(source).run_until(interrupted(), timeout).await)
}
