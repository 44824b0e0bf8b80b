//! Pipeline error types.

use candela_format::SinkError;
use candela_types::{CandelaError, InvalidGranularity};
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while building or running a pipeline.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// A stage was configured with an unrecognized granularity.
    #[error(transparent)]
    InvalidGranularity(#[from] InvalidGranularity),

    /// Invalid pipeline configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Error from the core types.
    #[error(transparent)]
    Candela(#[from] CandelaError),

    /// A sink could not be opened.
    #[error(transparent)]
    Sink(#[from] SinkError),

    /// Stages did not finish draining within the allotted time.
    #[error("Pipeline did not drain within {0:?}")]
    ShutdownTimeout(Duration),

    /// A pipeline task panicked or was aborted.
    #[error("Pipeline task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
