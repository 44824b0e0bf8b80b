//! Concurrent multi-stage candle aggregation.
//!
//! This crate runs the aggregation chain:
//!
//! - [`Stage`] - One aggregation worker with its sink
//! - [`Pipeline`] - Wires stages together with bounded queues
//! - [`PipelineHandle`] - Cancel, tap and join a running pipeline
//! - [`PipelineConfig`] - Serializable pipeline settings

#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/candela/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod config;
mod error;
mod pipeline;
mod stage;

pub use config::{
    DEFAULT_CHANNEL_CAPACITY, DEFAULT_DRAIN_GRACE, DEFAULT_SHUTDOWN_TIMEOUT, PipelineConfig,
};
pub use error::PipelineError;
pub use pipeline::{Pipeline, PipelineBuilder, PipelineHandle, PipelineReport};
pub use stage::{Stage, StageReport};
pub use tokio_util::sync::CancellationToken;
