//! Price tick sources for the candela candle pipeline.
//!
//! This crate provides the tick streams a pipeline consumes:
//!
//! - [`PriceGenerator`] - Synthetic random-walk prices at a fixed cadence
//! - [`replay_csv`] - Recorded ticks replayed from CSV
//! - [`replay_csv_resilient`] - Replay that skips malformed records

#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/candela/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod generator;
mod replay;

pub use generator::{GeneratorConfig, PriceGenerator};
pub use replay::{replay_csv, replay_csv_resilient};

use thiserror::Error;

/// Errors that can occur while producing ticks.
#[derive(Error, Debug)]
pub enum SourceError {
    /// Invalid source configuration.
    #[error("Invalid source configuration: {0}")]
    InvalidConfig(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV read error.
    #[error("CSV error: {0}")]
    Csv(#[from] csv_async::Error),

    /// A recorded tick could not be parsed.
    #[error("Parse error at line {line}: {message}")]
    Parse {
        /// Line number of the record.
        line: u64,
        /// What was wrong with the record.
        message: String,
    },
}
