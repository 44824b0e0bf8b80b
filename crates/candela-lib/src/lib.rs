//! Streaming OHLC candle aggregation at nested granularities.
//!
//! This is a facade crate that re-exports functionality from the candela
//! workspace crates for convenient access.
//!
//! # Quick Start
//!
//! ```ignore
//! use candela_lib::prelude::*;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let source = PriceGenerator::new(GeneratorConfig::default())?.into_stream();
//!
//!     let handle = Pipeline::builder()
//!         .file_sinks("out".as_ref(), OutputFormat::Csv, true)
//!         .await?
//!         .build()?
//!         .spawn(source);
//!
//!     tokio::signal::ctrl_c().await?;
//!     let report = handle.shutdown(Duration::from_secs(5)).await?;
//!     println!("Aggregated {} ticks", report.ticks);
//!
//!     Ok(())
//! }
//! ```

#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/candela/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

// Re-export core types
pub use candela_types::*;

// Re-export aggregation
pub use candela_aggregate::{
    AggregatorStats, Candle, LatePolicy, Observation, WindowAggregator, reduce,
};

// Re-export sources
#[cfg(feature = "source")]
pub use candela_source::{
    GeneratorConfig, PriceGenerator, SourceError, replay_csv, replay_csv_resilient,
};

// Re-export sinks
#[cfg(feature = "format")]
pub use candela_format::{
    CSV_HEADER, CandleSink, CsvSink, MemorySink, NdjsonSink, OutputFormat, SinkError, open_sink,
    sink_path,
};

// Re-export the pipeline
#[cfg(feature = "pipeline")]
pub use candela_pipeline::{
    CancellationToken, DEFAULT_CHANNEL_CAPACITY, DEFAULT_DRAIN_GRACE, DEFAULT_SHUTDOWN_TIMEOUT,
    Pipeline, PipelineBuilder, PipelineConfig, PipelineError, PipelineHandle, PipelineReport,
    Stage, StageReport,
};

/// Prelude module for convenient imports.
///
/// ```
/// use candela_lib::prelude::*;
/// ```
pub mod prelude {
    pub use candela_types::{
        CandelaError, DEFAULT_UNIT, Granularity, InvalidGranularity, Price, Result, Window,
    };

    pub use candela_aggregate::{Candle, LatePolicy, WindowAggregator};

    #[cfg(feature = "source")]
    pub use candela_source::{GeneratorConfig, PriceGenerator, replay_csv, replay_csv_resilient};

    #[cfg(feature = "format")]
    pub use candela_format::{CandleSink, MemorySink, OutputFormat};

    #[cfg(feature = "pipeline")]
    pub use candela_pipeline::{
        Pipeline, PipelineConfig, PipelineError, PipelineHandle, PipelineReport,
    };
}
