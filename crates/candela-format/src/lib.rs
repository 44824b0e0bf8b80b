//! Append-only candle sinks for the candela candle pipeline.
//!
//! This crate provides destinations for emitted candles:
//!
//! - [`CandleSink`] - Async append-only sink trait
//! - [`CsvSink`] - CSV file, one flushed record per candle
//! - [`NdjsonSink`] - Newline-delimited JSON file
//! - [`MemorySink`] - Shared in-memory collector

#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/candela/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod csv;
mod json;
mod memory;
mod sink;

pub use crate::csv::{CSV_HEADER, CsvSink};
pub use json::NdjsonSink;
pub use memory::MemorySink;
pub use sink::{CandleSink, OutputFormat, SinkError, open_sink, sink_path};
