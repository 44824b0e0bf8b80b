//! Candle sink abstraction.

use async_trait::async_trait;
use candela_aggregate::Candle;
use candela_types::Granularity;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::{CsvSink, NdjsonSink};

/// Output format identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OutputFormat {
    /// CSV format.
    #[default]
    Csv,
    /// Newline-delimited JSON format.
    Ndjson,
}

impl OutputFormat {
    /// Returns the file extension for this format.
    #[must_use]
    pub const fn extension(&self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Ndjson => "ndjson",
        }
    }

    /// Returns all available formats.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::Csv, Self::Ndjson]
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.extension())
    }
}

impl std::str::FromStr for OutputFormat {
    type Err = SinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "ndjson" | "jsonl" => Ok(Self::Ndjson),
            _ => Err(SinkError::UnknownFormat(s.to_string())),
        }
    }
}

/// Errors that can occur while persisting candles.
#[derive(Error, Debug)]
pub enum SinkError {
    /// Unknown output format.
    #[error("Unknown format: {0}")]
    UnknownFormat(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV serialization error.
    #[error("CSV error: {0}")]
    Csv(#[from] csv_async::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The sink was written to after being closed.
    #[error("Sink is closed")]
    Closed,
}

/// Append-only destination for candles of one granularity.
///
/// A sink is owned by exactly one stage and never shared, so
/// implementations need no internal locking.
#[async_trait]
pub trait CandleSink: Send + std::fmt::Debug {
    /// Appends one candle and flushes it.
    ///
    /// # Errors
    ///
    /// Returns an error if the record could not be written or flushed.
    async fn write(&mut self, candle: &Candle) -> Result<(), SinkError>;

    /// Flushes and releases the underlying destination.
    ///
    /// # Errors
    ///
    /// Returns an error if the final flush fails.
    async fn close(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

#[async_trait]
impl<S: CandleSink + ?Sized> CandleSink for Box<S> {
    async fn write(&mut self, candle: &Candle) -> Result<(), SinkError> {
        (**self).write(candle).await
    }

    async fn close(&mut self) -> Result<(), SinkError> {
        (**self).close().await
    }
}

/// Returns the file path candles of `granularity` are written to.
#[must_use]
pub fn sink_path(dir: &Path, granularity: Granularity, format: OutputFormat) -> PathBuf {
    dir.join(format!("candles_{}.{}", granularity, format.extension()))
}

/// Opens a file sink for `granularity` inside `dir`, appending to any
/// existing file.
///
/// # Errors
///
/// Returns an error if the directory or file cannot be opened.
pub async fn open_sink(
    dir: &Path,
    granularity: Granularity,
    format: OutputFormat,
    include_header: bool,
) -> Result<Box<dyn CandleSink>, SinkError> {
    tokio::fs::create_dir_all(dir).await?;
    let path = sink_path(dir, granularity, format);

    let sink: Box<dyn CandleSink> = match format {
        OutputFormat::Csv => Box::new(CsvSink::append(&path, include_header).await?),
        OutputFormat::Ndjson => Box::new(NdjsonSink::append(&path).await?),
    };

    Ok(sink)
}
