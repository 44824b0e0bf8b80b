//! CSV candle sink.

use async_trait::async_trait;
use candela_aggregate::Candle;
use csv_async::{AsyncWriter, AsyncWriterBuilder};
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};

use crate::{CandleSink, SinkError};

/// Column names, in record order.
pub const CSV_HEADER: [&str; 6] = ["ticker", "timestamp", "open", "high", "low", "close"];

/// Appends candles to a CSV file, one flushed record per candle.
pub struct CsvSink {
    writer: Option<AsyncWriter<File>>,
    path: PathBuf,
}

impl CsvSink {
    /// Opens `path` for appending, creating it if missing.
    ///
    /// When `include_header` is set the header row is written, but only if
    /// the file is empty, so restarting onto an existing file never repeats it.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or the header written.
    pub async fn append(path: impl AsRef<Path>, include_header: bool) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        let is_empty = file.metadata().await?.len() == 0;

        let mut writer = AsyncWriterBuilder::new()
            .has_headers(false)
            .create_writer(file);

        if include_header && is_empty {
            writer.write_record(&CSV_HEADER).await?;
            writer.flush().await?;
        }

        Ok(Self {
            writer: Some(writer),
            path,
        })
    }

    /// Returns the file path being written.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for CsvSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CsvSink")
            .field("path", &self.path)
            .field("closed", &self.writer.is_none())
            .finish()
    }
}

/// Formats a candle as a CSV record.
fn candle_record(candle: &Candle) -> [String; 6] {
    [
        candle.ticker.clone(),
        candle.timestamp.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
        candle.open.to_string(),
        candle.high.to_string(),
        candle.low.to_string(),
        candle.close.to_string(),
    ]
}

#[async_trait]
impl CandleSink for CsvSink {
    async fn write(&mut self, candle: &Candle) -> Result<(), SinkError> {
        let writer = self.writer.as_mut().ok_or(SinkError::Closed)?;
        writer.write_record(&candle_record(candle)).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SinkError> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush().await?;
        }
        Ok(())
    }
}
