//! NDJSON candle sink.

use async_trait::async_trait;
use candela_aggregate::Candle;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};

use crate::{CandleSink, SinkError};

/// Appends candles to a newline-delimited JSON file, one flushed object per line.
#[derive(Debug)]
pub struct NdjsonSink {
    writer: Option<BufWriter<File>>,
    path: PathBuf,
}

impl NdjsonSink {
    /// Opens `path` for appending, creating it if missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub async fn append(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        Ok(Self {
            writer: Some(BufWriter::new(file)),
            path,
        })
    }

    /// Returns the file path being written.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl CandleSink for NdjsonSink {
    async fn write(&mut self, candle: &Candle) -> Result<(), SinkError> {
        let writer = self.writer.as_mut().ok_or(SinkError::Closed)?;
        let mut line = serde_json::to_vec(candle)?;
        line.push(b'\n');
        writer.write_all(&line).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SinkError> {
        if let Some(mut writer) = self.writer.take() {
            writer.shutdown().await?;
        }
        Ok(())
    }
}
