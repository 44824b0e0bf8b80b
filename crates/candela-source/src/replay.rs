//! Replay of recorded ticks from CSV.

use candela_types::Price;
use chrono::{DateTime, Utc};
use csv_async::{AsyncReaderBuilder, StringRecord, Trim};
use futures::stream::{Stream, StreamExt};
use std::path::Path;
use tracing::warn;

use crate::SourceError;

/// Parses one `ticker,timestamp,value` record.
fn parse_record(record: &StringRecord) -> Result<Price, SourceError> {
    let line = record.position().map_or(0, csv_async::Position::line);
    let field = |idx: usize, name: &str| {
        record
            .get(idx)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| SourceError::Parse {
                line,
                message: format!("missing {name}"),
            })
    };

    let ticker = field(0, "ticker")?;
    let timestamp = DateTime::parse_from_rfc3339(field(1, "timestamp")?)
        .map_err(|e| SourceError::Parse {
            line,
            message: format!("invalid timestamp: {e}"),
        })?
        .with_timezone(&Utc);
    let value: f64 = field(2, "value")?.parse().map_err(|e| SourceError::Parse {
        line,
        message: format!("invalid value: {e}"),
    })?;

    Ok(Price::new(ticker, value, timestamp))
}

/// Opens a recorded tick file and streams its prices in file order.
///
/// The file must have a header row followed by `ticker,timestamp,value`
/// records with RFC 3339 timestamps.
///
/// # Errors
///
/// Returns an error if the file cannot be opened. Malformed records are
/// yielded as errors in the stream.
pub async fn replay_csv(
    path: impl AsRef<Path>,
) -> Result<impl Stream<Item = Result<Price, SourceError>> + Send + 'static, SourceError> {
    let file = tokio::fs::File::open(path.as_ref()).await?;
    let reader = AsyncReaderBuilder::new()
        .has_headers(true)
        .trim(Trim::All)
        .create_reader(file);

    Ok(reader.into_records().map(|result| {
        let record = result?;
        parse_record(&record)
    }))
}

/// Like [`replay_csv`], but skips malformed records instead of yielding errors.
///
/// Skipped records are logged at `warn`.
///
/// # Errors
///
/// Returns an error if the file cannot be opened.
pub async fn replay_csv_resilient(
    path: impl AsRef<Path>,
) -> Result<impl Stream<Item = Price> + Send + 'static, SourceError> {
    let stream = replay_csv(path).await?;
    Ok(stream.filter_map(|result| async move {
        match result {
            Ok(price) => Some(price),
            Err(e) => {
                warn!(error = %e, "skipping recorded tick");
                None
            }
        }
    }))
}
