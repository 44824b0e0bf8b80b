//! In-memory candle sink.

use async_trait::async_trait;
use candela_aggregate::Candle;
use std::sync::{Arc, Mutex, PoisonError};

use crate::{CandleSink, SinkError};

/// Collects candles in memory.
///
/// Clones share the same buffer, so a caller can keep one handle and give
/// another to a pipeline stage.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    candles: Arc<Mutex<Vec<Candle>>>,
}

impl MemorySink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of everything written so far.
    #[must_use]
    pub fn candles(&self) -> Vec<Candle> {
        self.candles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns the number of candles written so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.candles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns true if nothing has been written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CandleSink for MemorySink {
    async fn write(&mut self, candle: &Candle) -> Result<(), SinkError> {
        self.candles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(candle.clone());
        Ok(())
    }
}
