//! Settings file for the candela CLI.
//!
//! Every field has a default, so a settings file only lists what it changes:
//!
//! ```json
//! {
//!   "pipeline": { "unit_ms": 1000, "late_policy": "merge" },
//!   "generator": { "tickers": ["AAPL", "MSFT"], "delay_ms": 250 },
//!   "output": { "dir": "candles", "format": "ndjson" }
//! }
//! ```

use anyhow::{Context, Result};
use candela_lib::{GeneratorConfig, OutputFormat, PipelineConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Complete CLI settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct Settings {
    pub(crate) pipeline: PipelineConfig,
    pub(crate) generator: GeneratorSettings,
    pub(crate) output: OutputSettings,
}

impl Settings {
    /// Reads settings from a JSON file.
    pub(crate) fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Invalid settings file {}", path.display()))
    }
}

/// Synthetic price generator settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct GeneratorSettings {
    pub(crate) tickers: Vec<String>,
    pub(crate) delay_ms: u64,
    pub(crate) factor: f64,
    pub(crate) seed: Option<u64>,
}

impl Default for GeneratorSettings {
    fn default() -> Self {
        let defaults = GeneratorConfig::default();
        Self {
            tickers: defaults.tickers,
            delay_ms: defaults.delay.as_millis() as u64,
            factor: defaults.factor,
            seed: defaults.seed,
        }
    }
}

impl GeneratorSettings {
    pub(crate) fn to_config(&self) -> GeneratorConfig {
        GeneratorConfig {
            tickers: self.tickers.clone(),
            delay: Duration::from_millis(self.delay_ms),
            factor: self.factor,
            seed: self.seed,
        }
    }
}

/// Where and how candles are written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct OutputSettings {
    pub(crate) dir: PathBuf,
    pub(crate) format: String,
    pub(crate) header: bool,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("output"),
            format: OutputFormat::Csv.to_string(),
            header: true,
        }
    }
}

impl OutputSettings {
    pub(crate) fn format(&self) -> Result<OutputFormat> {
        self.format
            .parse()
            .with_context(|| format!("Invalid output format: {}", self.format))
    }
}
