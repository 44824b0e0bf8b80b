//! Error types for candela.

use thiserror::Error;

/// Result type alias for candela operations.
pub type Result<T> = std::result::Result<T, CandelaError>;

/// Errors shared across the candela crates.
#[derive(Error, Debug)]
pub enum CandelaError {
    /// A granularity string or multiple was not recognized.
    #[error(transparent)]
    InvalidGranularity(#[from] InvalidGranularity),

    /// The time unit a granularity is measured in must be positive.
    #[error("Invalid time unit: {0}ms (must be positive)")]
    InvalidUnit(i64),

    /// Invalid configuration value.
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Error returned for an unrecognized granularity.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid granularity '{0}', expected one of: 1m, 2m, 10m")]
pub struct InvalidGranularity(pub String);
