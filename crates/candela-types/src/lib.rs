//! Core types for the candela candle aggregation pipeline.
//!
//! This crate provides the fundamental data structures used throughout candela:
//!
//! - [`Price`] - A single price tick for one ticker
//! - [`Granularity`] - Width of a candle window, as a multiple of a time unit
//! - [`Window`] - Half-open time interval a candle is built over
//! - [`CandelaError`] - Shared error type

#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/candela/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod error;
mod granularity;
mod tick;
mod window;

pub use error::{CandelaError, InvalidGranularity, Result};
pub use granularity::{DEFAULT_UNIT, Granularity};
pub use tick::Price;
pub use window::Window;
