//! Windowed OHLC aggregation for the candela candle pipeline.
//!
//! This crate provides the synchronous core of candle building:
//!
//! - [`Candle`] - OHLC summary of one ticker over one window
//! - [`Observation`] - Anything that can be folded into a candle
//! - [`reduce`] - Folds one ticker's window into a candle
//! - [`WindowAggregator`] - Per-ticker window state machine

#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/candela/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod aggregator;
mod candle;
mod observation;
mod reduce;

pub use aggregator::{AggregatorStats, LatePolicy, WindowAggregator};
pub use candle::Candle;
pub use observation::Observation;
pub use reduce::reduce;
