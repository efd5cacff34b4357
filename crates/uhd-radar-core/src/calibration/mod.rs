//! Pipeline delay self-calibration
//!
//! - [`matched_filter`]: correlation of a capture against a known pulse
//! - [`engine`]: per-sample-rate probe sweep
//! - [`store`]: persisted delay table

pub mod engine;
pub mod matched_filter;
pub mod store;
