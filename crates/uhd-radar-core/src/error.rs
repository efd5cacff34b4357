//! Error taxonomy shared by the streaming and calibration layers
//!
//! A receive timeout is deliberately absent: it ends a capture early and is
//! reported through the returned sample count. Likewise a calibration lookup
//! miss falls back to a zero delay and is only logged.

use crate::radio::{RadioError, RxErrorCode};
use thiserror::Error;

/// Errors surfaced by the radar core
#[derive(Error, Debug)]
pub enum RadarError {
    /// Non-success, non-timeout status from a transfer. Fatal to the operation.
    #[error("device error ({code:?}): {message}")]
    Device { code: RxErrorCode, message: String },

    /// Device contract failure outside the receive status path
    #[error("radio error: {0}")]
    Radio(#[from] RadioError),

    /// Pre-flight check failed before acquisition started
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("invalid waveform: {0}")]
    InvalidWaveform(String),

    /// A calibration probe produced an unusable result
    #[error("calibration failed: {0}")]
    Calibration(String),

    #[error("calibration store I/O error: {0}")]
    StoreIo(#[from] std::io::Error),

    #[error("calibration store format error: {0}")]
    StoreFormat(#[from] serde_json::Error),
}

impl RadarError {
    /// True for errors raised by the device itself rather than by validation
    pub fn is_device_error(&self) -> bool {
        matches!(self, RadarError::Device { .. } | RadarError::Radio(_))
    }
}

pub type RadarResult<T> = Result<T, RadarError>;
