//! Pulse streaming engine
//!
//! - [`waveform`]: linear-FM pulse generation and PRF schedules
//! - [`transmit`]: timed burst transmission
//! - [`receive`]: timed capture into a [`receive::CaptureBuffer`]
//! - [`duplex`]: transmit and receive run concurrently against one device-clock instant
//! - [`acquire`]: delay-compensated captures using the calibration store

pub mod acquire;
pub mod cancel;
pub mod duplex;
pub mod receive;
pub mod transmit;
pub mod waveform;

use std::time::Duration;

/// Duration from fractional seconds, clamping negative values to zero
pub(crate) fn secs(value: f64) -> Duration {
    Duration::from_secs_f64(value.max(0.0))
}
