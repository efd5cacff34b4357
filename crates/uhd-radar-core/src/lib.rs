//! uhd-radar core - duplex pulse streaming and delay self-calibration
//!
//! This library drives a software-defined radio as a pulsed radar: it transmits
//! a timed train of linear-FM pulses while capturing the returned samples, and
//! it measures the fixed transmit-to-receive pipeline delay of the device so
//! every capture can be trimmed to line up with the transmitted timeline.
//!
//! Both directions are scheduled against the device's own clock rather than
//! host timers, so the only unexplained skew between the two timelines is the
//! hardware latency that [`calibration`] estimates.

pub mod calibration;
pub mod config;
pub mod error;
pub mod pulse;
pub mod radio;

pub use calibration::engine::DelayCalibrationEngine;
pub use calibration::store::{CalibrationKey, CalibrationRecord, CalibrationStore};
pub use config::RadarConfig;
pub use error::{RadarError, RadarResult};
pub use pulse::acquire::{Acquisition, PulseAcquisition};
pub use pulse::cancel::CancellationToken;
pub use pulse::duplex::{DuplexCoordinator, DuplexReport};
pub use pulse::receive::{CaptureBuffer, ReceiveCollector};
pub use pulse::transmit::{StartTime, TransmitScheduler};
pub use pulse::waveform::{LinearFmWaveform, PrfSchedule};
pub use radio::loopback::{LoopbackConfig, LoopbackRadio};
pub use radio::session::StreamSession;
pub use radio::{RadioDevice, RxStreamer, TxStreamer};

/// Library version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build date, set by build.rs
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Guard margin added to transfer timeouts, in seconds
pub const GUARD_MARGIN_SECS: f64 = 0.1;

/// Timeout for receive transfers after the first one, in seconds
pub const STEADY_STATE_TIMEOUT_SECS: f64 = 0.1;

/// Default lead time between reading the device clock and the first burst
pub const DEFAULT_START_DELAY_SECS: f64 = 0.2;

/// Baseband sample type used on the host side (`fc32`)
pub type Sample = num_complex::Complex32;
