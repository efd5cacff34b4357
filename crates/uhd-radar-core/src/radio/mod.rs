//! Radio hardware contract
//!
//! This module describes what the streaming engine needs from a radio:
//! - Device configuration and sensors ([`RadioDevice`])
//! - The device's absolute clock ([`DeviceClock`])
//! - Timed transmit and receive streams ([`TxStreamer`], [`RxStreamer`])
//!
//! The shapes follow the UHD streaming model: transmit packets carry burst
//! markers and an optional absolute time, while receive is armed by a stream
//! command and reports its status through [`RxMetadata`].
//!
//! [`loopback::LoopbackRadio`] is an in-process implementation that feeds the
//! transmitted bursts back into the receive path after a fixed delay.

pub mod loopback;
pub mod preflight;
pub mod session;

use crate::Sample;
use std::collections::HashMap;
use std::ops::{Add, Sub};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by a radio implementation outside of the receive status path
#[derive(Error, Debug)]
pub enum RadioError {
    #[error("No radio found for args: {0}")]
    DeviceNotFound(String),

    #[error("Invalid device args: {0}")]
    InvalidArgs(String),

    #[error("Unsupported sample format: {0}")]
    UnsupportedFormat(String),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Sensor error: {0}")]
    Sensor(String),
}

/// Absolute time on the device clock, in seconds
#[derive(Debug, Clone, Copy, Default, PartialEq, PartialOrd)]
pub struct TimeSpec(f64);

impl TimeSpec {
    pub const ZERO: TimeSpec = TimeSpec(0.0);

    pub fn from_secs(secs: f64) -> Self {
        Self(secs)
    }

    pub fn secs(self) -> f64 {
        self.0
    }

    /// Index of the sample at this instant for the given rate
    pub fn to_ticks(self, rate: f64) -> i64 {
        (self.0 * rate).round() as i64
    }
}

impl Add<f64> for TimeSpec {
    type Output = TimeSpec;

    fn add(self, secs: f64) -> TimeSpec {
        TimeSpec(self.0 + secs)
    }
}

impl Sub for TimeSpec {
    type Output = f64;

    fn sub(self, other: TimeSpec) -> f64 {
        self.0 - other.0
    }
}

/// Metadata attached to one transmit packet
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TxMetadata {
    /// First packet of a burst
    pub start_of_burst: bool,
    /// Last packet of a burst
    pub end_of_burst: bool,
    /// Whether `time_spec` should be honoured
    pub has_time_spec: bool,
    /// Absolute device time of the first sample in this packet
    pub time_spec: TimeSpec,
}

impl TxMetadata {
    /// Metadata for the first packet of a burst scheduled at `time`
    pub fn burst_start(time: TimeSpec) -> Self {
        Self {
            start_of_burst: true,
            end_of_burst: false,
            has_time_spec: true,
            time_spec: time,
        }
    }

    /// Metadata for a continuation packet within an open burst
    pub fn continuation() -> Self {
        Self::default()
    }

    /// Metadata for the empty packet that closes a burst
    pub fn burst_end() -> Self {
        Self {
            end_of_burst: true,
            ..Self::default()
        }
    }
}

/// Receive status codes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RxErrorCode {
    #[default]
    None,
    /// No packet arrived within the timeout
    Timeout,
    /// A timed stream command arrived after its start time
    LateCommand,
    /// Expected another stream command
    BrokenChain,
    /// Host did not read fast enough and samples were dropped
    Overflow,
    /// Multi-channel alignment failed
    Alignment,
    /// Packet could not be parsed
    BadPacket,
}

/// Metadata filled in by every receive call
#[derive(Debug, Clone, Default)]
pub struct RxMetadata {
    pub error_code: RxErrorCode,
    /// Device-supplied description of `error_code`
    pub error_string: String,
    /// Device time of the first sample in the returned packet, if any
    pub time_spec: Option<TimeSpec>,
}

impl RxMetadata {
    pub fn reset(&mut self) {
        self.error_code = RxErrorCode::None;
        self.error_string.clear();
        self.time_spec = None;
    }

    pub fn set_error(&mut self, code: RxErrorCode, message: impl Into<String>) {
        self.error_code = code;
        self.error_string = message.into();
    }
}

/// Receive streaming mode requested by a stream command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
    /// Deliver exactly `n` samples and stop
    NumSampsAndDone(usize),
    StartContinuous,
    StopContinuous,
}

/// Command that arms or stops the receive stream
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamCommand {
    pub mode: StreamMode,
    /// Start immediately instead of at `time_spec`
    pub stream_now: bool,
    pub time_spec: TimeSpec,
}

impl StreamCommand {
    /// Command that starts `mode` at an absolute device time
    pub fn timed(mode: StreamMode, time_spec: TimeSpec) -> Self {
        Self {
            mode,
            stream_now: false,
            time_spec,
        }
    }

    pub fn stop() -> Self {
        Self {
            mode: StreamMode::StopContinuous,
            stream_now: true,
            time_spec: TimeSpec::ZERO,
        }
    }
}

/// Stream construction arguments: host format, wire format and channel set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamArgs {
    /// Host-side sample format (only `fc32` is supported)
    pub cpu_format: String,
    /// Over-the-wire sample format
    pub otw_format: String,
    pub channels: Vec<usize>,
}

impl Default for StreamArgs {
    fn default() -> Self {
        Self {
            cpu_format: "fc32".to_string(),
            otw_format: "sc16".to_string(),
            channels: vec![0],
        }
    }
}

/// A named sensor reading
#[derive(Debug, Clone, PartialEq)]
pub struct SensorValue {
    pub name: String,
    pub value: String,
    pub unit: String,
}

impl SensorValue {
    pub fn boolean(name: &str, value: bool) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
            unit: if value { "locked" } else { "unlocked" }.to_string(),
        }
    }

    pub fn to_bool(&self) -> bool {
        matches!(self.value.as_str(), "true" | "1")
    }

    /// Human readable form, e.g. `LO: locked`
    pub fn to_pp_string(&self) -> String {
        format!("{}: {}", self.name, self.unit)
    }
}

/// Access to the device's absolute time counter
pub trait DeviceClock: Send + Sync {
    fn time_now(&self) -> TimeSpec;

    fn set_time_now(&self, time: TimeSpec);
}

/// Streaming interface for the transmit direction
pub trait TxStreamer: Send {
    /// Send one packet; every slice in `buffers` belongs to one channel.
    ///
    /// Returns the number of samples per channel accepted before `timeout`.
    fn send(
        &mut self,
        buffers: &[&[Sample]],
        metadata: &TxMetadata,
        timeout: Duration,
    ) -> Result<usize, RadioError>;
}

/// Streaming interface for the receive direction
pub trait RxStreamer: Send {
    /// Largest number of samples a single `recv` call returns
    fn max_num_samps(&self) -> usize;

    /// Arm or stop streaming
    fn issue_stream_cmd(&mut self, command: &StreamCommand) -> Result<(), RadioError>;

    /// Receive into per-channel buffers, writing status into `metadata`.
    ///
    /// Returns the number of samples per channel written.
    fn recv(
        &mut self,
        buffers: &mut [&mut [Sample]],
        metadata: &mut RxMetadata,
        timeout: Duration,
    ) -> usize;
}

/// Configuration, sensor and stream factory interface of a radio
pub trait RadioDevice: DeviceClock {
    /// Radio identity string used to key calibration records
    fn identity(&self) -> String;

    fn set_tx_rate(&self, rate: f64);
    fn tx_rate(&self) -> f64;
    fn set_rx_rate(&self, rate: f64);
    fn rx_rate(&self) -> f64;

    /// Master clock rate currently selected for the configured sample rates
    fn master_clock_rate(&self) -> f64;

    fn set_tx_freq(&self, freq: f64);
    fn tx_freq(&self) -> f64;
    fn set_rx_freq(&self, freq: f64);
    fn rx_freq(&self) -> f64;

    fn set_tx_gain(&self, gain: f64);
    fn tx_gain(&self) -> f64;
    fn set_rx_gain(&self, gain: f64);
    fn rx_gain(&self) -> f64;

    fn tx_sensor_names(&self, channel: usize) -> Vec<String>;
    fn tx_sensor(&self, name: &str, channel: usize) -> Result<SensorValue, RadioError>;
    fn rx_sensor_names(&self, channel: usize) -> Vec<String>;
    fn rx_sensor(&self, name: &str, channel: usize) -> Result<SensorValue, RadioError>;

    fn tx_stream(&self, args: &StreamArgs) -> Result<Box<dyn TxStreamer>, RadioError>;
    fn rx_stream(&self, args: &StreamArgs) -> Result<Box<dyn RxStreamer>, RadioError>;
}

/// Parse `key=value,key=value` device args
pub fn parse_device_args(args: &str) -> Result<HashMap<String, String>, RadioError> {
    let mut parsed = HashMap::new();
    for pair in args.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| RadioError::InvalidArgs(format!("expected key=value, got '{pair}'")))?;
        parsed.insert(key.trim().to_string(), value.trim().to_string());
    }
    Ok(parsed)
}

/// Open a radio from device args.
///
/// `type=loopback` (optionally with `delay=<samples>`, `serial=<id>`) opens the
/// in-process loopback radio. Empty args default to the loopback radio.
pub fn open(args: &str) -> Result<Arc<dyn RadioDevice>, RadioError> {
    let parsed = parse_device_args(args)?;
    match parsed.get("type").map(String::as_str).unwrap_or("loopback") {
        "loopback" => {
            let mut config = loopback::LoopbackConfig::default();
            if let Some(delay) = parsed.get("delay") {
                config.pipeline_delay = delay
                    .parse()
                    .map_err(|_| RadioError::InvalidArgs(format!("bad delay '{delay}'")))?;
            }
            if let Some(serial) = parsed.get("serial") {
                config.serial = serial.clone();
            }
            tracing::info!(args, "Opening loopback radio");
            Ok(Arc::new(loopback::LoopbackRadio::new(config)))
        }
        other => Err(RadioError::DeviceNotFound(format!("type={other}"))),
    }
}
