//! Radar configuration
//!
//! Stored as JSON at `<config_dir>/uhd-radar/config.json`. Every field has a
//! default, so a partial file only overrides what it names.

use crate::calibration::engine::CalibrationSettings;
use crate::calibration::store::CalibrationStore;
use crate::error::RadarResult;
use crate::pulse::duplex::DuplexCoordinator;
use crate::pulse::waveform::{LinearFmWaveform, PrfSchedule};
use crate::radio::StreamArgs;
use crate::{DEFAULT_START_DELAY_SECS, GUARD_MARGIN_SECS, STEADY_STATE_TIMEOUT_SECS};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// RF front-end settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RadioSettings {
    /// Sample rate for both directions in Hz
    pub sample_rate: f64,
    /// Transmit center frequency in Hz
    pub tx_freq: f64,
    /// Receive center frequency in Hz
    pub rx_freq: f64,
    /// Transmit gain in dB
    pub tx_gain: f64,
    /// Receive gain in dB
    pub rx_gain: f64,
    /// Wait after tuning before checking LO lock, in seconds
    pub settle_secs: f64,
}

impl Default for RadioSettings {
    fn default() -> Self {
        Self {
            sample_rate: 20e6,
            tx_freq: 5e9,
            rx_freq: 5e9,
            tx_gain: 50.0,
            rx_gain: 50.0,
            settle_secs: 1.0,
        }
    }
}

/// Host and wire sample formats plus the channel set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamSettings {
    pub cpu_format: String,
    pub otw_format: String,
    pub channels: Vec<usize>,
}

impl Default for StreamSettings {
    fn default() -> Self {
        let args = StreamArgs::default();
        Self {
            cpu_format: args.cpu_format,
            otw_format: args.otw_format,
            channels: args.channels,
        }
    }
}

/// Pulse train used for captures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaveformSettings {
    /// Swept bandwidth in Hz
    pub bandwidth: f64,
    /// Pulse width in seconds
    pub pulse_width: f64,
    /// PRF schedule in Hz, cycled across pulses
    pub prf: Vec<f64>,
    /// Pulses per capture, 0 = until stopped
    pub pulse_count: usize,
}

impl Default for WaveformSettings {
    fn default() -> Self {
        Self {
            bandwidth: 20e6,
            pulse_width: 10e-6,
            prf: vec![10e3],
            pulse_count: 10,
        }
    }
}

/// Duplex timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingSettings {
    /// Lead time from reading the device clock to the first pulse, in seconds
    pub start_delay: f64,
    /// Guard margin added to transfer timeouts, in seconds
    pub guard: f64,
    /// Receive timeout after the first packet, in seconds
    pub steady_timeout: f64,
    /// Reset the device clock to zero before every cycle
    pub reset_clock: bool,
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            start_delay: DEFAULT_START_DELAY_SECS,
            guard: GUARD_MARGIN_SECS,
            steady_timeout: STEADY_STATE_TIMEOUT_SECS,
            reset_clock: false,
        }
    }
}

/// Complete radar configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RadarConfig {
    /// Device args, e.g. `type=loopback,serial=315EED9`
    pub device_args: String,
    pub radio: RadioSettings,
    pub stream: StreamSettings,
    pub waveform: WaveformSettings,
    pub timing: TimingSettings,
    pub calibration: CalibrationSettings,
    /// Calibration table location (None = per-user default)
    pub store_path: Option<PathBuf>,
}

impl RadarConfig {
    /// Config file path: `<config_dir>/uhd-radar/config.json`
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("uhd-radar")
            .join("config.json")
    }

    /// Parse the config at `path`
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Self = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        tracing::info!(path = %path.display(), "Loaded config from disk");
        Ok(config)
    }

    /// Load config from disk, falling back to defaults on any error
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Using default config");
                Self::default()
            }
        }
    }

    /// Save config to disk, creating parent directories if needed
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        tracing::info!(path = %path.display(), "Config saved to disk");
        Ok(())
    }

    pub fn stream_args(&self) -> StreamArgs {
        StreamArgs {
            cpu_format: self.stream.cpu_format.clone(),
            otw_format: self.stream.otw_format.clone(),
            channels: self.stream.channels.clone(),
        }
    }

    /// Capture waveform at the configured sample rate
    pub fn waveform(&self) -> RadarResult<LinearFmWaveform> {
        self.waveform_at(self.radio.sample_rate)
    }

    /// Capture waveform at `sample_rate`, typically the rate read back from the radio
    pub fn waveform_at(&self, sample_rate: f64) -> RadarResult<LinearFmWaveform> {
        LinearFmWaveform::new(
            self.waveform.bandwidth,
            self.waveform.pulse_width,
            sample_rate,
            PrfSchedule::new(self.waveform.prf.clone())?,
        )
    }

    pub fn coordinator(&self) -> DuplexCoordinator {
        DuplexCoordinator::new()
            .with_reset_clock(self.timing.reset_clock)
            .with_safety_margin(self.timing.start_delay)
            .with_timeouts(self.timing.guard, self.timing.steady_timeout)
    }

    pub fn store_path(&self) -> PathBuf {
        self.store_path
            .clone()
            .unwrap_or_else(CalibrationStore::default_path)
    }
}
