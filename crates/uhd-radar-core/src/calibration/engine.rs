//! Delay calibration sweep
//!
//! For every candidate sample rate the engine reconfigures the radio, sends
//! one linear-FM probe pulse while capturing exactly one pulse length of
//! samples, and locates the pulse in the capture with a matched filter. The
//! offset of the correlation peak is the pipeline delay at that rate.
//!
//! ## States
//!
//! `PendingRate → Configuring → Probing → Correlating → RecordUpdated`
//! repeats per rate, then `Persisted → Done` once the table is written.
//!
//! ## Failures
//!
//! Device errors abort the sweep and nothing is written. A probe that comes
//! back short or yields a negative delay follows [`SweepFailurePolicy`].

use super::matched_filter::estimate_delay;
use super::store::{CalibrationKey, CalibrationStore};
use crate::error::{RadarError, RadarResult};
use crate::pulse::cancel::CancellationToken;
use crate::pulse::duplex::DuplexCoordinator;
use crate::pulse::receive::CaptureBuffer;
use crate::pulse::waveform::{LinearFmWaveform, PrfSchedule};
use crate::radio::session::StreamSession;
use crate::Sample;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// What to do when a probe produces an unusable measurement
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SweepFailurePolicy {
    /// Stop the sweep and keep the stored table unchanged
    #[default]
    Abort,
    /// Log the rate and continue with the next one
    Skip,
}

/// Probe waveform and sweep parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationSettings {
    /// Candidate sample rates in Hz
    pub sample_rates: Vec<f64>,
    /// Probe bandwidth in Hz
    pub bandwidth: f64,
    /// Probe pulse width in seconds
    pub pulse_width: f64,
    /// Probe PRF in Hz
    pub prf: f64,
    /// Send an all-zero pulse before each probe
    pub warmup: bool,
    /// Wait after changing rates, in seconds
    pub settle_secs: f64,
    pub failure_policy: SweepFailurePolicy,
}

impl Default for CalibrationSettings {
    fn default() -> Self {
        Self {
            sample_rates: vec![10e6, 20e6, 30e6, 40e6, 50e6],
            bandwidth: 10e6,
            pulse_width: 20e-6,
            prf: 10e3,
            warmup: true,
            settle_secs: 0.0,
            failure_policy: SweepFailurePolicy::Abort,
        }
    }
}

/// Sweep progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepState {
    PendingRate,
    Configuring,
    Probing,
    Correlating,
    RecordUpdated,
    Persisted,
    Done,
}

/// Delay measured at one sample rate
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeResult {
    pub key: CalibrationKey,
    pub delay_samples: i64,
    /// Samples captured for the probe
    pub samples_received: usize,
}

/// Summary of a completed sweep
#[derive(Debug, Clone, PartialEq)]
pub struct SweepReport {
    pub measured: Vec<ProbeResult>,
    /// Rates skipped under [`SweepFailurePolicy::Skip`] and the reason
    pub skipped: Vec<(f64, String)>,
    /// File the table was written to
    pub store_path: PathBuf,
    /// Records in the table after the merge
    pub total_records: usize,
}

/// Measures the transmit-to-receive delay over a list of sample rates
#[derive(Debug, Clone)]
pub struct DelayCalibrationEngine {
    settings: CalibrationSettings,
    coordinator: DuplexCoordinator,
    state: SweepState,
}

impl DelayCalibrationEngine {
    pub fn new(settings: CalibrationSettings) -> Self {
        Self {
            settings,
            coordinator: DuplexCoordinator::default(),
            state: SweepState::PendingRate,
        }
    }

    /// Use a custom duplex coordinator for the probe cycles
    pub fn with_coordinator(mut self, coordinator: DuplexCoordinator) -> Self {
        self.coordinator = coordinator;
        self
    }

    pub fn settings(&self) -> &CalibrationSettings {
        &self.settings
    }

    pub fn state(&self) -> SweepState {
        self.state
    }

    fn transition(&mut self, state: SweepState) {
        tracing::debug!(from = ?self.state, to = ?state, "Calibration state");
        self.state = state;
    }

    /// Run the full sweep and merge the results into the table at `store_path`.
    ///
    /// The table is loaded before the first probe and rewritten once after
    /// the last. On any error the file is left untouched.
    pub fn run(
        &mut self,
        session: &mut StreamSession,
        store_path: &Path,
        cancel: &CancellationToken,
    ) -> RadarResult<SweepReport> {
        let mut store = CalibrationStore::load(store_path)?;
        let mut measured = Vec::new();
        let mut skipped = Vec::new();

        let rates = self.settings.sample_rates.clone();
        tracing::info!(rates = ?rates, "Starting delay calibration sweep");

        for rate in rates {
            if cancel.is_cancelled() {
                tracing::info!("Calibration sweep cancelled");
                self.transition(SweepState::PendingRate);
                return Err(RadarError::Calibration("sweep cancelled".into()));
            }
            self.transition(SweepState::PendingRate);

            match self.probe_rate(session, rate, cancel) {
                Ok(result) => {
                    tracing::info!(
                        radio = %result.key.radio,
                        master_clock_rate = result.key.master_clock_rate,
                        sample_rate = result.key.sample_rate,
                        delay_samples = result.delay_samples,
                        "Measured pipeline delay"
                    );
                    store.upsert(result.key.clone(), result.delay_samples);
                    self.transition(SweepState::RecordUpdated);
                    measured.push(result);
                }
                Err(RadarError::Calibration(reason))
                    if self.settings.failure_policy == SweepFailurePolicy::Skip =>
                {
                    tracing::warn!(sample_rate = rate, %reason, "Skipping sample rate");
                    skipped.push((rate, reason));
                }
                Err(err) => {
                    tracing::error!(sample_rate = rate, error = %err, "Calibration sweep aborted");
                    return Err(err);
                }
            }
        }

        store.save()?;
        self.transition(SweepState::Persisted);
        self.transition(SweepState::Done);

        Ok(SweepReport {
            measured,
            skipped,
            store_path: store.path().to_path_buf(),
            total_records: store.len(),
        })
    }

    /// Measure the delay at one sample rate without touching the store.
    ///
    /// # Arguments
    /// * `session` - Open stream session on the radio under test
    /// * `rate` - Sample rate for both directions, in Hz
    /// * `cancel` - Stop signal forwarded to the duplex cycle
    pub fn probe_rate(
        &mut self,
        session: &mut StreamSession,
        rate: f64,
        cancel: &CancellationToken,
    ) -> RadarResult<ProbeResult> {
        self.transition(SweepState::Configuring);
        let device = session.device().clone();
        device.set_tx_rate(rate);
        device.set_rx_rate(rate);
        if self.settings.settle_secs > 0.0 {
            std::thread::sleep(Duration::from_secs_f64(self.settings.settle_secs));
        }
        // Key and probe follow the rate the device settled on
        let actual_rate = device.rx_rate();
        if actual_rate != rate {
            tracing::warn!(
                requested = rate,
                actual = actual_rate,
                "Device coerced the probe sample rate"
            );
        }
        let key = CalibrationKey::new(device.identity(), device.master_clock_rate(), actual_rate);
        tracing::debug!(
            radio = %key.radio,
            master_clock_rate = key.master_clock_rate,
            sample_rate = actual_rate,
            "Configured probe rate"
        );

        self.transition(SweepState::Probing);
        let schedule = PrfSchedule::single(self.settings.prf)?;
        let waveform = LinearFmWaveform::new(
            self.settings.bandwidth,
            self.settings.pulse_width,
            actual_rate,
            schedule.clone(),
        )?;
        let pulse = waveform.pulse();
        let num_channels = session.channels().len();
        let expected = pulse.len();

        if self.settings.warmup {
            let zeros = vec![Sample::new(0.0, 0.0); expected];
            let buffers: Vec<&[Sample]> = (0..num_channels).map(|_| zeros.as_slice()).collect();
            let mut discard = CaptureBuffer::bounded(num_channels, expected);
            self.coordinator
                .run(session, &buffers, &schedule, 1, &mut discard, cancel)?;
        }

        let buffers: Vec<&[Sample]> = (0..num_channels).map(|_| pulse.as_slice()).collect();
        let mut capture = CaptureBuffer::bounded(num_channels, expected);
        let report = self
            .coordinator
            .run(session, &buffers, &schedule, 1, &mut capture, cancel)?;
        if report.is_degraded() {
            return Err(RadarError::Calibration(format!(
                "probe at {rate} Hz captured {} of {expected} samples",
                report.samples_received
            )));
        }

        self.transition(SweepState::Correlating);
        let delay_samples = estimate_delay(capture.channel(0), &pulse).ok_or_else(|| {
            RadarError::Calibration(format!("probe at {rate} Hz produced no correlation"))
        })?;
        if delay_samples < 0 {
            return Err(RadarError::Calibration(format!(
                "probe at {rate} Hz produced negative delay {delay_samples}"
            )));
        }

        Ok(ProbeResult {
            key,
            delay_samples,
            samples_received: report.samples_received,
        })
    }
}
