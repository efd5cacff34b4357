//! Delay-compensated pulse acquisition
//!
//! Looks up the calibrated pipeline delay for the radio's current
//! configuration, captures that many extra samples, and trims them from the
//! front so sample 0 of the result lines up with the first transmitted sample.

use super::cancel::CancellationToken;
use super::duplex::{DuplexCoordinator, DuplexReport};
use super::receive::CaptureBuffer;
use super::waveform::LinearFmWaveform;
use crate::calibration::store::{CalibrationKey, CalibrationStore};
use crate::error::{RadarError, RadarResult};
use crate::radio::session::StreamSession;
use crate::Sample;

/// A finished capture with the delay that was removed from it
#[derive(Debug, Clone)]
pub struct Acquisition {
    pub capture: CaptureBuffer,
    /// Leading samples trimmed from the raw capture
    pub delay_samples: usize,
    /// Samples accepted by the transmit stream, per channel
    pub samples_sent: usize,
    /// The capture came back shorter than requested
    pub degraded: bool,
    pub report: DuplexReport,
}

/// Runs pulse trains and returns delay-trimmed captures
#[derive(Debug, Clone)]
pub struct PulseAcquisition<'a> {
    store: &'a CalibrationStore,
    coordinator: DuplexCoordinator,
}

impl<'a> PulseAcquisition<'a> {
    pub fn new(store: &'a CalibrationStore, coordinator: DuplexCoordinator) -> Self {
        Self { store, coordinator }
    }

    /// Calibration key for the session's current configuration
    pub fn key(session: &StreamSession) -> CalibrationKey {
        let device = session.device();
        CalibrationKey::new(device.identity(), device.master_clock_rate(), device.rx_rate())
    }

    /// Transmit `pulse_count` pulses of `waveform` and capture the echoes.
    ///
    /// A bounded train captures `total_samples(pulse_count) + delay` samples.
    /// `pulse_count == 0` streams until `cancel` fires; the delay is trimmed
    /// from that capture as well.
    pub fn acquire(
        &self,
        session: &mut StreamSession,
        waveform: &LinearFmWaveform,
        pulse_count: usize,
        cancel: &CancellationToken,
    ) -> RadarResult<Acquisition> {
        let rx_rate = session.device().rx_rate();
        if (rx_rate - waveform.sample_rate()).abs() > 0.5 {
            return Err(RadarError::Configuration(format!(
                "waveform rate {} Hz does not match receive rate {rx_rate} Hz",
                waveform.sample_rate()
            )));
        }

        let key = Self::key(session);
        let delay = self.store.delay_or_default(&key).max(0) as usize;
        let num_channels = session.channels().len();
        let mut capture = if pulse_count == 0 {
            CaptureBuffer::unbounded(num_channels)
        } else {
            CaptureBuffer::bounded(num_channels, waveform.total_samples(pulse_count) + delay)
        };
        tracing::info!(
            radio = %key.radio,
            sample_rate = key.sample_rate,
            delay_samples = delay,
            pulse_count,
            "Starting acquisition"
        );

        let pulse = waveform.pulse();
        let buffers: Vec<&[Sample]> = (0..num_channels).map(|_| pulse.as_slice()).collect();
        let report = self.coordinator.run(
            session,
            &buffers,
            waveform.schedule(),
            pulse_count,
            &mut capture,
            cancel,
        )?;

        let degraded = report.is_degraded();
        capture.trim_front(delay);
        Ok(Acquisition {
            capture,
            delay_samples: delay,
            samples_sent: report.samples_sent,
            degraded,
            report,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pulse::waveform::PrfSchedule;
    use crate::radio::loopback::{LoopbackConfig, LoopbackRadio};
    use crate::radio::{RadioDevice, StreamArgs};
    use std::sync::Arc;

    fn session(delay: usize, rate: f64) -> StreamSession {
        let radio = LoopbackRadio::new(LoopbackConfig {
            pipeline_delay: delay,
            loopback_gain: 1.0,
            ..Default::default()
        });
        radio.set_tx_rate(rate);
        radio.set_rx_rate(rate);
        StreamSession::open(Arc::new(radio), StreamArgs::default()).unwrap()
    }

    fn waveform(rate: f64) -> LinearFmWaveform {
        LinearFmWaveform::new(200e3, 50e-6, rate, PrfSchedule::single(5e3).unwrap()).unwrap()
    }

    #[test]
    fn test_capture_is_aligned_after_trim() {
        let mut session = session(30, 1e6);
        let mut store = CalibrationStore::new("unused.json");
        store.upsert(PulseAcquisition::key(&session), 30);

        let waveform = waveform(1e6);
        let coordinator = DuplexCoordinator::new().with_safety_margin(0.02);
        let acquisition = PulseAcquisition::new(&store, coordinator)
            .acquire(&mut session, &waveform, 2, &CancellationToken::new())
            .unwrap();

        assert_eq!(acquisition.delay_samples, 30);
        assert!(!acquisition.degraded);
        assert_eq!(acquisition.capture.len(), waveform.total_samples(2));
        let pulse = waveform.pulse();
        let data = acquisition.capture.channel(0);
        assert_eq!(&data[..pulse.len()], pulse.as_slice());
        assert_eq!(&data[200..200 + pulse.len()], pulse.as_slice());
    }

    #[test]
    fn test_missing_calibration_uses_zero_delay() {
        let mut session = session(10, 1e6);
        let store = CalibrationStore::new("unused.json");
        let acquisition = PulseAcquisition::new(&store, DuplexCoordinator::new().with_safety_margin(0.02))
            .acquire(&mut session, &waveform(1e6), 1, &CancellationToken::new())
            .unwrap();
        assert_eq!(acquisition.delay_samples, 0);
        assert_eq!(acquisition.capture.len(), 200);
        assert_eq!(acquisition.capture.channel(0)[10], waveform(1e6).pulse()[0]);
    }

    #[test]
    fn test_rate_mismatch_is_rejected() {
        let mut session = session(10, 1e6);
        let store = CalibrationStore::new("unused.json");
        let result = PulseAcquisition::new(&store, DuplexCoordinator::new())
            .acquire(&mut session, &waveform(2e6), 1, &CancellationToken::new());
        assert!(matches!(result, Err(RadarError::Configuration(_))));
    }
}
