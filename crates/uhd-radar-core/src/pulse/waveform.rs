//! Linear-FM pulse generation
//!
//! A pulse sweeps linearly from −B/2 to +B/2 over its width T:
//!
//! ```text
//! phase(n) = −B/2 · t + B/(2T) · t²,   t = n / Fs
//! sample[n] = exp(j · 2π · phase(n))
//! ```
//!
//! Pulses repeat on a [`PrfSchedule`]; each pulse occupies one PRI whose
//! length in samples is round(Fs / PRF).

use crate::error::{RadarError, RadarResult};
use crate::Sample;
use std::f64::consts::TAU;

/// Ordered list of pulse repetition frequencies, cycled across pulses
///
/// Pulse `k` is transmitted with PRF `prfs[k % len]`, and that PRF sets the
/// interval from pulse `k` to pulse `k + 1`.
#[derive(Debug, Clone, PartialEq)]
pub struct PrfSchedule {
    prfs: Vec<f64>,
}

impl PrfSchedule {
    /// Create a schedule from one or more PRFs in Hz
    pub fn new(prfs: Vec<f64>) -> RadarResult<Self> {
        if prfs.is_empty() {
            return Err(RadarError::InvalidWaveform("PRF schedule is empty".into()));
        }
        if let Some(bad) = prfs.iter().find(|p| !p.is_finite() || **p <= 0.0) {
            return Err(RadarError::InvalidWaveform(format!(
                "PRF must be positive, got {bad}"
            )));
        }
        Ok(Self { prfs })
    }

    /// Schedule of length one
    pub fn single(prf: f64) -> RadarResult<Self> {
        Self::new(vec![prf])
    }

    pub fn len(&self) -> usize {
        self.prfs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prfs.is_empty()
    }

    pub fn prfs(&self) -> &[f64] {
        &self.prfs
    }

    /// PRF governing pulse `k`
    pub fn prf(&self, k: usize) -> f64 {
        self.prfs[k % self.prfs.len()]
    }

    /// Interval in seconds from pulse `k` to pulse `k + 1`
    pub fn pri(&self, k: usize) -> f64 {
        1.0 / self.prf(k)
    }
}

/// Linear-FM pulse train description
///
/// # Example
/// ```
/// use uhd_radar_core::pulse::waveform::{LinearFmWaveform, PrfSchedule};
///
/// let schedule = PrfSchedule::single(10e3).unwrap();
/// let waveform = LinearFmWaveform::new(10e6, 20e-6, 50e6, schedule).unwrap();
/// assert_eq!(waveform.samples_per_pulse(), 1000);
/// assert_eq!(waveform.samples_per_pri(0), 5000);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct LinearFmWaveform {
    /// Swept bandwidth in Hz
    bandwidth: f64,
    /// Pulse width in seconds
    pulse_width: f64,
    /// Sample rate in Hz
    sample_rate: f64,
    schedule: PrfSchedule,
}

impl LinearFmWaveform {
    /// Validate and build a waveform.
    ///
    /// # Arguments
    /// * `bandwidth` - Swept bandwidth in Hz (0 yields a constant phasor)
    /// * `pulse_width` - Pulse width in seconds, must fit inside every PRI
    /// * `sample_rate` - Sample rate in Hz
    /// * `schedule` - PRF schedule for the pulse train
    pub fn new(
        bandwidth: f64,
        pulse_width: f64,
        sample_rate: f64,
        schedule: PrfSchedule,
    ) -> RadarResult<Self> {
        if !bandwidth.is_finite() || bandwidth < 0.0 {
            return Err(RadarError::InvalidWaveform(format!(
                "bandwidth must be non-negative, got {bandwidth}"
            )));
        }
        if !pulse_width.is_finite() || pulse_width <= 0.0 {
            return Err(RadarError::InvalidWaveform(format!(
                "pulse width must be positive, got {pulse_width}"
            )));
        }
        if !sample_rate.is_finite() || sample_rate <= 0.0 {
            return Err(RadarError::InvalidWaveform(format!(
                "sample rate must be positive, got {sample_rate}"
            )));
        }

        let waveform = Self {
            bandwidth,
            pulse_width,
            sample_rate,
            schedule,
        };
        if waveform.samples_per_pulse() == 0 {
            return Err(RadarError::InvalidWaveform(format!(
                "pulse of {pulse_width} s is shorter than one sample at {sample_rate} Hz"
            )));
        }
        for (i, prf) in waveform.schedule.prfs().iter().enumerate() {
            if waveform.samples_per_pulse() > waveform.samples_per_pri(i) {
                return Err(RadarError::InvalidWaveform(format!(
                    "pulse width {pulse_width} s exceeds the PRI of {prf} Hz"
                )));
            }
        }
        Ok(waveform)
    }

    pub fn bandwidth(&self) -> f64 {
        self.bandwidth
    }

    pub fn pulse_width(&self) -> f64 {
        self.pulse_width
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn schedule(&self) -> &PrfSchedule {
        &self.schedule
    }

    /// round(Fs · T)
    pub fn samples_per_pulse(&self) -> usize {
        (self.sample_rate * self.pulse_width).round() as usize
    }

    /// round(Fs / PRF) for pulse `i`
    pub fn samples_per_pri(&self, i: usize) -> usize {
        (self.sample_rate / self.schedule.prf(i)).round() as usize
    }

    /// Samples spanned by `pulse_count` consecutive PRIs
    pub fn total_samples(&self, pulse_count: usize) -> usize {
        (0..pulse_count).map(|i| self.samples_per_pri(i)).sum()
    }

    /// Generate one pulse of `samples_per_pulse` unit-magnitude samples
    pub fn pulse(&self) -> Vec<Sample> {
        let chirp_rate = self.bandwidth / (2.0 * self.pulse_width);
        (0..self.samples_per_pulse())
            .map(|n| {
                let t = n as f64 / self.sample_rate;
                let phase = -self.bandwidth / 2.0 * t + chirp_rate * t * t;
                // Wrap to one cycle before narrowing to f32
                let angle = TAU * phase.rem_euclid(1.0);
                Sample::from_polar(1.0, angle as f32)
            })
            .collect()
    }

    /// Pulse `i` embedded at the start of its PRI, the remainder zero-filled
    pub fn pri_buffer(&self, i: usize) -> Vec<Sample> {
        let mut buffer = self.pulse();
        buffer.resize(self.samples_per_pri(i), Sample::new(0.0, 0.0));
        buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn waveform(bandwidth: f64, pulse_width: f64, prf: f64, sample_rate: f64) -> LinearFmWaveform {
        LinearFmWaveform::new(
            bandwidth,
            pulse_width,
            sample_rate,
            PrfSchedule::single(prf).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_reference_scenario_sizes() {
        let w = waveform(10e6, 20e-6, 10e3, 50e6);
        assert_eq!(w.samples_per_pulse(), 1000);
        assert_eq!(w.samples_per_pri(0), 5000);
        assert_eq!(w.pulse().len(), 1000);
        assert_eq!(w.total_samples(3), 15000);
    }

    #[test]
    fn test_pulse_has_unit_magnitude() {
        for (b, t, fs) in [(10e6, 20e-6, 50e6), (1e6, 100e-6, 5e6), (20e6, 5e-6, 61.44e6)] {
            let w = waveform(b, t, 1e3, fs);
            let pulse = w.pulse();
            assert_eq!(pulse.len(), (fs * t).round() as usize);
            for s in &pulse {
                assert_relative_eq!(s.norm(), 1.0, epsilon = 1e-5);
            }
        }
    }

    #[test]
    fn test_first_sample_is_zero_phase() {
        let pulse = waveform(10e6, 20e-6, 10e3, 50e6).pulse();
        assert_relative_eq!(pulse[0].re, 1.0, epsilon = 1e-6);
        assert_relative_eq!(pulse[0].im, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_zero_bandwidth_is_constant_phasor() {
        let pulse = waveform(0.0, 10e-6, 10e3, 10e6).pulse();
        assert!(pulse
            .iter()
            .all(|s| (s.re - 1.0).abs() < 1e-6 && s.im.abs() < 1e-6));
    }

    #[test]
    fn test_generation_is_deterministic() {
        let w = waveform(10e6, 20e-6, 10e3, 50e6);
        assert_eq!(w.pulse(), w.pulse());
    }

    #[test]
    fn test_pri_buffer_zero_fills() {
        let w = waveform(10e6, 20e-6, 10e3, 50e6);
        let buffer = w.pri_buffer(0);
        assert_eq!(buffer.len(), 5000);
        assert_relative_eq!(buffer[999].norm(), 1.0, epsilon = 1e-5);
        assert!(buffer[1000..].iter().all(|s| s.norm() == 0.0));
    }

    #[test]
    fn test_multi_prf_sizes() {
        let schedule = PrfSchedule::new(vec![10e3, 5e3]).unwrap();
        let w = LinearFmWaveform::new(10e6, 20e-6, 50e6, schedule).unwrap();
        assert_eq!(w.samples_per_pri(0), 5000);
        assert_eq!(w.samples_per_pri(1), 10000);
        assert_eq!(w.samples_per_pri(2), 5000);
        assert_eq!(w.total_samples(3), 20000);
    }

    #[test]
    fn test_schedule_cycles_modulo_length() {
        let schedule = PrfSchedule::new(vec![1e3, 2e3, 4e3]).unwrap();
        assert_eq!(schedule.prf(0), 1e3);
        assert_eq!(schedule.prf(4), 2e3);
        assert_relative_eq!(schedule.pri(2), 2.5e-4);
        assert_relative_eq!(schedule.pri(3), 1e-3);
    }

    #[test]
    fn test_rejects_invalid_parameters() {
        let schedule = || PrfSchedule::single(10e3).unwrap();
        assert!(LinearFmWaveform::new(-1.0, 20e-6, 50e6, schedule()).is_err());
        assert!(LinearFmWaveform::new(10e6, 0.0, 50e6, schedule()).is_err());
        assert!(LinearFmWaveform::new(10e6, 20e-6, 0.0, schedule()).is_err());
        assert!(PrfSchedule::new(vec![]).is_err());
        assert!(PrfSchedule::new(vec![10e3, -5.0]).is_err());
    }

    #[test]
    fn test_rejects_pulse_longer_than_pri() {
        let schedule = PrfSchedule::new(vec![10e3, 100e3]).unwrap();
        let result = LinearFmWaveform::new(10e6, 20e-6, 50e6, schedule);
        assert!(matches!(result, Err(RadarError::InvalidWaveform(_))));
    }
}
