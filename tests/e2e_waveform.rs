//! E2E tests for linear-FM waveform generation
//!
//! Covers pulse sizing, unit magnitude, PRI embedding and the matched-filter
//! response of a generated pulse against itself.

use approx::assert_relative_eq;
use uhd_radar::calibration::matched_filter::{matched_filter, peak_index};
use uhd_radar::{LinearFmWaveform, PrfSchedule};

fn waveform(bandwidth: f64, pulse_width: f64, prf: f64, sample_rate: f64) -> LinearFmWaveform {
    LinearFmWaveform::new(
        bandwidth,
        pulse_width,
        sample_rate,
        PrfSchedule::single(prf).expect("valid PRF"),
    )
    .expect("valid waveform")
}

/// B=10 MHz, T=20 µs, PRF=10 kHz at 50 MS/s
#[test]
fn test_reference_waveform_dimensions() {
    let w = waveform(10e6, 20e-6, 10e3, 50e6);
    assert_eq!(w.samples_per_pulse(), 1000);
    assert_eq!(w.samples_per_pri(0), 5000);
    assert_eq!(w.pri_buffer(0).len(), 5000);
}

/// Pulse length is round(Fs·T) and every sample is unit magnitude when Fs > 2B
#[test]
fn test_pulse_length_and_magnitude_across_parameters() {
    let cases = [
        (1e6, 10e-6, 5e6),
        (5e6, 13.3e-6, 12.5e6),
        (10e6, 20e-6, 30e6),
        (20e6, 7e-6, 50e6),
        (2.5e6, 100e-6, 10e6),
    ];
    for (bandwidth, pulse_width, sample_rate) in cases {
        let w = waveform(bandwidth, pulse_width, 1e3, sample_rate);
        let pulse = w.pulse();
        assert_eq!(
            pulse.len(),
            (sample_rate * pulse_width).round() as usize,
            "Pulse length for B={bandwidth} T={pulse_width} Fs={sample_rate}"
        );
        for (n, s) in pulse.iter().enumerate() {
            assert_relative_eq!(s.norm(), 1.0, epsilon = 1e-5);
            assert!(s.re.is_finite() && s.im.is_finite(), "Sample {n} not finite");
        }
    }
}

/// Autocorrelation magnitude is largest at lag zero
#[test]
fn test_autocorrelation_peak_at_zero_lag() {
    let pulse = waveform(10e6, 20e-6, 10e3, 50e6).pulse();
    let y = matched_filter(&pulse, &pulse);
    let zero_lag = pulse.len() - 1;

    assert_eq!(peak_index(&y), Some(zero_lag));
    assert_relative_eq!(y[zero_lag].norm(), pulse.len() as f32, max_relative = 1e-3);
    let peak = y[zero_lag].norm();
    for (i, s) in y.iter().enumerate() {
        assert!(s.norm() <= peak, "Lag {i} exceeds the zero-lag peak");
    }
}

/// Chirp phase follows −B/2·t + B/(2T)·t²
#[test]
fn test_chirp_phase() {
    let (bandwidth, pulse_width, sample_rate) = (1e6, 10e-6, 10e6);
    let pulse = waveform(bandwidth, pulse_width, 1e3, sample_rate).pulse();
    for n in [1usize, 17, 50, 99] {
        let t = n as f64 / sample_rate;
        let phase = -bandwidth / 2.0 * t + bandwidth / (2.0 * pulse_width) * t * t;
        let angle = std::f64::consts::TAU * phase;
        assert_relative_eq!(pulse[n].re as f64, angle.cos(), epsilon = 1e-4);
        assert_relative_eq!(pulse[n].im as f64, angle.sin(), epsilon = 1e-4);
    }
}

/// A pulse wider than its PRI is rejected
#[test]
fn test_pulse_wider_than_pri_rejected() {
    let result = LinearFmWaveform::new(10e6, 200e-6, 50e6, PrfSchedule::single(10e3).unwrap());
    assert!(result.is_err());
}
