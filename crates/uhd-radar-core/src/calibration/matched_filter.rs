//! Matched filter and delay estimation
//!
//! The capture `x` is convolved with `h`, the time-reversed conjugate of the
//! reference pulse of length `L`:
//!
//! ```text
//! y[i] = Σ_j x[j] · h[i − j],   0 ≤ i < len(x) + L − 1
//! ```
//!
//! Output index `i` corresponds to the reference starting at capture sample
//! `i − (L − 1)`, so a pulse received `D` samples late peaks at `i = D + L − 1`
//! (the `D + L`-th output sample).
//!
//! The sum is evaluated directly so that equal correlation values compare
//! equal and [`peak_index`] resolves plateaus to their first sample.

use crate::Sample;

/// Full linear convolution of `x` and `h`
pub fn convolve(x: &[Sample], h: &[Sample]) -> Vec<Sample> {
    if x.is_empty() || h.is_empty() {
        return Vec::new();
    }
    let mut y = vec![Sample::new(0.0, 0.0); x.len() + h.len() - 1];
    for (i, out) in y.iter_mut().enumerate() {
        // j ranges over the overlap of x[j] and h[i - j]
        let j_min = (i + 1).saturating_sub(h.len());
        let j_max = i.min(x.len() - 1);
        let mut acc = Sample::new(0.0, 0.0);
        for j in j_min..=j_max {
            acc += x[j] * h[i - j];
        }
        *out = acc;
    }
    y
}

/// Time-reversed complex conjugate of `reference`
pub fn matched_filter_taps(reference: &[Sample]) -> Vec<Sample> {
    reference.iter().rev().map(|s| s.conj()).collect()
}

/// Correlate `capture` against `reference`
pub fn matched_filter(capture: &[Sample], reference: &[Sample]) -> Vec<Sample> {
    convolve(capture, &matched_filter_taps(reference))
}

/// Index of the largest magnitude; the first occurrence wins ties
pub fn peak_index(y: &[Sample]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, s) in y.iter().enumerate() {
        let mag = s.norm_sqr();
        match best {
            Some((_, best_mag)) if mag > best_mag => best = Some((i, mag)),
            None => best = Some((i, mag)),
            _ => {}
        }
    }
    best.map(|(i, _)| i)
}

/// Estimate how many samples `reference` is delayed by within `capture`.
///
/// Returns `None` when either input is empty. The result is negative when
/// the strongest correlation lies before the start of the capture.
pub fn estimate_delay(capture: &[Sample], reference: &[Sample]) -> Option<i64> {
    let y = matched_filter(capture, reference);
    let peak = peak_index(&y)?;
    // One-based peak position minus the reference length
    Some((peak + 1) as i64 - reference.len() as i64)
}
