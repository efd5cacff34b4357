use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use uhd_radar_core::calibration::matched_filter::{estimate_delay, matched_filter};
use uhd_radar_core::pulse::waveform::{LinearFmWaveform, PrfSchedule};
use uhd_radar_core::Sample;

fn probe(sample_rate: f64) -> Vec<Sample> {
    LinearFmWaveform::new(10e6, 20e-6, sample_rate, PrfSchedule::single(10e3).unwrap())
        .unwrap()
        .pulse()
}

fn delayed(pulse: &[Sample], delay: usize) -> Vec<Sample> {
    let mut capture = vec![Sample::new(0.0, 0.0); pulse.len()];
    capture[delay..].copy_from_slice(&pulse[..pulse.len() - delay]);
    capture
}

fn bench_matched_filter(c: &mut Criterion) {
    let mut group = c.benchmark_group("matched_filter");
    for rate in [10e6, 30e6, 50e6] {
        let pulse = probe(rate);
        let capture = delayed(&pulse, 64);
        group.bench_with_input(BenchmarkId::new("correlate", rate as u64), &rate, |b, _| {
            b.iter(|| matched_filter(black_box(&capture), black_box(&pulse)))
        });
    }
    group.finish();
}

fn bench_estimate_delay(c: &mut Criterion) {
    let pulse = probe(50e6);
    let capture = delayed(&pulse, 82);
    c.bench_function("estimate_delay_50msps", |b| {
        b.iter(|| estimate_delay(black_box(&capture), black_box(&pulse)))
    });
}

criterion_group!(benches, bench_matched_filter, bench_estimate_delay);
criterion_main!(benches);
