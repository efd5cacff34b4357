//! E2E tests for duplex pulse streaming
//!
//! Drives the loopback radio through full transmit/receive cycles and checks
//! the transmitted timeline, the captured echoes and error propagation.

use approx::assert_relative_eq;
use std::sync::Arc;
use std::time::Duration;
use uhd_radar::radio::loopback::TxPacketRecord;
use uhd_radar::radio::{RxErrorCode, StreamArgs, StreamCommand, StreamMode};
use uhd_radar::{
    CancellationToken, CaptureBuffer, DuplexCoordinator, LinearFmWaveform, LoopbackConfig,
    LoopbackRadio, PrfSchedule, RadarError, RadioDevice, StreamSession,
};

// ============================================================================
// Helpers
// ============================================================================

/// Loopback radio at `rate` plus a session on `channels`
fn open(config: LoopbackConfig, rate: f64, channels: Vec<usize>) -> (LoopbackRadio, StreamSession) {
    let radio = LoopbackRadio::new(config);
    radio.set_tx_rate(rate);
    radio.set_rx_rate(rate);
    let args = StreamArgs {
        channels,
        ..Default::default()
    };
    let session = StreamSession::open(Arc::new(radio.clone()), args).expect("session opens");
    (radio, session)
}

fn unity_loopback(delay: usize) -> LoopbackConfig {
    LoopbackConfig {
        pipeline_delay: delay,
        loopback_gain: 1.0,
        ..Default::default()
    }
}

/// Start times of the timed bursts that carried samples
fn burst_starts(log: &[TxPacketRecord]) -> Vec<f64> {
    log.iter()
        .filter(|p| p.metadata.start_of_burst && p.metadata.has_time_spec && p.samples > 0)
        .map(|p| p.metadata.time_spec.secs())
        .collect()
}

fn coordinator() -> DuplexCoordinator {
    DuplexCoordinator::new().with_safety_margin(0.05)
}

// ============================================================================
// Transmit timeline
// ============================================================================

/// Test three pulses at 10 kHz PRF start 100 µs apart from T0
#[test]
fn test_reference_train_timeline() {
    let rate = 50e6;
    let (radio, mut session) = open(unity_loopback(82), rate, vec![0]);
    let waveform =
        LinearFmWaveform::new(10e6, 20e-6, rate, PrfSchedule::single(10e3).unwrap()).unwrap();
    let pulse = waveform.pulse();
    assert_eq!(pulse.len(), 1000);

    let mut capture = CaptureBuffer::bounded(1, waveform.total_samples(3) + 82);
    let report = coordinator()
        .run(
            &mut session,
            &[pulse.as_slice()],
            waveform.schedule(),
            3,
            &mut capture,
            &CancellationToken::new(),
        )
        .expect("duplex cycle succeeds");

    let log = radio.tx_log();
    let starts = burst_starts(&log);
    assert_eq!(starts.len(), 3, "One timed burst per pulse");
    assert_relative_eq!(starts[0], report.t0.secs(), epsilon = 1e-12);
    assert_relative_eq!(starts[1] - starts[0], 1e-4, epsilon = 1e-9);
    assert_relative_eq!(starts[2] - starts[0], 2e-4, epsilon = 1e-9);

    let eobs = log.iter().filter(|p| p.metadata.end_of_burst).count();
    assert_eq!(eobs, 4, "Each pulse closes its burst, then one terminator");
    let last = log.last().expect("log not empty");
    assert!(last.metadata.end_of_burst && last.samples == 0);

    assert_eq!(report.samples_sent, 3000);
    assert!(!report.is_degraded());
}

/// Test a staggered PRF schedule advances by each entry's own PRI
#[test]
fn test_staggered_prf_timeline() {
    let rate = 10e6;
    let (radio, mut session) = open(unity_loopback(5), rate, vec![0]);
    let schedule = PrfSchedule::new(vec![10e3, 5e3]).unwrap();
    let waveform = LinearFmWaveform::new(1e6, 10e-6, rate, schedule.clone()).unwrap();
    let pulse = waveform.pulse();

    let mut capture = CaptureBuffer::bounded(1, waveform.total_samples(4) + 5);
    let report = coordinator()
        .run(
            &mut session,
            &[pulse.as_slice()],
            &schedule,
            4,
            &mut capture,
            &CancellationToken::new(),
        )
        .unwrap();

    let starts = burst_starts(&radio.tx_log());
    let offsets: Vec<f64> = starts.iter().map(|s| s - report.t0.secs()).collect();
    let expected = [0.0, 1e-4, 3e-4, 4e-4];
    assert_eq!(offsets.len(), expected.len());
    for (got, want) in offsets.iter().zip(expected) {
        assert_relative_eq!(*got, want, epsilon = 1e-9);
    }
}

// ============================================================================
// Receive path
// ============================================================================

/// Test both channels capture the echo of their own transmit buffer
#[test]
fn test_two_channel_echoes() {
    let rate = 2e6;
    let delay = 17;
    let (_radio, mut session) = open(unity_loopback(delay), rate, vec![0, 1]);
    let waveform =
        LinearFmWaveform::new(200e3, 50e-6, rate, PrfSchedule::single(4e3).unwrap()).unwrap();
    let pulse = waveform.pulse();
    let inverted: Vec<_> = pulse.iter().map(|s| -*s).collect();

    let mut capture = CaptureBuffer::bounded(2, waveform.total_samples(2) + delay);
    coordinator()
        .run(
            &mut session,
            &[pulse.as_slice(), inverted.as_slice()],
            waveform.schedule(),
            2,
            &mut capture,
            &CancellationToken::new(),
        )
        .unwrap();

    let pri = waveform.samples_per_pri(0);
    for k in 0..2 {
        for (i, s) in pulse.iter().enumerate() {
            let at = delay + k * pri + i;
            assert_eq!(capture.channel(0)[at], *s, "Channel 0 pulse {k} sample {i}");
            assert_eq!(capture.channel(1)[at], -*s, "Channel 1 pulse {k} sample {i}");
        }
    }
}

/// Test an unbounded cycle runs until cancelled and stops the receive stream
#[test]
fn test_unbounded_cycle_stops_on_cancel() {
    let rate = 1e6;
    let (radio, mut session) = open(unity_loopback(10), rate, vec![0]);
    let waveform =
        LinearFmWaveform::new(100e3, 20e-6, rate, PrfSchedule::single(1e3).unwrap()).unwrap();
    let pulse = waveform.pulse();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let canceller = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(200));
        trigger.cancel();
    });

    let mut capture = CaptureBuffer::unbounded(1);
    let report = DuplexCoordinator::new()
        .with_safety_margin(0.02)
        .run(
            &mut session,
            &[pulse.as_slice()],
            waveform.schedule(),
            0,
            &mut capture,
            &cancel,
        )
        .expect("cancelled cycle is not an error");
    canceller.join().unwrap();

    assert!(capture.is_unbounded());
    assert!(!capture.is_empty(), "Samples arrive before cancellation");
    assert_eq!(report.samples_received, capture.len());
    assert!(report.samples_sent >= pulse.len() * 10, "Pulses keep flowing until cancel");
    assert_eq!(report.samples_sent % pulse.len(), 0);

    let commands = radio.rx_commands();
    assert_eq!(commands.first().map(|c| c.mode), Some(StreamMode::StartContinuous));
    assert_eq!(commands.last().copied(), Some(StreamCommand::stop()));
}

// ============================================================================
// Error propagation
// ============================================================================

/// Test a receive overflow aborts the cycle with the device error code
#[test]
fn test_overflow_is_reported() {
    let (radio, mut session) = open(
        LoopbackConfig {
            fail_after_packets: Some(1),
            ..Default::default()
        },
        1e6,
        vec![0],
    );
    let pulse = vec![uhd_radar::Sample::new(1.0, 0.0); 100];
    let mut capture = CaptureBuffer::bounded(1, 10_000);

    let err = coordinator()
        .run(
            &mut session,
            &[pulse.as_slice()],
            &PrfSchedule::single(1e3).unwrap(),
            2,
            &mut capture,
            &CancellationToken::new(),
        )
        .unwrap_err();

    assert!(err.is_device_error());
    assert!(matches!(
        err,
        RadarError::Device {
            code: RxErrorCode::Overflow,
            ..
        }
    ));
    assert_eq!(radio.rx_commands().last().copied(), Some(StreamCommand::stop()));
}

/// Test a session may run several cycles back to back
#[test]
fn test_repeated_cycles_on_one_session() {
    let rate = 1e6;
    let (_radio, mut session) = open(unity_loopback(12), rate, vec![0]);
    let waveform =
        LinearFmWaveform::new(100e3, 30e-6, rate, PrfSchedule::single(5e3).unwrap()).unwrap();
    let pulse = waveform.pulse();

    for cycle in 0..3 {
        let mut capture = CaptureBuffer::bounded(1, waveform.total_samples(1) + 12);
        let report = coordinator()
            .run(
                &mut session,
                &[pulse.as_slice()],
                waveform.schedule(),
                1,
                &mut capture,
                &CancellationToken::new(),
            )
            .unwrap();
        assert!(!report.is_degraded(), "Cycle {cycle} degraded");
        assert_eq!(capture.channel(0)[12], pulse[0], "Cycle {cycle} echo");
    }
}
