//! Duplex cycle: transmit and receive anchored to one device-clock instant
//!
//! The coordinator reads (or resets) the device clock once, picks
//! `T0 = now + safety_margin`, and starts the transmit scheduler and the
//! receive collector on two scoped threads, each at `T0` plus its own offset.
//! Because both directions are scheduled in device time, host thread start-up
//! jitter does not show up in the captured timeline.

use super::cancel::CancellationToken;
use super::receive::{CaptureBuffer, ReceiveCollector};
use super::transmit::{StartTime, TransmitScheduler};
use super::waveform::PrfSchedule;
use crate::error::RadarResult;
use crate::radio::session::StreamSession;
use crate::radio::{RadioDevice, TimeSpec};
use crate::{Sample, DEFAULT_START_DELAY_SECS, GUARD_MARGIN_SECS, STEADY_STATE_TIMEOUT_SECS};
use std::sync::Arc;

/// Outcome of one duplex cycle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DuplexReport {
    /// Common anchor time on the device clock
    pub t0: TimeSpec,
    /// Samples accepted by the transmit stream, per channel
    pub samples_sent: usize,
    /// Samples written into the capture, per channel
    pub samples_received: usize,
    /// Requested capture length, 0 for unbounded
    pub requested: usize,
}

impl DuplexReport {
    /// The bounded capture came back short
    pub fn is_degraded(&self) -> bool {
        self.requested > 0 && self.samples_received < self.requested
    }
}

/// Runs transmit and receive concurrently against a shared start time
#[derive(Debug, Clone)]
pub struct DuplexCoordinator {
    /// Reset the device clock to zero instead of reading it
    reset_clock: bool,
    /// Lead time between reading the clock and T0
    safety_margin: f64,
    tx_offset: f64,
    rx_offset: f64,
    guard: f64,
    steady_timeout: f64,
}

impl Default for DuplexCoordinator {
    fn default() -> Self {
        Self {
            reset_clock: false,
            safety_margin: DEFAULT_START_DELAY_SECS,
            tx_offset: 0.0,
            rx_offset: 0.0,
            guard: GUARD_MARGIN_SECS,
            steady_timeout: STEADY_STATE_TIMEOUT_SECS,
        }
    }
}

impl DuplexCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reset_clock(mut self, reset: bool) -> Self {
        self.reset_clock = reset;
        self
    }

    pub fn with_safety_margin(mut self, secs: f64) -> Self {
        self.safety_margin = secs;
        self
    }

    /// Offsets of the transmit and receive starts relative to T0
    pub fn with_offsets(mut self, tx_offset: f64, rx_offset: f64) -> Self {
        self.tx_offset = tx_offset;
        self.rx_offset = rx_offset;
        self
    }

    pub fn with_timeouts(mut self, guard: f64, steady_timeout: f64) -> Self {
        self.guard = guard;
        self.steady_timeout = steady_timeout;
        self
    }

    pub fn safety_margin(&self) -> f64 {
        self.safety_margin
    }

    /// Run one duplex cycle and block until both directions finish.
    ///
    /// Errors from either direction are returned unchanged, the receive
    /// error first when both fail. A panic on either thread is re-raised.
    ///
    /// # Arguments
    /// * `session` - Open stream session
    /// * `buffers` - Pulse buffers, one per channel
    /// * `schedule` - PRF schedule of the pulse train
    /// * `pulse_count` - Pulses to send, 0 = until cancelled
    /// * `capture` - Receive destination
    /// * `cancel` - Stop signal for both directions
    pub fn run(
        &self,
        session: &mut StreamSession,
        buffers: &[&[Sample]],
        schedule: &PrfSchedule,
        pulse_count: usize,
        capture: &mut CaptureBuffer,
        cancel: &CancellationToken,
    ) -> RadarResult<DuplexReport> {
        let device: Arc<dyn RadioDevice> = Arc::clone(session.device());
        if self.reset_clock {
            device.set_time_now(TimeSpec::ZERO);
        }
        let t0 = device.time_now() + self.safety_margin;
        let tx_start = StartTime::At(t0 + self.tx_offset);
        let rx_start = StartTime::At(t0 + self.rx_offset);

        let scheduler =
            TransmitScheduler::new(schedule.clone(), pulse_count).with_guard(self.guard);
        let collector = ReceiveCollector::new(self.guard, self.steady_timeout);
        let (tx, rx) = session.streams()?;
        let clock: &dyn RadioDevice = device.as_ref();

        tracing::debug!(
            t0 = t0.secs(),
            pulse_count,
            requested = capture.requested(),
            "Starting duplex cycle"
        );

        let (tx_result, rx_result) = std::thread::scope(|scope| {
            let rx_thread =
                scope.spawn(|| collector.run(rx, clock, capture, rx_start, cancel));
            let tx_thread =
                scope.spawn(|| scheduler.run(tx, clock, buffers, tx_start, cancel));
            let rx_result = match rx_thread.join() {
                Ok(result) => result,
                Err(panic) => std::panic::resume_unwind(panic),
            };
            let tx_result = match tx_thread.join() {
                Ok(result) => result,
                Err(panic) => std::panic::resume_unwind(panic),
            };
            (tx_result, rx_result)
        });

        let samples_received = rx_result?;
        let samples_sent = tx_result?;
        let report = DuplexReport {
            t0,
            samples_sent,
            samples_received,
            requested: capture.requested(),
        };
        if report.is_degraded() {
            tracing::warn!(
                received = samples_received,
                requested = report.requested,
                "Degraded capture"
            );
        }
        tracing::info!(
            t0 = t0.secs(),
            sent = samples_sent,
            received = samples_received,
            "Duplex cycle complete"
        );
        Ok(report)
    }
}
