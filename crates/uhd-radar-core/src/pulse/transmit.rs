//! Timed pulse-train transmission
//!
//! Every pulse is framed as its own burst: the first packet carries
//! start-of-burst and an absolute device time, any remainder follows as
//! continuation packets, and a zero-length end-of-burst packet closes it.
//! After the last pulse one more empty end-of-burst packet is sent so the
//! transmit chain is left idle.

use super::cancel::CancellationToken;
use super::secs;
use super::waveform::PrfSchedule;
use crate::error::{RadarError, RadarResult};
use crate::radio::{DeviceClock, TimeSpec, TxMetadata, TxStreamer};
use crate::{Sample, GUARD_MARGIN_SECS};
use std::time::Duration;

/// When a transmission or capture starts on the device clock
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StartTime {
    /// Absolute device time
    At(TimeSpec),
    /// Seconds after the device clock is read
    After(f64),
}

impl StartTime {
    /// Absolute start time plus its distance from the current device time.
    pub fn resolve<C: DeviceClock + ?Sized>(self, clock: &C) -> (TimeSpec, f64) {
        let now = clock.time_now();
        match self {
            StartTime::At(time) => (time, (time - now).max(0.0)),
            StartTime::After(delay) => (now + delay, delay.max(0.0)),
        }
    }
}

/// Sends a train of identical pulses on a PRF schedule
#[derive(Debug, Clone)]
pub struct TransmitScheduler {
    schedule: PrfSchedule,
    /// Number of pulses, 0 = until cancelled
    pulse_count: usize,
    guard: f64,
}

impl TransmitScheduler {
    pub fn new(schedule: PrfSchedule, pulse_count: usize) -> Self {
        Self {
            schedule,
            pulse_count,
            guard: GUARD_MARGIN_SECS,
        }
    }

    /// Override the guard margin added to every send timeout
    pub fn with_guard(mut self, guard: f64) -> Self {
        self.guard = guard;
        self
    }

    pub fn pulse_count(&self) -> usize {
        self.pulse_count
    }

    pub fn schedule(&self) -> &PrfSchedule {
        &self.schedule
    }

    /// Transmit the pulse train and return the samples accepted per channel.
    ///
    /// Pulse `k` goes out at `start + Σ_{i<k} PRI(i)`. Cancellation is checked
    /// before each pulse. A send that accepts fewer samples than a pulse holds
    /// is logged and shows up in the returned total.
    ///
    /// # Arguments
    /// * `stream` - Transmit stream
    /// * `clock` - Device clock used to resolve `start`
    /// * `buffers` - One pulse buffer per channel, all the same length
    /// * `start` - First pulse time
    /// * `cancel` - Stop signal
    pub fn run<C: DeviceClock + ?Sized>(
        &self,
        stream: &mut dyn TxStreamer,
        clock: &C,
        buffers: &[&[Sample]],
        start: StartTime,
        cancel: &CancellationToken,
    ) -> RadarResult<usize> {
        let samples_per_pulse = check_buffers(buffers)?;
        let (mut send_time, start_offset) = start.resolve(clock);

        tracing::debug!(
            start = send_time.secs(),
            pulses = self.pulse_count,
            samples_per_pulse,
            "Transmit started"
        );

        let mut total = 0;
        let mut pulse = 0;
        while self.pulse_count == 0 || pulse < self.pulse_count {
            if cancel.is_cancelled() {
                tracing::info!(pulses_sent = pulse, "Transmit cancelled");
                break;
            }
            let pri = self.schedule.pri(pulse);
            let timeout = if pulse == 0 {
                start_offset.max(pri) + self.guard
            } else {
                pri + self.guard
            };

            let sent = send_burst(stream, buffers, send_time, secs(timeout))?;
            if sent < samples_per_pulse {
                tracing::warn!(
                    pulse,
                    sent,
                    expected = samples_per_pulse,
                    "Pulse under-delivered"
                );
            }
            tracing::debug!(pulse, time = send_time.secs(), sent, "Burst sent");

            total += sent;
            send_time = send_time + pri;
            pulse += 1;
        }

        let empty: Vec<&[Sample]> = buffers.iter().map(|b| &b[..0]).collect();
        stream.send(&empty, &TxMetadata::burst_end(), secs(self.guard))?;

        tracing::debug!(pulses = pulse, samples = total, "Transmit finished");
        Ok(total)
    }
}

fn check_buffers(buffers: &[&[Sample]]) -> RadarResult<usize> {
    let Some(first) = buffers.first() else {
        return Err(RadarError::InvalidWaveform("no transmit buffers".into()));
    };
    if first.is_empty() {
        return Err(RadarError::InvalidWaveform("transmit pulse is empty".into()));
    }
    if buffers.iter().any(|b| b.len() != first.len()) {
        return Err(RadarError::InvalidWaveform(
            "transmit buffers differ in length".into(),
        ));
    }
    Ok(first.len())
}

/// Send one pulse as a timed burst and close it; returns samples accepted
fn send_burst(
    stream: &mut dyn TxStreamer,
    buffers: &[&[Sample]],
    time: TimeSpec,
    timeout: Duration,
) -> RadarResult<usize> {
    let len = buffers[0].len();
    let mut offset = 0;
    let mut metadata = TxMetadata::burst_start(time);
    while offset < len {
        let chunk: Vec<&[Sample]> = buffers.iter().map(|b| &b[offset..]).collect();
        let sent = stream.send(&chunk, &metadata, timeout)?;
        if sent == 0 {
            break;
        }
        offset += sent;
        metadata = TxMetadata::continuation();
    }
    let empty: Vec<&[Sample]> = buffers.iter().map(|b| &b[..0]).collect();
    stream.send(&empty, &TxMetadata::burst_end(), timeout)?;
    Ok(offset)
}
