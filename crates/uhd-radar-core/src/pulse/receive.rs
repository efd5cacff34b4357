//! Timed sample capture
//!
//! A capture is armed with one stream command at an absolute device time and
//! then drained packet by packet:
//! - Bounded captures request exactly N samples and stop when N arrive
//! - Unbounded captures (N = 0) stream continuously until cancelled
//!
//! A receive timeout ends the capture early without an error; the caller sees
//! it as a short count. Any other receive status aborts the capture.

use super::cancel::CancellationToken;
use super::secs;
use super::transmit::StartTime;
use crate::error::{RadarError, RadarResult};
use crate::radio::{DeviceClock, RxErrorCode, RxMetadata, RxStreamer, StreamCommand, StreamMode};
use crate::{Sample, GUARD_MARGIN_SECS, STEADY_STATE_TIMEOUT_SECS};

/// Per-channel capture storage
///
/// Bounded buffers are preallocated to the requested count; unbounded ones
/// grow as samples arrive.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureBuffer {
    channels: Vec<Vec<Sample>>,
    unbounded: bool,
    /// Requested samples per channel, 0 when unbounded
    requested: usize,
    /// Samples written per channel
    len: usize,
}

impl CaptureBuffer {
    /// Buffer for exactly `samples` samples on each of `num_channels` channels.
    ///
    /// A count of 0 means "until cancelled" and yields an unbounded buffer.
    pub fn bounded(num_channels: usize, samples: usize) -> Self {
        if samples == 0 {
            return Self::unbounded(num_channels);
        }
        Self {
            channels: vec![vec![Sample::new(0.0, 0.0); samples]; num_channels],
            unbounded: false,
            requested: samples,
            len: 0,
        }
    }

    /// Growable buffer for a continuous capture
    pub fn unbounded(num_channels: usize) -> Self {
        Self {
            channels: vec![Vec::new(); num_channels],
            unbounded: true,
            requested: 0,
            len: 0,
        }
    }

    pub fn is_unbounded(&self) -> bool {
        self.unbounded
    }

    pub fn requested(&self) -> usize {
        self.requested
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    /// Samples written per channel
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// A bounded capture that stopped short of its requested count
    pub fn is_degraded(&self) -> bool {
        !self.is_unbounded() && self.len < self.requested
    }

    /// Samples written on channel `index`
    pub fn channel(&self, index: usize) -> &[Sample] {
        &self.channels[index][..self.len]
    }

    /// Take ownership of the written samples, one vector per channel
    pub fn into_channels(self) -> Vec<Vec<Sample>> {
        let len = self.len;
        self.channels
            .into_iter()
            .map(|mut data| {
                data.truncate(len);
                data
            })
            .collect()
    }

    /// Drop the first `n` samples of every channel.
    ///
    /// Used to remove the receive pipeline delay; the requested count shrinks
    /// by the same amount so degradation is judged on the trimmed capture.
    pub fn trim_front(&mut self, n: usize) {
        let n = n.min(self.len);
        for data in &mut self.channels {
            data.truncate(self.len);
            data.drain(..n);
        }
        self.len -= n;
        self.requested = self.requested.saturating_sub(n);
    }

    /// Writable slots for the next `count` samples on every channel
    fn write_slots(&mut self, count: usize) -> Vec<&mut [Sample]> {
        let start = self.len;
        let unbounded = self.is_unbounded();
        self.channels
            .iter_mut()
            .map(|data| {
                if unbounded {
                    data.resize(start + count, Sample::new(0.0, 0.0));
                }
                &mut data[start..start + count]
            })
            .collect()
    }

    fn commit(&mut self, written: usize) {
        self.len += written;
        if self.is_unbounded() {
            for data in &mut self.channels {
                data.truncate(self.len);
            }
        }
    }
}

/// Drains a receive stream into a [`CaptureBuffer`]
#[derive(Debug, Clone)]
pub struct ReceiveCollector {
    /// Added to the start offset for the first receive timeout
    guard: f64,
    /// Timeout for every receive after the first
    steady_timeout: f64,
}

impl Default for ReceiveCollector {
    fn default() -> Self {
        Self {
            guard: GUARD_MARGIN_SECS,
            steady_timeout: STEADY_STATE_TIMEOUT_SECS,
        }
    }
}

impl ReceiveCollector {
    pub fn new(guard: f64, steady_timeout: f64) -> Self {
        Self {
            guard,
            steady_timeout,
        }
    }

    /// Arm the stream at `start`, fill `capture`, and return the samples received.
    ///
    /// A stop command is issued on every exit path.
    ///
    /// # Arguments
    /// * `stream` - Receive stream
    /// * `clock` - Device clock used to resolve `start`
    /// * `capture` - Destination, bounded or unbounded
    /// * `start` - Device time of the first sample
    /// * `cancel` - Stop signal, honoured in unbounded mode only
    pub fn run<C: DeviceClock + ?Sized>(
        &self,
        stream: &mut dyn RxStreamer,
        clock: &C,
        capture: &mut CaptureBuffer,
        start: StartTime,
        cancel: &CancellationToken,
    ) -> RadarResult<usize> {
        let (start_time, start_offset) = start.resolve(clock);
        let mode = if capture.is_unbounded() {
            StreamMode::StartContinuous
        } else {
            StreamMode::NumSampsAndDone(capture.requested() - capture.len())
        };
        tracing::debug!(start = start_time.secs(), ?mode, "Arming receive");
        stream.issue_stream_cmd(&StreamCommand::timed(mode, start_time))?;

        let result = self.collect(stream, capture, start_offset, cancel);

        if let Err(err) = stream.issue_stream_cmd(&StreamCommand::stop()) {
            tracing::warn!(error = %err, "Failed to stop receive stream");
        }
        result
    }

    fn collect(
        &self,
        stream: &mut dyn RxStreamer,
        capture: &mut CaptureBuffer,
        start_offset: f64,
        cancel: &CancellationToken,
    ) -> RadarResult<usize> {
        let max_samps = stream.max_num_samps().max(1);
        let mut metadata = RxMetadata::default();
        let mut timeout = start_offset + self.guard;
        let mut received = 0;

        loop {
            let count = if capture.is_unbounded() {
                if cancel.is_cancelled() {
                    tracing::info!(received, "Receive cancelled");
                    break;
                }
                max_samps
            } else {
                let remaining = capture.requested() - capture.len();
                if remaining == 0 {
                    break;
                }
                remaining.min(max_samps)
            };

            let n = {
                let mut slots = capture.write_slots(count);
                stream.recv(&mut slots, &mut metadata, secs(timeout))
            };
            capture.commit(n);
            received += n;

            match metadata.error_code {
                RxErrorCode::None => {}
                RxErrorCode::Timeout => {
                    if capture.is_degraded() {
                        tracing::warn!(
                            received = capture.len(),
                            requested = capture.requested(),
                            "Receive timed out before capture completed"
                        );
                    } else {
                        tracing::debug!(received, "Receive timed out");
                    }
                    break;
                }
                code => {
                    tracing::error!(?code, message = %metadata.error_string, "Receive failed");
                    return Err(RadarError::Device {
                        code,
                        message: metadata.error_string.clone(),
                    });
                }
            }
            timeout = self.steady_timeout;
        }

        tracing::debug!(received, "Receive finished");
        Ok(received)
    }
}
