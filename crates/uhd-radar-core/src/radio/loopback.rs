//! In-process loopback radio
//!
//! Emulates a radio whose transmit port is cabled to its receive port.
//! Timed transmit bursts are placed on a sample timeline indexed by the device
//! clock, and the receive stream reads that timeline back after a fixed
//! pipeline delay, exactly like the constant DSP/FIFO latency of real hardware.
//!
//! The device clock runs in real time (seconds since the last
//! [`DeviceClock::set_time_now`]), so receive calls block until the requested
//! samples have "arrived" and transmit calls block when they are scheduled too
//! far ahead of the clock. The most recent transmit packets, stream commands
//! and receive timeouts are recorded for inspection, up to
//! [`LoopbackConfig::history_limit`] entries each.
//!
//! Transmit and receive are assumed to run at the same sample rate; the receive
//! rate indexes both timelines.

use super::{
    DeviceClock, RadioDevice, RadioError, RxErrorCode, RxMetadata, RxStreamer, SensorValue,
    StreamArgs, StreamCommand, StreamMode, TimeSpec, TxMetadata, TxStreamer,
};
use crate::Sample;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Samples per receive packet (same as a B2xx over USB 3)
const MAX_SAMPS_PER_PACKET: usize = 2040;

/// How far ahead of the device clock a timed burst may be queued
const TX_LOOKAHEAD_SECS: f64 = 0.5;

/// Bursts that ended this long before the device clock are discarded
const TX_RETENTION_SECS: f64 = 1.0;

/// Loopback radio configuration
#[derive(Debug, Clone)]
pub struct LoopbackConfig {
    /// Product name reported in the identity string
    pub product: String,
    /// Serial number reported in the identity string
    pub serial: String,
    /// Transmit-to-receive delay in samples
    pub pipeline_delay: usize,
    /// Per-sample-rate delay overrides as (rate, delay) pairs
    pub delay_overrides: Vec<(f64, usize)>,
    /// Amplitude scaling applied on the loopback path
    pub loopback_gain: f32,
    /// Number of channels in each direction
    pub num_channels: usize,
    /// Upper bound of the master clock rate
    pub max_master_clock_rate: f64,
    /// Cap on samples accepted per send call (None = accept everything)
    pub max_send_samps: Option<usize>,
    pub tx_lo_locked: bool,
    pub rx_lo_locked: bool,
    /// Report an overflow after this many delivered receive packets
    pub fail_after_packets: Option<usize>,
    /// Lock the master clock to this rate and coerce requested sample rates
    /// to integer decimations of it, as fixed-clock hardware does
    pub fixed_master_clock: Option<f64>,
    /// Entries kept in each inspection log; older entries are dropped
    pub history_limit: usize,
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        Self {
            product: "B210".to_string(),
            serial: "LOOPBACK".to_string(),
            pipeline_delay: 82,
            delay_overrides: Vec::new(),
            loopback_gain: 0.5,
            num_channels: 2,
            max_master_clock_rate: 61.44e6,
            max_send_samps: None,
            tx_lo_locked: true,
            rx_lo_locked: true,
            fail_after_packets: None,
            fixed_master_clock: None,
            history_limit: 4096,
        }
    }
}

impl LoopbackConfig {
    /// Pipeline delay in effect at a sample rate
    pub fn delay_for_rate(&self, rate: f64) -> usize {
        self.delay_overrides
            .iter()
            .find(|(r, _)| (r - rate).abs() < 0.5)
            .map(|&(_, delay)| delay)
            .unwrap_or(self.pipeline_delay)
    }

    /// Largest integer multiple of `rate` that does not exceed the clock limit,
    /// or the fixed master clock when one is configured
    pub fn master_clock_for_rate(&self, rate: f64) -> f64 {
        if let Some(master) = self.fixed_master_clock {
            return master;
        }
        if rate <= 0.0 {
            return self.max_master_clock_rate;
        }
        let decimation = (self.max_master_clock_rate / rate).floor().max(1.0);
        rate * decimation
    }

    /// Sample rate the device actually runs at when `rate` is requested
    pub fn coerce_rate(&self, rate: f64) -> f64 {
        match self.fixed_master_clock {
            Some(master) if rate > 0.0 => master / (master / rate).round().max(1.0),
            _ => rate,
        }
    }
}

fn push_bounded<T>(log: &mut VecDeque<T>, entry: T, limit: usize) {
    if limit == 0 {
        return;
    }
    while log.len() >= limit {
        log.pop_front();
    }
    log.push_back(entry);
}

/// One transmit packet as seen by the radio
#[derive(Debug, Clone, PartialEq)]
pub struct TxPacketRecord {
    /// Samples per channel accepted from this packet
    pub samples: usize,
    pub metadata: TxMetadata,
    /// Timeout passed to `send`
    pub timeout: Duration,
}

#[derive(Debug)]
struct Burst {
    start: i64,
    channels: Vec<(usize, Vec<Sample>)>,
}

impl Burst {
    fn len(&self) -> usize {
        self.channels.first().map_or(0, |(_, data)| data.len())
    }

    fn end(&self) -> i64 {
        self.start + self.len() as i64
    }

    fn channel(&self, channel: usize) -> Option<&[Sample]> {
        self.channels
            .iter()
            .find(|(c, _)| *c == channel)
            .map(|(_, data)| data.as_slice())
    }
}

#[derive(Debug, Clone, Copy)]
struct RxArm {
    next: i64,
    remaining: Option<usize>,
    late: bool,
}

#[derive(Debug)]
struct DeviceState {
    tx_rate: f64,
    rx_rate: f64,
    tx_freq: f64,
    rx_freq: f64,
    tx_gain: f64,
    rx_gain: f64,
    bursts: Vec<Burst>,
    /// Whether the newest burst is still open (no end-of-burst yet)
    burst_open: bool,
    tx_log: VecDeque<TxPacketRecord>,
    rx_arm: Option<RxArm>,
    rx_commands: VecDeque<StreamCommand>,
    rx_timeouts: VecDeque<Duration>,
    rx_packets: usize,
}

impl DeviceState {
    fn render(&self, channel: usize, first_tick: i64, out: &mut [Sample], delay: i64, gain: f32) {
        out.fill(Sample::new(0.0, 0.0));
        let tx_first = first_tick - delay;
        let tx_last = tx_first + out.len() as i64;
        for burst in &self.bursts {
            let Some(data) = burst.channel(channel) else {
                continue;
            };
            let lo = burst.start.max(tx_first);
            let hi = burst.end().min(tx_last);
            for tick in lo..hi {
                out[(tick - tx_first) as usize] += data[(tick - burst.start) as usize] * gain;
            }
        }
    }
}

struct Clock {
    epoch: Instant,
    offset: f64,
}

struct Shared {
    config: LoopbackConfig,
    clock: Mutex<Clock>,
    state: Mutex<DeviceState>,
}

impl Shared {
    fn now_secs(&self) -> f64 {
        let clock = self.clock.lock().unwrap_or_else(PoisonError::into_inner);
        clock.offset + clock.epoch.elapsed().as_secs_f64()
    }

    fn state(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_channels(&self, args: &StreamArgs) -> Result<(), RadioError> {
        if args.cpu_format != "fc32" {
            return Err(RadioError::UnsupportedFormat(args.cpu_format.clone()));
        }
        if !matches!(args.otw_format.as_str(), "sc16" | "sc12" | "sc8") {
            return Err(RadioError::UnsupportedFormat(args.otw_format.clone()));
        }
        if args.channels.is_empty() {
            return Err(RadioError::Stream("no channels requested".into()));
        }
        if let Some(&bad) = args
            .channels
            .iter()
            .find(|&&c| c >= self.config.num_channels)
        {
            return Err(RadioError::Stream(format!(
                "channel {} out of range (device has {})",
                bad, self.config.num_channels
            )));
        }
        Ok(())
    }
}

/// Simulated radio with its transmit port looped back to its receive port
///
/// # Example
/// ```
/// use uhd_radar_core::radio::loopback::{LoopbackConfig, LoopbackRadio};
/// use uhd_radar_core::radio::RadioDevice;
///
/// let radio = LoopbackRadio::new(LoopbackConfig::default());
/// radio.set_rx_rate(20e6);
/// assert_eq!(radio.rx_rate(), 20e6);
/// ```
#[derive(Clone)]
pub struct LoopbackRadio {
    shared: Arc<Shared>,
}

impl LoopbackRadio {
    pub fn new(config: LoopbackConfig) -> Self {
        let rate = 10e6;
        let state = DeviceState {
            tx_rate: rate,
            rx_rate: rate,
            tx_freq: 0.0,
            rx_freq: 0.0,
            tx_gain: 0.0,
            rx_gain: 0.0,
            bursts: Vec::new(),
            burst_open: false,
            tx_log: VecDeque::new(),
            rx_arm: None,
            rx_commands: VecDeque::new(),
            rx_timeouts: VecDeque::new(),
            rx_packets: 0,
        };
        Self {
            shared: Arc::new(Shared {
                config,
                clock: Mutex::new(Clock {
                    epoch: Instant::now(),
                    offset: 0.0,
                }),
                state: Mutex::new(state),
            }),
        }
    }

    pub fn config(&self) -> &LoopbackConfig {
        &self.shared.config
    }

    /// Recent transmit packets, oldest first
    pub fn tx_log(&self) -> Vec<TxPacketRecord> {
        self.shared.state().tx_log.iter().cloned().collect()
    }

    /// Recent receive stream commands, oldest first
    pub fn rx_commands(&self) -> Vec<StreamCommand> {
        self.shared.state().rx_commands.iter().copied().collect()
    }

    /// Timeouts of recent `recv` calls, oldest first
    pub fn rx_timeouts(&self) -> Vec<Duration> {
        self.shared.state().rx_timeouts.iter().copied().collect()
    }
}

impl DeviceClock for LoopbackRadio {
    fn time_now(&self) -> TimeSpec {
        TimeSpec::from_secs(self.shared.now_secs())
    }

    fn set_time_now(&self, time: TimeSpec) {
        let mut clock = self.shared.clock.lock().unwrap_or_else(PoisonError::into_inner);
        clock.epoch = Instant::now();
        clock.offset = time.secs();
    }
}

impl RadioDevice for LoopbackRadio {
    fn identity(&self) -> String {
        format!("{}-{}", self.shared.config.product, self.shared.config.serial)
    }

    fn set_tx_rate(&self, rate: f64) {
        self.shared.state().tx_rate = self.shared.config.coerce_rate(rate);
    }

    fn tx_rate(&self) -> f64 {
        self.shared.state().tx_rate
    }

    fn set_rx_rate(&self, rate: f64) {
        self.shared.state().rx_rate = self.shared.config.coerce_rate(rate);
    }

    fn rx_rate(&self) -> f64 {
        self.shared.state().rx_rate
    }

    fn master_clock_rate(&self) -> f64 {
        let rate = self.shared.state().rx_rate;
        self.shared.config.master_clock_for_rate(rate)
    }

    fn set_tx_freq(&self, freq: f64) {
        self.shared.state().tx_freq = freq;
    }

    fn tx_freq(&self) -> f64 {
        self.shared.state().tx_freq
    }

    fn set_rx_freq(&self, freq: f64) {
        self.shared.state().rx_freq = freq;
    }

    fn rx_freq(&self) -> f64 {
        self.shared.state().rx_freq
    }

    fn set_tx_gain(&self, gain: f64) {
        self.shared.state().tx_gain = gain;
    }

    fn tx_gain(&self) -> f64 {
        self.shared.state().tx_gain
    }

    fn set_rx_gain(&self, gain: f64) {
        self.shared.state().rx_gain = gain;
    }

    fn rx_gain(&self) -> f64 {
        self.shared.state().rx_gain
    }

    fn tx_sensor_names(&self, _channel: usize) -> Vec<String> {
        vec!["lo_locked".to_string()]
    }

    fn tx_sensor(&self, name: &str, channel: usize) -> Result<SensorValue, RadioError> {
        match name {
            "lo_locked" if channel < self.shared.config.num_channels => {
                Ok(SensorValue::boolean(name, self.shared.config.tx_lo_locked))
            }
            _ => Err(RadioError::Sensor(format!("no tx sensor {name} on channel {channel}"))),
        }
    }

    fn rx_sensor_names(&self, _channel: usize) -> Vec<String> {
        vec!["lo_locked".to_string()]
    }

    fn rx_sensor(&self, name: &str, channel: usize) -> Result<SensorValue, RadioError> {
        match name {
            "lo_locked" if channel < self.shared.config.num_channels => {
                Ok(SensorValue::boolean(name, self.shared.config.rx_lo_locked))
            }
            _ => Err(RadioError::Sensor(format!("no rx sensor {name} on channel {channel}"))),
        }
    }

    fn tx_stream(&self, args: &StreamArgs) -> Result<Box<dyn TxStreamer>, RadioError> {
        self.shared.check_channels(args)?;
        Ok(Box::new(LoopbackTxStream {
            shared: Arc::clone(&self.shared),
            channels: args.channels.clone(),
        }))
    }

    fn rx_stream(&self, args: &StreamArgs) -> Result<Box<dyn RxStreamer>, RadioError> {
        self.shared.check_channels(args)?;
        Ok(Box::new(LoopbackRxStream {
            shared: Arc::clone(&self.shared),
            channels: args.channels.clone(),
        }))
    }
}

struct LoopbackTxStream {
    shared: Arc<Shared>,
    channels: Vec<usize>,
}

impl TxStreamer for LoopbackTxStream {
    fn send(
        &mut self,
        buffers: &[&[Sample]],
        metadata: &TxMetadata,
        timeout: Duration,
    ) -> Result<usize, RadioError> {
        if buffers.len() != self.channels.len() {
            return Err(RadioError::Stream(format!(
                "expected {} tx buffers, got {}",
                self.channels.len(),
                buffers.len()
            )));
        }
        let len = buffers.first().map_or(0, |b| b.len());
        if buffers.iter().any(|b| b.len() != len) {
            return Err(RadioError::Stream("tx buffers differ in length".into()));
        }

        // Flow control: hold timed packets until they fall inside the lookahead window
        if metadata.has_time_spec && len > 0 {
            let wait = metadata.time_spec.secs() - TX_LOOKAHEAD_SECS - self.shared.now_secs();
            if wait > 0.0 {
                if wait > timeout.as_secs_f64() {
                    std::thread::sleep(timeout);
                    return Ok(0);
                }
                std::thread::sleep(Duration::from_secs_f64(wait));
            }
        }

        let accepted = self
            .shared
            .config
            .max_send_samps
            .map_or(len, |cap| len.min(cap));
        let now = self.shared.now_secs();
        let mut state = self.shared.state();
        let rate = state.tx_rate;
        let record = TxPacketRecord {
            samples: accepted,
            metadata: *metadata,
            timeout,
        };
        push_bounded(&mut state.tx_log, record, self.shared.config.history_limit);

        if accepted > 0 {
            let starts_burst =
                metadata.start_of_burst || metadata.has_time_spec || !state.burst_open;
            if starts_burst {
                let start = if metadata.has_time_spec {
                    metadata.time_spec.to_ticks(rate)
                } else {
                    TimeSpec::from_secs(now).to_ticks(rate)
                };
                let channels = self
                    .channels
                    .iter()
                    .zip(buffers)
                    .map(|(&c, data)| (c, data[..accepted].to_vec()))
                    .collect();
                state.bursts.push(Burst { start, channels });
                state.burst_open = true;
            } else if let Some(burst) = state.bursts.last_mut() {
                for ((_, data), input) in burst.channels.iter_mut().zip(buffers) {
                    data.extend_from_slice(&input[..accepted]);
                }
            }
        }
        if metadata.end_of_burst {
            state.burst_open = false;
        }

        let horizon = TimeSpec::from_secs(now - TX_RETENTION_SECS).to_ticks(rate);
        state.bursts.retain(|b| b.end() >= horizon);

        Ok(accepted)
    }
}

struct LoopbackRxStream {
    shared: Arc<Shared>,
    channels: Vec<usize>,
}

impl LoopbackRxStream {
    fn time_out(&self, deadline: Instant, metadata: &mut RxMetadata) -> usize {
        std::thread::sleep(deadline.saturating_duration_since(Instant::now()));
        metadata.set_error(RxErrorCode::Timeout, "no packet received before timeout");
        0
    }
}

impl RxStreamer for LoopbackRxStream {
    fn max_num_samps(&self) -> usize {
        MAX_SAMPS_PER_PACKET
    }

    fn issue_stream_cmd(&mut self, command: &StreamCommand) -> Result<(), RadioError> {
        let now = self.shared.now_secs();
        let mut state = self.shared.state();
        push_bounded(&mut state.rx_commands, *command, self.shared.config.history_limit);
        let rate = state.rx_rate;
        let start_tick = |cmd: &StreamCommand| {
            if cmd.stream_now {
                TimeSpec::from_secs(now).to_ticks(rate)
            } else {
                cmd.time_spec.to_ticks(rate)
            }
        };
        let late = !command.stream_now && command.time_spec.secs() < now;
        state.rx_arm = match command.mode {
            StreamMode::StopContinuous => None,
            StreamMode::NumSampsAndDone(n) => Some(RxArm {
                next: start_tick(command),
                remaining: Some(n),
                late,
            }),
            StreamMode::StartContinuous => Some(RxArm {
                next: start_tick(command),
                remaining: None,
                late,
            }),
        };
        Ok(())
    }

    fn recv(
        &mut self,
        buffers: &mut [&mut [Sample]],
        metadata: &mut RxMetadata,
        timeout: Duration,
    ) -> usize {
        metadata.reset();
        {
            let mut state = self.shared.state();
            push_bounded(&mut state.rx_timeouts, timeout, self.shared.config.history_limit);
        }
        let deadline = Instant::now() + timeout;
        let requested = buffers
            .iter()
            .map(|b| b.len())
            .min()
            .unwrap_or(0)
            .min(MAX_SAMPS_PER_PACKET);

        loop {
            let now = self.shared.now_secs();
            let mut state = self.shared.state();
            let Some(arm) = state.rx_arm else {
                drop(state);
                return self.time_out(deadline, metadata);
            };
            if arm.late {
                state.rx_arm = None;
                metadata.set_error(RxErrorCode::LateCommand, "stream command arrived late");
                return 0;
            }
            let count = arm.remaining.map_or(requested, |r| r.min(requested));
            if count == 0 {
                drop(state);
                return self.time_out(deadline, metadata);
            }

            let rate = state.rx_rate;
            let ready_at = (arm.next + count as i64) as f64 / rate;
            if now >= ready_at {
                if let Some(limit) = self.shared.config.fail_after_packets {
                    if state.rx_packets >= limit {
                        metadata.set_error(RxErrorCode::Overflow, "overflow: samples dropped");
                        return 0;
                    }
                }
                let delay = self.shared.config.delay_for_rate(rate) as i64;
                let gain = self.shared.config.loopback_gain;
                for (&channel, buffer) in self.channels.iter().zip(buffers.iter_mut()) {
                    state.render(channel, arm.next, &mut buffer[..count], delay, gain);
                }
                metadata.time_spec = Some(TimeSpec::from_secs(arm.next as f64 / rate));
                state.rx_arm = Some(RxArm {
                    next: arm.next + count as i64,
                    remaining: arm.remaining.map(|r| r - count),
                    late: false,
                });
                state.rx_packets += 1;
                return count;
            }
            drop(state);

            let wait = Duration::from_secs_f64(ready_at - now);
            if Instant::now() + wait > deadline {
                return self.time_out(deadline, metadata);
            }
            std::thread::sleep(wait);
        }
    }
}
