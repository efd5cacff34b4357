//! Stream session: one transmit and one receive stream bound to a channel set
//!
//! A session is created once per device and reused for every duplex cycle
//! (captures and calibration probes). Closing it drops both streams; the
//! session also closes itself on drop.

use super::{RadioDevice, RxStreamer, StreamArgs, TxStreamer};
use crate::error::{RadarError, RadarResult};
use std::sync::Arc;

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Open,
    Closed,
}

/// Owned tx/rx stream pair for one device
pub struct StreamSession {
    device: Arc<dyn RadioDevice>,
    args: StreamArgs,
    tx: Option<Box<dyn TxStreamer>>,
    rx: Option<Box<dyn RxStreamer>>,
}

impl StreamSession {
    /// Create both streams for `args.channels`.
    ///
    /// Only the `fc32` host format is supported.
    pub fn open(device: Arc<dyn RadioDevice>, args: StreamArgs) -> RadarResult<Self> {
        if args.cpu_format != "fc32" {
            return Err(RadarError::Configuration(format!(
                "host sample format '{}' is not supported, use fc32",
                args.cpu_format
            )));
        }
        let tx = device.tx_stream(&args)?;
        let rx = device.rx_stream(&args)?;
        tracing::info!(
            device = %device.identity(),
            channels = ?args.channels,
            cpu_format = %args.cpu_format,
            otw_format = %args.otw_format,
            "Stream session opened"
        );
        Ok(Self {
            device,
            args,
            tx: Some(tx),
            rx: Some(rx),
        })
    }

    pub fn device(&self) -> &Arc<dyn RadioDevice> {
        &self.device
    }

    pub fn channels(&self) -> &[usize] {
        &self.args.channels
    }

    pub fn args(&self) -> &StreamArgs {
        &self.args
    }

    pub fn state(&self) -> SessionState {
        if self.tx.is_some() && self.rx.is_some() {
            SessionState::Open
        } else {
            SessionState::Closed
        }
    }

    /// Borrow both streams at once so they can be driven from two threads
    pub fn streams(&mut self) -> RadarResult<(&mut dyn TxStreamer, &mut dyn RxStreamer)> {
        match (self.tx.as_deref_mut(), self.rx.as_deref_mut()) {
            (Some(tx), Some(rx)) => {
                let tx: &mut dyn TxStreamer = tx;
                let rx: &mut dyn RxStreamer = rx;
                Ok((tx, rx))
            }
            _ => Err(RadarError::Configuration("stream session is closed".into())),
        }
    }

    /// Release both streams. Further duplex cycles on this session fail.
    pub fn close(&mut self) {
        if self.tx.take().is_some() | self.rx.take().is_some() {
            tracing::info!(device = %self.device.identity(), "Stream session closed");
        }
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radio::loopback::{LoopbackConfig, LoopbackRadio};

    fn device() -> Arc<dyn RadioDevice> {
        Arc::new(LoopbackRadio::new(LoopbackConfig::default()))
    }

    #[test]
    fn test_open_and_close() {
        let mut session = StreamSession::open(device(), StreamArgs::default()).unwrap();
        assert_eq!(session.state(), SessionState::Open);
        assert_eq!(session.channels(), &[0]);
        assert!(session.streams().is_ok());

        session.close();
        assert_eq!(session.state(), SessionState::Closed);
        assert!(session.streams().is_err(), "Closed session must not hand out streams");
    }

    #[test]
    fn test_rejects_non_fc32_host_format() {
        let args = StreamArgs {
            cpu_format: "sc16".into(),
            ..Default::default()
        };
        let result = StreamSession::open(device(), args);
        assert!(matches!(result, Err(RadarError::Configuration(_))));
    }

    #[test]
    fn test_bad_channel_maps_to_device_error() {
        let args = StreamArgs {
            channels: vec![9],
            ..Default::default()
        };
        let err = StreamSession::open(device(), args).err().unwrap();
        assert!(err.is_device_error());
        assert!(
            matches!(err, RadarError::Radio(crate::radio::RadioError::Stream(_))),
            "Stream creation failure keeps its radio error: {err}"
        );
        assert!(!err.to_string().contains("None"));
    }
}
