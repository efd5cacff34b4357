//! uhd-radar - pulsed radar on software-defined radios
//!
//! This library re-exports the streaming engine, calibration subsystem and
//! radio contract from `uhd-radar-core`.

pub use uhd_radar_core::calibration;
pub use uhd_radar_core::config;
pub use uhd_radar_core::error;
pub use uhd_radar_core::pulse;
pub use uhd_radar_core::radio;

pub use uhd_radar_core::{
    Acquisition, CalibrationKey, CalibrationRecord, CalibrationStore, CancellationToken,
    CaptureBuffer, DelayCalibrationEngine, DuplexCoordinator, DuplexReport, LinearFmWaveform,
    LoopbackConfig, LoopbackRadio, PrfSchedule, PulseAcquisition, RadarConfig, RadarError,
    RadarResult, RadioDevice, ReceiveCollector, RxStreamer, StartTime, StreamSession,
    TransmitScheduler, TxStreamer,
};
pub use uhd_radar_core::{Sample, BUILD_DATE, VERSION};
