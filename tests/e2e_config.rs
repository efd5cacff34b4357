//! E2E tests for persistent configuration
//!
//! Tests that a config file on disk drives device setup, calibration and
//! capture the same way the command-line tool wires them together.

use tempfile::TempDir;
use uhd_radar::calibration::engine::SweepFailurePolicy;
use uhd_radar::radio::preflight::configure_device;
use uhd_radar::{
    CalibrationStore, CancellationToken, DelayCalibrationEngine, PulseAcquisition, RadarConfig,
    RadarError, StreamSession,
};

/// Config used by the tests: loopback radio, no settle wait, short lead time
fn write_config(dir: &TempDir) -> std::path::PathBuf {
    let path = dir.path().join("config.json");
    let store = dir.path().join("delay_calibration.json");
    let json = serde_json::json!({
        "device_args": "type=loopback,serial=CFG,delay=30",
        "radio": { "sample_rate": 10e6, "settle_secs": 0.0 },
        "waveform": { "bandwidth": 2e6, "pulse_width": 20e-6, "prf": [10e3], "pulse_count": 4 },
        "timing": { "start_delay": 0.02 },
        "calibration": {
            "sample_rates": [10e6],
            "failure_policy": "skip"
        },
        "store_path": store,
    });
    std::fs::write(&path, serde_json::to_string_pretty(&json).unwrap()).unwrap();
    path
}

fn open_session(config: &RadarConfig) -> StreamSession {
    let device = uhd_radar::radio::open(&config.device_args).expect("loopback opens");
    configure_device(device.as_ref(), &config.radio, &config.stream.channels)
        .expect("radio configures");
    StreamSession::open(device, config.stream_args()).expect("session opens")
}

#[test]
fn test_config_file_fields() {
    let dir = TempDir::new().unwrap();
    let config = RadarConfig::load(&write_config(&dir)).unwrap();

    assert_eq!(config.device_args, "type=loopback,serial=CFG,delay=30");
    assert_eq!(config.radio.sample_rate, 10e6);
    assert_eq!(config.radio.tx_freq, 5e9, "Unnamed field keeps its default");
    assert_eq!(config.waveform.pulse_count, 4);
    assert_eq!(config.calibration.failure_policy, SweepFailurePolicy::Skip);
    assert_eq!(config.store_path(), dir.path().join("delay_calibration.json"));
    assert_eq!(config.coordinator().safety_margin(), 0.02);
}

/// Test calibrate-then-capture driven entirely by a config file
#[test]
fn test_config_drives_calibration_and_capture() {
    let dir = TempDir::new().unwrap();
    let config = RadarConfig::load(&write_config(&dir)).unwrap();
    let mut session = open_session(&config);

    let report = DelayCalibrationEngine::new(config.calibration.clone())
        .with_coordinator(config.coordinator())
        .run(&mut session, &config.store_path(), &CancellationToken::new())
        .expect("calibration succeeds");
    assert_eq!(report.measured.len(), 1);
    assert_eq!(report.measured[0].delay_samples, 30);
    assert_eq!(report.measured[0].key.radio, "B210-CFG");

    // The sweep leaves the radio at the last probed rate, which matches the capture rate
    let store = CalibrationStore::load(config.store_path()).unwrap();
    let waveform = config.waveform().unwrap();
    let acquisition = PulseAcquisition::new(&store, config.coordinator())
        .acquire(
            &mut session,
            &waveform,
            config.waveform.pulse_count,
            &CancellationToken::new(),
        )
        .unwrap();

    assert_eq!(acquisition.delay_samples, 30);
    assert_eq!(acquisition.capture.len(), waveform.total_samples(4));
    assert!(acquisition.capture.channel(0)[0].norm() > 0.0, "Echo starts at sample 0");
}

#[test]
fn test_invalid_waveform_config_rejected() {
    let mut config = RadarConfig::default();
    config.waveform.prf = vec![];
    assert!(config.waveform().is_err());

    config.waveform.prf = vec![10e3];
    config.waveform.pulse_width = 1e-3;
    assert!(matches!(config.waveform(), Err(RadarError::InvalidWaveform(_))));
}

#[test]
fn test_unknown_device_type_fails_to_open() {
    let mut config = RadarConfig::default();
    config.device_args = "type=n310".into();
    assert!(uhd_radar::radio::open(&config.device_args).is_err());
}
