//! Device configuration and pre-acquisition checks

use super::{RadioDevice, SensorValue};
use crate::config::RadioSettings;
use crate::error::{RadarError, RadarResult};
use std::time::Duration;

const LO_LOCKED_SENSOR: &str = "lo_locked";

/// Verify that the transmit and receive LOs of `channel` report lock.
///
/// Devices without an `lo_locked` sensor pass the check.
pub fn check_lo_lock(device: &dyn RadioDevice, channel: usize) -> RadarResult<()> {
    if device
        .tx_sensor_names(channel)
        .iter()
        .any(|name| name == LO_LOCKED_SENSOR)
    {
        let sensor = device.tx_sensor(LO_LOCKED_SENSOR, channel)?;
        require_locked("Tx", &sensor)?;
    }
    if device
        .rx_sensor_names(channel)
        .iter()
        .any(|name| name == LO_LOCKED_SENSOR)
    {
        let sensor = device.rx_sensor(LO_LOCKED_SENSOR, channel)?;
        require_locked("Rx", &sensor)?;
    }
    Ok(())
}

fn require_locked(direction: &str, sensor: &SensorValue) -> RadarResult<()> {
    tracing::info!(direction, sensor = %sensor.to_pp_string(), "Checking LO lock");
    if sensor.to_bool() {
        Ok(())
    } else {
        Err(RadarError::Configuration(format!(
            "{direction} LO not locked ({})",
            sensor.to_pp_string()
        )))
    }
}

/// Apply rate, frequency and gain settings, wait for them to settle and run
/// the LO lock check on every channel in `channels`.
///
/// # Arguments
/// * `device` - Radio to configure
/// * `settings` - Requested radio settings
/// * `channels` - Channels to verify after settling
pub fn configure_device(
    device: &dyn RadioDevice,
    settings: &RadioSettings,
    channels: &[usize],
) -> RadarResult<()> {
    device.set_tx_rate(settings.sample_rate);
    device.set_rx_rate(settings.sample_rate);
    device.set_tx_freq(settings.tx_freq);
    device.set_rx_freq(settings.rx_freq);
    device.set_tx_gain(settings.tx_gain);
    device.set_rx_gain(settings.rx_gain);

    tracing::info!(
        tx_rate = device.tx_rate(),
        rx_rate = device.rx_rate(),
        master_clock = device.master_clock_rate(),
        "Configured sample rates"
    );
    tracing::info!(
        tx_freq = device.tx_freq(),
        rx_freq = device.rx_freq(),
        tx_gain = device.tx_gain(),
        rx_gain = device.rx_gain(),
        "Configured RF front end"
    );

    if settings.settle_secs > 0.0 {
        std::thread::sleep(Duration::from_secs_f64(settings.settle_secs));
    }

    for &channel in channels {
        check_lo_lock(device, channel)?;
    }
    Ok(())
}
