//! uhd-radar - pulsed radar on software-defined radios
//!
//! Entry point for the command-line tool.

use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use uhd_radar::calibration::engine::SweepFailurePolicy;
use uhd_radar::radio::preflight::configure_device;
use uhd_radar::{
    CalibrationStore, CancellationToken, DelayCalibrationEngine, PulseAcquisition, RadarConfig,
    RadioDevice, StreamSession,
};

/// Command-line options shared by all commands
#[derive(Debug, Default)]
struct Options {
    config: Option<PathBuf>,
    device_args: Option<String>,
    store: Option<PathBuf>,
    pulses: Option<usize>,
    rates: Option<Vec<f64>>,
    skip_failures: bool,
    json: bool,
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("uhd_radar=info".parse()?)
                .add_directive("uhd_radar_core=info".parse()?),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let Some(command) = args.get(1) else {
        print_help();
        return Ok(());
    };

    match command.as_str() {
        "--version" | "-v" => {
            println!("uhd-radar {} ({})", uhd_radar::VERSION, uhd_radar::BUILD_DATE);
            Ok(())
        }
        "--help" | "-h" | "help" => {
            print_help();
            Ok(())
        }
        "calibrate" => {
            let options = parse_options(&args[2..])?;
            run_calibration(&load_config(&options)?)
        }
        "capture" => {
            let options = parse_options(&args[2..])?;
            run_capture(&load_config(&options)?)
        }
        "show-calibration" => {
            let options = parse_options(&args[2..])?;
            show_calibration(&load_config(&options)?, &options)
        }
        other => {
            eprintln!("Unknown command: {}", other);
            print_help();
            Ok(())
        }
    }
}

fn print_help() {
    println!("Usage: uhd-radar <COMMAND> [OPTIONS]");
    println!();
    println!("Commands:");
    println!("  calibrate               Measure the pipeline delay at every candidate rate");
    println!("  capture                 Transmit a pulse train and capture the echoes");
    println!("  show-calibration        List the stored delay table");
    println!();
    println!("Options:");
    println!("  -c, --config PATH       Config file (default: per-user config.json)");
    println!("  -a, --args ARGS         Device args, e.g. type=loopback,delay=66");
    println!("  -s, --store PATH        Calibration table file");
    println!("  -n, --pulses N          Pulses per capture (0 = until Ctrl+C)");
    println!("  -r, --rates LIST        Comma-separated calibration rates in Hz");
    println!("      --skip-failures     Skip rates whose probe is unusable");
    println!("      --json              Print the calibration table as JSON");
    println!("  -v, --version           Show version");
    println!("  -h, --help              Show this help");
    println!();
    println!("Examples:");
    println!("  uhd-radar calibrate -a type=loopback,delay=66 -r 10e6,20e6");
    println!("  uhd-radar capture -n 100");
}

fn parse_options(args: &[String]) -> Result<Options> {
    let mut options = Options::default();
    let mut i = 0;
    while i < args.len() {
        let value = || {
            args.get(i + 1)
                .cloned()
                .with_context(|| format!("{} requires a value", args[i]))
        };
        match args[i].as_str() {
            "--config" | "-c" => options.config = Some(PathBuf::from(value()?)),
            "--args" | "-a" => options.device_args = Some(value()?),
            "--store" | "-s" => options.store = Some(PathBuf::from(value()?)),
            "--pulses" | "-n" => {
                let raw = value()?;
                options.pulses = Some(
                    raw.parse()
                        .with_context(|| format!("Invalid pulse count: {}", raw))?,
                );
            }
            "--rates" | "-r" => {
                let raw = value()?;
                let rates = raw
                    .split(',')
                    .map(|r| r.trim().parse::<f64>())
                    .collect::<Result<Vec<_>, _>>()
                    .with_context(|| format!("Invalid rate list: {}", raw))?;
                options.rates = Some(rates);
            }
            "--skip-failures" => {
                options.skip_failures = true;
                i += 1;
                continue;
            }
            "--json" => {
                options.json = true;
                i += 1;
                continue;
            }
            other => bail!("Unknown argument: {}", other),
        }
        i += 2;
    }
    Ok(options)
}

fn load_config(options: &Options) -> Result<RadarConfig> {
    let mut config = match &options.config {
        Some(path) => RadarConfig::load(path)?,
        None => RadarConfig::load_or_default(&RadarConfig::default_path()),
    };
    if let Some(args) = &options.device_args {
        config.device_args = args.clone();
    }
    if let Some(store) = &options.store {
        config.store_path = Some(store.clone());
    }
    if let Some(pulses) = options.pulses {
        config.waveform.pulse_count = pulses;
    }
    if let Some(rates) = &options.rates {
        config.calibration.sample_rates = rates.clone();
    }
    if options.skip_failures {
        config.calibration.failure_policy = SweepFailurePolicy::Skip;
    }
    Ok(config)
}

/// Open the radio, apply the RF settings and create the stream session
fn open_session(config: &RadarConfig) -> Result<StreamSession> {
    let device: Arc<dyn RadioDevice> = uhd_radar::radio::open(&config.device_args)
        .with_context(|| format!("Failed to open radio '{}'", config.device_args))?;
    info!(device = %device.identity(), "Radio opened");

    configure_device(device.as_ref(), &config.radio, &config.stream.channels)
        .context("Radio configuration failed")?;
    let session = StreamSession::open(device, config.stream_args())?;
    Ok(session)
}

/// Cancellation token fired by Ctrl+C
fn ctrlc_token() -> CancellationToken {
    let token = CancellationToken::new();
    let handle = token.clone();
    ctrlc::set_handler(move || {
        handle.cancel();
    })
    .ok();
    token
}

fn run_calibration(config: &RadarConfig) -> Result<()> {
    let mut session = open_session(config)?;
    let cancel = ctrlc_token();
    let store_path = config.store_path();

    let mut engine = DelayCalibrationEngine::new(config.calibration.clone())
        .with_coordinator(config.coordinator());
    let report = match engine.run(&mut session, &store_path, &cancel) {
        Ok(report) => report,
        Err(e) => {
            error!("Calibration failed: {}", e);
            return Err(e.into());
        }
    };

    println!("Calibration written to {}", report.store_path.display());
    println!();
    println!("  {:>14}  {:>14}  {:>8}", "sample rate", "master clock", "delay");
    for probe in &report.measured {
        println!(
            "  {:>11.3} MHz  {:>10.3} MHz  {:>8}",
            probe.key.sample_rate / 1e6,
            probe.key.master_clock_rate / 1e6,
            probe.delay_samples
        );
    }
    for (rate, reason) in &report.skipped {
        println!("  {:>11.3} MHz  skipped: {}", rate / 1e6, reason);
    }
    println!();
    println!("{} record(s) in table", report.total_records);

    session.close();
    Ok(())
}

fn run_capture(config: &RadarConfig) -> Result<()> {
    let mut session = open_session(config)?;
    let waveform = config.waveform_at(session.device().rx_rate())?;
    let cancel = ctrlc_token();
    let store = CalibrationStore::load(config.store_path())?;

    if config.waveform.pulse_count == 0 {
        println!("Capturing until Ctrl+C...");
    }
    let acquisition = PulseAcquisition::new(&store, config.coordinator()).acquire(
        &mut session,
        &waveform,
        config.waveform.pulse_count,
        &cancel,
    )?;

    println!(
        "Sent {} samples, captured {} samples per channel (delay {} trimmed){}",
        acquisition.samples_sent,
        acquisition.capture.len(),
        acquisition.delay_samples,
        if acquisition.degraded { " [DEGRADED]" } else { "" }
    );
    for (index, channel) in session.channels().iter().enumerate() {
        let data = acquisition.capture.channel(index);
        let peak = data.iter().map(|s| s.norm()).fold(0.0f32, f32::max);
        println!("  channel {}: peak magnitude {:.4}", channel, peak);
    }

    session.close();
    Ok(())
}

fn show_calibration(config: &RadarConfig, options: &Options) -> Result<()> {
    let store = CalibrationStore::load(config.store_path())?;
    if options.json {
        println!("{}", serde_json::to_string_pretty(store.records())?);
        return Ok(());
    }
    if store.is_empty() {
        println!("No calibration records in {}", store.path().display());
        return Ok(());
    }
    println!("Calibration table {}:", store.path().display());
    for record in store.records() {
        println!(
            "  {}  mcr {:.3} MHz  rate {:.3} MHz  delay {}  ({})",
            record.key.radio,
            record.key.master_clock_rate / 1e6,
            record.key.sample_rate / 1e6,
            record.delay_samples,
            record.measured_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
    }
    Ok(())
}
