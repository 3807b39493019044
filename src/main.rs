//! `mppt`: track the maximum power point of a solar cell and write the trace.
//!
//! ```text
//! mppt <folder> <file_name> <seed_voltage> <track_duration> <area> <suns>
//!      [--config PATH] [--resource STRING] [--transport visa|serial|mock]
//!      [--rng-seed N] [--keep-partial] [--print-config]
//! ```
//!
//! Logging is controlled with `RUST_LOG` (default `info`).

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::Local;
use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use mppt_tracker::adapters::{SerialAdapter, VisaAdapter};
use mppt_tracker::config::{MpptSettings, TransportKind, DEFAULT_CONFIG_PATH};
use mppt_tracker::instrument::{Keithley2400, MockSourceMeter, SimulatedCell, SourceMeter};
use mppt_tracker::measurement::{StabilizationSummary, Trace};
use mppt_tracker::storage;
use mppt_tracker::{AppResult, PowerTracker, TrackerConfig};

/// Current noise of the simulated cell in mock mode (A)
const MOCK_NOISE: f64 = 1e-6;

#[derive(Parser, Debug)]
#[command(
    name = "mppt",
    version,
    about = "Maximum power point tracking through a Keithley 2400 source-meter",
    allow_negative_numbers = true
)]
struct Cli {
    /// Destination folder (created if missing)
    folder: PathBuf,
    /// Destination file name
    file_name: String,
    /// Expected maximum power point voltage from a prior J-V scan (V)
    seed_voltage: f64,
    /// Tracking duration after the dark baseline (s)
    track_duration: f64,
    /// Device area (cm^2)
    area: f64,
    /// Illumination intensity (suns)
    suns: f64,

    /// Settings file; a missing file means built-in defaults
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    /// VISA resource string, overriding the settings file
    #[arg(long)]
    resource: Option<String>,
    /// Bus transport, overriding the settings file
    #[arg(long, value_enum)]
    transport: Option<TransportKind>,
    /// Seed for the perturbation RNG
    #[arg(long)]
    rng_seed: Option<u64>,
    /// Write an aborted run's samples to `<file_name>.partial`
    #[arg(long)]
    keep_partial: bool,
    /// Print the effective settings as TOML and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut settings = MpptSettings::load_from(&cli.config)
        .with_context(|| format!("Failed to load settings from {}", cli.config.display()))?;
    if let Some(transport) = cli.transport {
        settings.instrument.transport = transport;
    }
    if let Some(resource) = &cli.resource {
        settings.instrument.resource = resource.clone();
    }
    settings.validate()?;

    let track_duration = Duration::try_from_secs_f64(cli.track_duration)
        .map_err(|e| anyhow!("Invalid track duration {}: {}", cli.track_duration, e))?;
    let config = settings.tracker_config(cli.seed_voltage, track_duration, cli.area, cli.suns);
    config.validate()?;

    if cli.print_config {
        print!("{}", settings.to_toml()?);
        return Ok(());
    }

    let path = storage::output_path(&cli.folder, &cli.file_name);
    let started = Local::now();
    info!(
        started = %started.to_rfc3339(),
        output = %path.display(),
        transport = ?settings.instrument.transport,
        "mppt starting"
    );

    let result = match settings.instrument.transport {
        TransportKind::Visa => {
            let mut adapter = VisaAdapter::new(settings.instrument.resource.clone())
                .with_timeout(settings.instrument.timeout());
            adapter.open().await?;
            let mut smu = Keithley2400::new(adapter);
            let result = track(&mut smu, config, cli.rng_seed).await;
            if let Err(e) = smu.into_inner().close().await {
                warn!("Failed to close VISA session: {}", e);
            }
            result
        }
        TransportKind::Serial => {
            let mut adapter = SerialAdapter::new(
                settings.instrument.serial_port.clone(),
                settings.instrument.baud_rate,
            )
            .with_timeout(settings.instrument.timeout());
            adapter.open().await?;
            let mut smu = Keithley2400::new(adapter);
            let result = track(&mut smu, config, cli.rng_seed).await;
            if let Err(e) = smu.into_inner().close().await {
                warn!("Failed to close serial port: {}", e);
            }
            result
        }
        TransportKind::Mock => {
            let cell = SimulatedCell::new(cli.area, cli.suns);
            let (vmp, pmp) = cell.max_power_point();
            info!(vmp, pmp, "Simulated cell maximum power point");
            let mut smu = MockSourceMeter::simulated_cell(cell)
                .with_noise(MOCK_NOISE, cli.rng_seed.unwrap_or_default());
            track(&mut smu, config, cli.rng_seed).await
        }
    };

    match result {
        Ok(trace) => {
            storage::write_trace(&path, &trace)?;
            let window = settings.tracking.summary_window();
            match StabilizationSummary::from_trace(&trace, window) {
                Some(summary) => info!(
                    window_s = window.as_secs_f64(),
                    samples = summary.samples,
                    mean_voltage = summary.mean_voltage,
                    mean_abs_j = summary.mean_abs_current_density,
                    mean_pce = summary.mean_efficiency,
                    peak_pce = summary.peak_efficiency,
                    pce_drift = summary.efficiency_drift,
                    "Stabilized output"
                ),
                None => warn!("Trace is empty, no summary"),
            }
            let elapsed = Local::now() - started;
            info!("Run finished in {:.1} s", elapsed.num_milliseconds() as f64 / 1000.0);
            Ok(())
        }
        Err(err) => {
            if cli.keep_partial {
                if let Some(partial) = err.partial_trace().filter(|t| !t.is_empty()) {
                    let written = storage::write_partial_trace(&path, partial)?;
                    warn!("Partial trace written to {}", written.display());
                }
            }
            Err(err.into())
        }
    }
}

async fn track<S: SourceMeter + ?Sized>(
    smu: &mut S,
    config: TrackerConfig,
    rng_seed: Option<u64>,
) -> AppResult<Trace> {
    match rng_seed {
        Some(seed) => {
            PowerTracker::with_rng(smu, config, StdRng::seed_from_u64(seed))
                .run()
                .await
        }
        None => PowerTracker::new(smu, config).run().await,
    }
}
