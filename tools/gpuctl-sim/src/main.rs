//! Exercise the gpuctl control loop without touching real hardware.
//!
//! `run` drives a simulated GPU in real time through the same daemon path a
//! real binding would use, with a thermal model feeding back the effect of
//! fan speed and power limit. `replay` feeds a recorded temperature trace
//! through the controller, resampled to the control interval, for offline
//! tuning.

mod model;
mod trace;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use gpuctl::config::{Config, Overrides};
use gpuctl::control::GpuController;
use gpuctl::device::SimulatedGpu;
use gpuctl::device::sim::Command as DeviceCommand;
use gpuctl::metrics::{NoopMetrics, Snapshot, WatchMetrics};
use gpuctl::tracing::prelude::*;
use gpuctl::tracing::{self as logging, Verbosity};

use crate::model::ThermalModel;
use crate::trace::{read_trace, resample};

#[derive(Parser, Debug)]
#[command(name = "gpuctl-sim", version, about = "Run the gpuctl control loop against a simulated GPU")]
struct Cli {
    /// TOML configuration file.
    #[arg(long, short = 'c', value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Seconds between control ticks.
    #[arg(long, short = 'i', value_name = "SECONDS", global = true)]
    interval: Option<u64>,

    /// Temperature ceiling (°C).
    #[arg(long, short = 't', value_name = "CELSIUS", global = true)]
    temperature: Option<i32>,

    /// Highest fan speed to command (%).
    #[arg(long, short = 'f', value_name = "PERCENT", global = true)]
    fan_speed: Option<i32>,

    /// Fan dead-band (%).
    #[arg(long, value_name = "PERCENT", global = true)]
    hysteresis: Option<i32>,

    /// Keep the power limit at maximum and use the steeper fan curve.
    #[arg(long, global = true)]
    performance: bool,

    /// Observe only, never write to the device.
    #[arg(long, global = true)]
    monitor: bool,

    #[arg(long, short = 'd', global = true)]
    debug: bool,

    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Control a simulated GPU in real time until interrupted.
    Run {
        /// Power the workload would draw if uncapped (W).
        #[arg(long, default_value_t = 330)]
        load: i32,

        /// Ambient temperature (°C).
        #[arg(long, default_value_t = 30)]
        ambient: i32,
    },

    /// Feed a recorded temperature trace through the controller, one tick
    /// per control interval of trace time.
    Replay {
        /// CSV file with `elapsed_s,temperature_c` columns.
        trace: PathBuf,

        /// Emit one JSON snapshot per line instead of a table.
        #[arg(long)]
        json: bool,
    },
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            interval: self.interval,
            temperature: self.temperature,
            fan_speed: self.fan_speed,
            hysteresis: self.hysteresis,
            performance: self.performance.then_some(true),
            monitor: self.monitor.then_some(true),
            debug: self.debug.then_some(true),
            verbose: self.verbose.then_some(true),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let path = Config::find(cli.config.as_deref());
    let config =
        Config::load(path.as_deref(), &cli.overrides()).context("Invalid configuration")?;
    logging::init(Verbosity::from_flags(config.debug, config.verbose));
    match &path {
        Some(path) => info!(path = %path.display(), "Using config file"),
        None => info!("No config file found, using defaults and flags"),
    }

    match cli.command {
        Command::Run { load, ambient } => run(config, load, ambient).await,
        Command::Replay { trace, json } => replay(config, &trace, json).await,
    }
}

async fn run(config: Config, load: i32, ambient: i32) -> Result<()> {
    let gpu = SimulatedGpu::default();
    gpu.set_temperature(ambient);

    let model = ThermalModel::new(ambient, load);
    let model_task = tokio::spawn(model.drive(gpu.clone(), Duration::from_millis(500)));

    let (metrics, mut snapshots) = WatchMetrics::new();
    let printer = tokio::spawn(async move {
        print_header();
        while snapshots.changed().await.is_ok() {
            let snapshot = snapshots.borrow_and_update().clone();
            if let Some(snapshot) = snapshot {
                print_row(&snapshot);
            }
        }
    });

    let result = gpuctl::daemon::run(gpu.clone(), metrics, config).await;

    model_task.abort();
    // The printer ends on its own once the sink is closed during shutdown.
    let _ = printer.await;

    print_summary(&gpu.commands());
    result.context("Controller stopped with an error")
}

async fn replay(config: Config, path: &std::path::Path, json: bool) -> Result<()> {
    let points = read_trace(path)?;
    let temperatures = resample(&points, config.interval());
    info!(
        samples = points.len(),
        ticks = temperatures.len(),
        "Replaying trace"
    );

    let gpu = SimulatedGpu::default();
    gpu.set_temperature(points[0].temperature_c);

    let mut controller = GpuController::initialize(gpu.clone(), NoopMetrics, config).await?;

    if !json {
        print_header();
    }
    for temperature in temperatures {
        gpu.set_temperature(temperature);
        let snapshot = controller.tick().await?;
        if json {
            println!("{}", serde_json::to_string(&snapshot)?);
        } else {
            print_row(&snapshot);
        }
    }

    controller.shutdown().await?;

    if !json {
        print_summary(&gpu.commands());
    }
    Ok(())
}

fn print_header() {
    println!(
        "{}",
        format!(
            "{:>5} {:>5} {:>9} {:>9} {:>8}",
            "temp", "avg", "fan", "power", "mode"
        )
        .bold()
    );
}

fn print_row(snapshot: &Snapshot) {
    let temperature = format!("{:>4}°", snapshot.temperature.current);
    let temperature = match snapshot.temperature.current {
        t if t >= 80 => temperature.red(),
        t if t > 50 => temperature.yellow(),
        _ => temperature.green(),
    };
    let mode = if snapshot.state.auto_fan_control {
        "auto".cyan()
    } else {
        "manual".magenta()
    };
    let flag = if snapshot.state.degraded {
        " stale".red().to_string()
    } else {
        String::new()
    };

    println!(
        "{} {:>4}° {:>4}→{:<3}% {:>4}→{:<3}W {:>8}{}",
        temperature,
        snapshot.temperature.average,
        snapshot.fan_speed.current,
        snapshot.fan_speed.target,
        snapshot.power_limit.current,
        snapshot.power_limit.target,
        mode,
        flag
    );
}

fn print_summary(commands: &[DeviceCommand]) {
    let fan = commands
        .iter()
        .filter(|c| matches!(c, DeviceCommand::SetFanSpeed(_)))
        .count();
    let power = commands
        .iter()
        .filter(|c| matches!(c, DeviceCommand::SetPowerLimit(_)))
        .count();
    let auto = commands
        .iter()
        .filter(|c| matches!(c, DeviceCommand::EnableAutoFan))
        .count();

    println!(
        "\n{} {} fan, {} power, {} auto",
        "Commands issued:".bold(),
        fan,
        power,
        auto
    );
}
