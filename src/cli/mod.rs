//! Command-line parsing for the RC capacitance meter.
//!
//! Argument parsing and command dispatch stay separate from the measurement
//! code. Most numeric flags fall back to `RCM_*` environment variables, which
//! may also come from a `.env` file loaded before parsing.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::domain::OutputFormat;

pub mod picker;

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "rcm", version, about = "Adaptive RC capacitance meter")]
pub struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace). `RUST_LOG` wins when set.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Estimate a capacitance with the adaptive period loop.
    Measure(MeasureArgs),
    /// Fit the charging curve of a single trace once.
    Fit(FitArgs),
    /// Write a simulated charging trace to CSV.
    Simulate(SimulateArgs),
    /// Estimate several simulated capacitances in parallel.
    Sweep(SweepArgs),
}

/// Circuit and excitation shared by every subcommand.
#[derive(Debug, Args, Clone)]
pub struct CircuitArgs {
    /// Series resistance (ohms).
    #[arg(short = 'r', long, env = "RCM_RESISTANCE", default_value_t = 10_000.0)]
    pub resistance: f64,

    /// Pulse amplitude (volts).
    #[arg(short = 'p', long = "pulse", env = "RCM_PULSE_VOLTAGE", default_value_t = 3.0)]
    pub pulse_voltage: f64,

    /// Excitation period (seconds). Initial period for `measure`.
    #[arg(long, env = "RCM_PERIOD", default_value_t = 0.02)]
    pub period: f64,
}

/// Simulator settings.
#[derive(Debug, Args, Clone)]
pub struct SimArgs {
    /// Maximum sample spacing (seconds).
    #[arg(long, env = "RCM_STEP", default_value_t = 1e-5)]
    pub step: f64,

    /// Minimum samples per period.
    #[arg(long, default_value_t = 200)]
    pub min_samples: usize,

    /// Maximum samples per trace; longer periods are rejected.
    #[arg(long, default_value_t = 1_000_000)]
    pub max_samples: usize,

    /// Gaussian noise added to each sample (volts, standard deviation).
    #[arg(long, env = "RCM_NOISE", default_value_t = 0.0)]
    pub noise: f64,

    /// Noise seed.
    #[arg(long, env = "RCM_SEED", default_value_t = 42)]
    pub seed: u64,
}

/// Convergence loop settings.
#[derive(Debug, Args, Clone)]
pub struct LoopArgs {
    /// Accept when the capacitance error is at or below this (percent).
    #[arg(long, env = "RCM_TARGET", default_value_t = 2.0)]
    pub target: f64,

    /// Attempt budget.
    #[arg(long = "max-iter", env = "RCM_MAX_ITER", default_value_t = 15)]
    pub max_iter: usize,

    /// Fit window start (seconds after the rising edge).
    #[arg(long, env = "RCM_WINDOW_START", default_value_t = 1e-5)]
    pub window_start: f64,
}

/// Options for `rcm measure`.
#[derive(Debug, Args, Clone)]
pub struct MeasureArgs {
    #[command(flatten)]
    pub circuit: CircuitArgs,

    #[command(flatten)]
    pub sim: SimArgs,

    #[command(flatten)]
    pub looping: LoopArgs,

    /// Reference capacitance (farads) used for the error check and initial guess.
    #[arg(short = 'c', long, env = "RCM_CAPACITANCE")]
    pub capacitance: Option<f64>,

    /// Capacitance of the simulated device under test, if different from the reference.
    #[arg(long)]
    pub dut_capacitance: Option<f64>,

    /// Replay a captured trace CSV instead of simulating.
    #[arg(long, value_name = "CSV")]
    pub trace: Option<PathBuf>,

    /// Print the per-attempt history table.
    #[arg(long)]
    pub history: bool,

    /// Plot the last fitted window.
    #[arg(long)]
    pub plot: bool,

    /// Plot width (columns).
    #[arg(long, default_value_t = 80)]
    pub width: usize,

    /// Plot height (rows).
    #[arg(long, default_value_t = 20)]
    pub height: usize,

    /// Write the measurement (inputs, result, history) to JSON.
    #[arg(long, value_name = "JSON")]
    pub export: Option<PathBuf>,

    /// Write a markdown debug bundle into this directory.
    #[arg(long, value_name = "DIR")]
    pub debug: Option<PathBuf>,

    /// Output format for the result.
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

/// Options for `rcm fit`.
#[derive(Debug, Args, Clone)]
pub struct FitArgs {
    /// Trace CSV to fit. Without it (and without `--simulate`) an interactive picker runs.
    #[arg(long, value_name = "CSV")]
    pub trace: Option<PathBuf>,

    /// Fit a simulated trace instead of a file.
    #[arg(long, conflicts_with = "trace")]
    pub simulate: bool,

    #[command(flatten)]
    pub circuit: CircuitArgs,

    #[command(flatten)]
    pub sim: SimArgs,

    /// Capacitance to simulate, and the source of the initial τ guess.
    #[arg(short = 'c', long, env = "RCM_CAPACITANCE")]
    pub capacitance: Option<f64>,

    /// Fit window start (seconds).
    #[arg(long, default_value_t = 1e-5)]
    pub window_start: f64,

    /// Fit window end (seconds). Defaults to half the period for simulated
    /// traces and to the end of a file trace.
    #[arg(long)]
    pub window_end: Option<f64>,

    /// Plot the fitted window.
    #[arg(long)]
    pub plot: bool,

    /// Plot width (columns).
    #[arg(long, default_value_t = 80)]
    pub width: usize,

    /// Plot height (rows).
    #[arg(long, default_value_t = 20)]
    pub height: usize,
}

/// Options for `rcm simulate`.
#[derive(Debug, Args, Clone)]
pub struct SimulateArgs {
    #[command(flatten)]
    pub circuit: CircuitArgs,

    #[command(flatten)]
    pub sim: SimArgs,

    /// Capacitance to simulate (farads).
    #[arg(short = 'c', long, env = "RCM_CAPACITANCE")]
    pub capacitance: f64,

    /// Output CSV path.
    #[arg(short = 'o', long, value_name = "CSV")]
    pub output: PathBuf,
}

/// Options for `rcm sweep`.
#[derive(Debug, Args, Clone)]
pub struct SweepArgs {
    #[command(flatten)]
    pub circuit: CircuitArgs,

    #[command(flatten)]
    pub sim: SimArgs,

    #[command(flatten)]
    pub looping: LoopArgs,

    /// Capacitances to measure (farads), comma separated. Each is also its own reference.
    #[arg(short = 'c', long = "capacitance", value_delimiter = ',', required = true, num_args = 1..)]
    pub capacitances: Vec<f64>,

    /// Output format for the table.
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}
