//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - loads `.env` and parses CLI arguments
//! - sets up logging
//! - builds trace sources and runs measurements or fits
//! - prints reports/plots
//! - writes optional exports

use clap::Parser;

use crate::cli::{Cli, Command, FitArgs, MeasureArgs, SimArgs, SimulateArgs, SweepArgs};
use crate::data::{RcSimulator, SimConfig, TraceRequest, TraceSource};
use crate::debug::{write_debug_bundle, DebugInputs};
use crate::domain::{MeasureConfig, OutputFormat, Target};
use crate::error::AppError;
use crate::io::{measurement_file, read_trace_csv, write_measurement_json, write_trace_csv};
use crate::logging::init_logging;
use crate::plot::render_trace_plot;
use crate::report::{
    compute_residuals, format_attempts, format_fit_summary, format_measurement, format_sweep, residual_stats,
    ReportContext,
};

pub mod pipeline;

use pipeline::MeasureSetup;

/// Entry point for the `rcm` binary.
pub fn run() -> Result<(), AppError> {
    // A missing .env is normal; flags and real environment still apply.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Measure(args) => handle_measure(args),
        Command::Fit(args) => handle_fit(args),
        Command::Simulate(args) => handle_simulate(args),
        Command::Sweep(args) => handle_sweep(args),
    }
}

fn handle_measure(args: MeasureArgs) -> Result<(), AppError> {
    let setup = MeasureSetup {
        target: Target {
            resistance: args.circuit.resistance,
            capacitance: args.capacitance,
        },
        pulse_voltage: args.circuit.pulse_voltage,
        initial_period: args.circuit.period,
        config: MeasureConfig {
            error_target_percent: args.looping.target,
            max_iterations: args.looping.max_iter,
            window_start: args.looping.window_start,
            ..MeasureConfig::default()
        },
        sim: sim_config_from_args(&args.sim, args.dut_capacitance),
        trace: args.trace.clone(),
    };

    let run = pipeline::run_measurement(&setup)?;
    let m = &run.measurement;
    let file = measurement_file(setup.target, setup.pulse_voltage, setup.initial_period, &setup.config, m);

    match args.format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&file)
                .map_err(|e| AppError::new(4, format!("Failed to serialize measurement: {e}")))?;
            println!("{json}");
        }
        OutputFormat::Text => {
            let ctx = ReportContext {
                resistance: setup.target.resistance,
                pulse_voltage: setup.pulse_voltage,
                reference_capacitance: setup.target.capacitance,
            };
            println!("{}", format_measurement(&ctx, m));

            if args.history {
                println!("{}", format_attempts(&m.history));
            }
            if args.plot {
                match &run.window {
                    Some(w) => println!(
                        "{}",
                        render_trace_plot(&w.times, &w.voltages, m.fit.as_ref(), args.width, args.height)
                    ),
                    None => println!("(no fitted window to plot)"),
                }
            }
        }
    }

    if let Some(path) = &args.export {
        write_measurement_json(path, &file)?;
        eprintln!("Wrote measurement to {}", path.display());
    }
    if let Some(dir) = &args.debug {
        let inputs = DebugInputs {
            target: setup.target,
            pulse_voltage: setup.pulse_voltage,
            initial_period: setup.initial_period,
            config: &setup.config,
            sim: setup.trace.is_none().then_some(&setup.sim),
        };
        let path = write_debug_bundle(dir, &inputs, m)?;
        eprintln!("Wrote debug bundle to {}", path.display());
    }

    Ok(())
}

fn handle_fit(args: FitArgs) -> Result<(), AppError> {
    let resistance = args.circuit.resistance;
    let pulse_voltage = args.circuit.pulse_voltage;

    let (trace, default_end) = if args.simulate {
        let capacitance = args
            .capacitance
            .ok_or_else(|| AppError::new(2, "`rcm fit --simulate` needs --capacitance."))?;
        let trace = simulate(&args.sim, resistance, capacitance, pulse_voltage, args.circuit.period)?;
        (trace, args.circuit.period / 2.0)
    } else {
        let path = match &args.trace {
            Some(p) => crate::cli::picker::validate_csv_path(p)?,
            None => crate::cli::picker::prompt_for_trace_path()?,
        };
        let ingested = read_trace_csv(&path)?;
        if !ingested.row_errors.is_empty() {
            eprintln!(
                "Skipped {} malformed row(s) in {}",
                ingested.row_errors.len(),
                path.display()
            );
        }
        let end = ingested.trace.times().last().copied().unwrap_or(0.0);
        (ingested.trace, end)
    };

    let window_end = args.window_end.unwrap_or(default_end);
    let guess_from = args.capacitance.map(|c| (resistance, c));
    let single = pipeline::run_single_fit(&trace, args.window_start, window_end, guess_from, pulse_voltage)?;

    let residuals = compute_residuals(&single.window.times, &single.window.voltages, &single.fit)?;
    let stats = residual_stats(&residuals);
    println!("{}", format_fit_summary(&single.fit, Some(resistance), stats.as_ref()));

    if args.plot {
        println!(
            "{}",
            render_trace_plot(
                &single.window.times,
                &single.window.voltages,
                Some(&single.fit),
                args.width,
                args.height
            )
        );
    }

    Ok(())
}

fn handle_simulate(args: SimulateArgs) -> Result<(), AppError> {
    let trace = simulate(
        &args.sim,
        args.circuit.resistance,
        args.capacitance,
        args.circuit.pulse_voltage,
        args.circuit.period,
    )?;
    write_trace_csv(&args.output, &trace)?;
    println!("Wrote {} samples to {}", trace.len(), args.output.display());
    Ok(())
}

fn handle_sweep(args: SweepArgs) -> Result<(), AppError> {
    let base = MeasureSetup {
        target: Target {
            resistance: args.circuit.resistance,
            capacitance: None,
        },
        pulse_voltage: args.circuit.pulse_voltage,
        initial_period: args.circuit.period,
        config: MeasureConfig {
            error_target_percent: args.looping.target,
            max_iterations: args.looping.max_iter,
            window_start: args.looping.window_start,
            ..MeasureConfig::default()
        },
        sim: sim_config_from_args(&args.sim, None),
        trace: None,
    };

    let rows = pipeline::run_sweep(&base, &args.capacitances);

    match args.format {
        OutputFormat::Text => println!("{}", format_sweep(&rows)),
        OutputFormat::Json => {
            let items: Vec<serde_json::Value> = rows
                .iter()
                .map(|row| match &row.outcome {
                    Ok(m) => serde_json::json!({ "dut_capacitance": row.dut_capacitance, "measurement": m }),
                    Err(msg) => serde_json::json!({ "dut_capacitance": row.dut_capacitance, "error": msg }),
                })
                .collect();
            let json = serde_json::to_string_pretty(&items)
                .map_err(|e| AppError::new(4, format!("Failed to serialize sweep: {e}")))?;
            println!("{json}");
        }
    }

    Ok(())
}

pub fn sim_config_from_args(args: &SimArgs, capacitance: Option<f64>) -> SimConfig {
    SimConfig {
        step: args.step,
        min_samples: args.min_samples,
        max_samples: args.max_samples,
        noise_std: args.noise,
        seed: args.seed,
        capacitance,
        ..SimConfig::default()
    }
}

fn simulate(
    args: &SimArgs,
    resistance: f64,
    capacitance: f64,
    pulse_voltage: f64,
    period: f64,
) -> Result<crate::domain::Trace, AppError> {
    let sim = RcSimulator::new(sim_config_from_args(args, Some(capacitance)))?;
    let trace = sim.get_trace(&TraceRequest {
        resistance,
        capacitance: Some(capacitance),
        pulse_voltage,
        period,
    })?;
    Ok(trace)
}
