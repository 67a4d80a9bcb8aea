//! Shared measurement workflows used by the CLI handlers.
//!
//! Keeping these in one place avoids duplicating the core flow:
//! trace source -> controller (or single fit) -> fitted window for plotting
//!
//! Handlers then only deal with presentation and file output.

use std::path::PathBuf;

use rayon::prelude::*;

use crate::data::{CsvTraceSource, RcSimulator, SimConfig, TraceRequest, TraceSource};
use crate::domain::{FitResult, InitialGuess, MeasureConfig, Measurement, Target, Trace};
use crate::error::{AppError, MeasureError};
use crate::fit::{seed_guess, CurveFitter, LevenbergMarquardt};
use crate::measure::estimate_capacitance;
use crate::report::SweepRow;

/// Inputs of one adaptive measurement.
#[derive(Debug, Clone)]
pub struct MeasureSetup {
    pub target: Target,
    pub pulse_voltage: f64,
    pub initial_period: f64,
    pub config: MeasureConfig,
    pub sim: SimConfig,
    /// Replay this capture instead of simulating.
    pub trace: Option<PathBuf>,
}

/// Samples of a fit window.
#[derive(Debug, Clone, PartialEq)]
pub struct Window {
    pub times: Vec<f64>,
    pub voltages: Vec<f64>,
}

/// Outputs of `run_measurement`.
#[derive(Debug, Clone)]
pub struct MeasureRun {
    pub measurement: Measurement,
    /// Window of the last fitted attempt, re-acquired for plotting.
    pub window: Option<Window>,
}

/// Outputs of `run_single_fit`.
#[derive(Debug, Clone)]
pub struct SingleFit {
    pub fit: FitResult,
    pub window: Window,
}

/// Build the trace source a setup asks for.
pub fn build_source(setup: &MeasureSetup) -> Result<Box<dyn TraceSource + Send + Sync>, MeasureError> {
    match &setup.trace {
        Some(path) => Ok(Box::new(CsvTraceSource::open(path)?)),
        None => Ok(Box::new(RcSimulator::new(setup.sim.clone())?)),
    }
}

/// Run the adaptive loop and recover the final window.
pub fn run_measurement(setup: &MeasureSetup) -> Result<MeasureRun, AppError> {
    let source = build_source(setup)?;
    let fitter = LevenbergMarquardt::default();

    let measurement = estimate_capacitance(
        source.as_ref(),
        &fitter,
        setup.target,
        setup.pulse_voltage,
        setup.initial_period,
        &setup.config,
    )?;

    let window = match measurement.fitted_period() {
        Some(period) => {
            let trace = source.get_trace(&TraceRequest {
                resistance: setup.target.resistance,
                capacitance: setup.target.capacitance,
                pulse_voltage: setup.pulse_voltage,
                period,
            })?;
            Some(window_of(&trace, setup.config.window_start, period / 2.0))
        }
        None => None,
    };

    Ok(MeasureRun { measurement, window })
}

/// Fit one window once, without the convergence loop.
///
/// The τ guess is `R · C` when a capacitance is known and grid-seeded otherwise.
pub fn run_single_fit(
    trace: &Trace,
    window_start: f64,
    window_end: f64,
    guess_from: Option<(f64, f64)>,
    pulse_voltage: f64,
) -> Result<SingleFit, AppError> {
    let window = window_of(trace, window_start, window_end);
    let guess = match guess_from {
        Some((resistance, capacitance)) => InitialGuess {
            time_constant: resistance * capacitance,
            voltage_max: pulse_voltage,
        },
        None => seed_guess(&window.times, &window.voltages)?,
    };

    let fit = LevenbergMarquardt::default().fit(&window.times, &window.voltages, guess)?;
    tracing::info!(
        tau = fit.time_constant,
        v_max = fit.voltage_max,
        samples = fit.n,
        "single fit done"
    );
    Ok(SingleFit { fit, window })
}

/// One independent measurement per capacitance, run on the rayon pool.
///
/// Each capacitance is both the simulated part and the reference. Rows come
/// back in input order; a failing channel does not stop the others.
pub fn run_sweep(base: &MeasureSetup, capacitances: &[f64]) -> Vec<SweepRow> {
    capacitances
        .par_iter()
        .map(|&c| {
            let setup = MeasureSetup {
                target: Target {
                    resistance: base.target.resistance,
                    capacitance: Some(c),
                },
                sim: SimConfig {
                    capacitance: Some(c),
                    ..base.sim.clone()
                },
                trace: None,
                ..base.clone()
            };
            let outcome = run_measurement(&setup)
                .map(|run| run.measurement)
                .map_err(|e| e.to_string());
            SweepRow {
                dut_capacitance: c,
                outcome,
            }
        })
        .collect()
}

fn window_of(trace: &Trace, start: f64, end: f64) -> Window {
    let (times, voltages) = trace.window(start, end);
    Window { times, voltages }
}
