//! Debug bundle writer for inspecting a measurement run.
//!
//! One markdown file per run: the inputs, controller/simulator settings and
//! the full attempt history including failed fits.

use std::fmt::Write as _;
use std::fs::{create_dir_all, write};
use std::path::{Path, PathBuf};

use chrono::Local;

use crate::data::SimConfig;
use crate::domain::{AttemptOutcome, MeasureConfig, Measurement, Target};
use crate::error::AppError;

/// Everything the bundle reports besides the measurement itself.
#[derive(Debug, Clone, Copy)]
pub struct DebugInputs<'a> {
    pub target: Target,
    pub pulse_voltage: f64,
    pub initial_period: f64,
    pub config: &'a MeasureConfig,
    /// Simulator settings when the trace source was the simulator.
    pub sim: Option<&'a SimConfig>,
}

pub fn write_debug_bundle(dir: &Path, inputs: &DebugInputs<'_>, measurement: &Measurement) -> Result<PathBuf, AppError> {
    create_dir_all(dir).map_err(|e| AppError::new(4, format!("Failed to create debug dir: {e}")))?;

    let ts = Local::now().format("%Y%m%d_%H%M%S");
    let path = dir.join(format!("rcm_debug_{}_{}.md", measurement.status.display_name().to_lowercase(), ts));

    let body = render_debug_bundle(inputs, measurement);
    write(&path, body).map_err(|e| AppError::new(4, format!("Failed to write debug file: {e}")))?;

    tracing::info!(path = %path.display(), "wrote debug bundle");
    Ok(path)
}

/// Markdown body of the bundle.
pub fn render_debug_bundle(inputs: &DebugInputs<'_>, m: &Measurement) -> String {
    let mut out = String::new();
    let cfg = inputs.config;

    // Writing to a String cannot fail.
    let _ = writeln!(out, "# rcm debug bundle");
    let _ = writeln!(out, "- generated: {}", Local::now().to_rfc3339());
    let _ = writeln!(out, "- resistance_ohm: {:e}", inputs.target.resistance);
    let _ = writeln!(out, "- reference_capacitance_f: {}", fmt_opt(inputs.target.capacitance));
    let _ = writeln!(out, "- pulse_voltage_v: {}", inputs.pulse_voltage);
    let _ = writeln!(out, "- initial_period_s: {:e}", inputs.initial_period);
    let _ = writeln!(
        out,
        "- controller: target={}%, max_iterations={}, window_start={:e}s, ratio_band={}..{}",
        cfg.error_target_percent, cfg.max_iterations, cfg.window_start, cfg.ratio_low, cfg.ratio_high
    );
    if let Some(sim) = inputs.sim {
        let _ = writeln!(
            out,
            "- simulator: step={:e}s, min_samples={}, max_samples={}, rise={:e}s, fall={:e}s, noise_std={}V, seed={}, dut_capacitance={}",
            sim.step,
            sim.min_samples,
            sim.max_samples,
            sim.rise_time,
            sim.fall_time,
            sim.noise_std,
            sim.seed,
            fmt_opt(sim.capacitance)
        );
    }

    let _ = writeln!(out, "\n## Result");
    let _ = writeln!(out, "- status: {}", m.status.display_name());
    let _ = writeln!(out, "- attempts: {}", m.attempts);
    let _ = writeln!(out, "- final_period_s: {:e}", m.final_period);
    let _ = writeln!(out, "- time_constant_s: {}", fmt_opt(m.time_constant()));
    let _ = writeln!(out, "- capacitance_f: {}", fmt_opt(m.capacitance));
    let _ = writeln!(out, "- error_percent: {}", fmt_opt(m.error_percent));
    let _ = writeln!(out, "- tau_ratio: {}", fmt_opt(m.tau_ratio));

    let _ = writeln!(out, "\n## Attempts");
    let _ = writeln!(out, "| # | period_s | samples | tau_s | v_max | capacitance_f | error_% | ratio | evals | note |");
    let _ = writeln!(out, "| - | - | - | - | - | - | - | - | - | - |");
    for r in &m.history {
        match &r.outcome {
            AttemptOutcome::Fitted {
                fit,
                capacitance,
                error_percent,
                tau_ratio,
            } => {
                let _ = writeln!(
                    out,
                    "| {} | {:e} | {} | {:e} | {:.6} | {:e} | {} | {:.4} | {} | |",
                    r.attempt,
                    r.period,
                    r.window_samples,
                    fit.time_constant,
                    fit.voltage_max,
                    capacitance,
                    fmt_opt(*error_percent),
                    tau_ratio,
                    fit.evaluations
                );
            }
            AttemptOutcome::FitFailed { reason } => {
                let _ = writeln!(
                    out,
                    "| {} | {:e} | {} | - | - | - | - | - | - | {} |",
                    r.attempt, r.period, r.window_samples, reason
                );
            }
        }
    }

    out
}

fn fmt_opt(value: Option<f64>) -> String {
    match value {
        Some(v) if v.is_finite() => format!("{v:e}"),
        _ => "-".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AttemptRecord, MeasurementStatus};

    fn exhausted() -> Measurement {
        Measurement {
            status: MeasurementStatus::Exhausted,
            attempts: 1,
            final_period: 0.024,
            fit: None,
            capacitance: None,
            error_percent: None,
            tau_ratio: None,
            history: vec![AttemptRecord {
                attempt: 1,
                period: 0.02,
                window_samples: 3,
                outcome: AttemptOutcome::FitFailed {
                    reason: "fit did not converge after 5000 function evaluations".to_string(),
                },
            }],
        }
    }

    #[test]
    fn bundle_lists_failed_attempts() {
        let config = MeasureConfig::default();
        let inputs = DebugInputs {
            target: Target {
                resistance: 1e4,
                capacitance: None,
            },
            pulse_voltage: 3.0,
            initial_period: 0.02,
            config: &config,
            sim: None,
        };
        let text = render_debug_bundle(&inputs, &exhausted());
        assert!(text.contains("- status: EXHAUSTED"));
        assert!(text.contains("- reference_capacitance_f: -"));
        assert!(text.contains("| 1 | 2e-2 | 3 | - |"));
        assert!(text.contains("did not converge"));
        assert!(!text.contains("- simulator:"));
    }

    #[test]
    fn bundle_is_written_to_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = MeasureConfig::default();
        let sim = SimConfig::default();
        let inputs = DebugInputs {
            target: Target {
                resistance: 1e4,
                capacitance: Some(17e-9),
            },
            pulse_voltage: 3.0,
            initial_period: 0.02,
            config: &config,
            sim: Some(&sim),
        };
        let path = write_debug_bundle(&dir.path().join("debug"), &inputs, &exhausted()).unwrap();
        let text = std::fs::read_to_string(path).unwrap();
        assert!(text.starts_with("# rcm debug bundle\n"));
        assert!(text.contains("- simulator: step=1e-5s"));
    }
}
