//! Tau grid generation.
//!
//! When no reference capacitance is available there is no physical starting
//! point for `τ`, so we seed the optimizer from a deterministic grid search over
//! log-spaced `τ` values instead.
//!
//! The grid spans from half the finest sample spacing up to ten times the
//! window length, which brackets every time constant the window can resolve.

use crate::error::FitError;

/// Default number of grid points used for seeding.
pub const DEFAULT_TAU_STEPS: usize = 80;

/// Generate `steps` log-spaced points between `min` and `max` (inclusive).
pub fn log_space(min: f64, max: f64, steps: usize) -> Result<Vec<f64>, FitError> {
    if !(min.is_finite() && max.is_finite() && min > 0.0 && max > 0.0 && max > min) {
        return Err(FitError::InvalidInput(format!(
            "invalid tau range: min={min}, max={max} (must be finite, >0, and max>min)"
        )));
    }
    if steps < 2 {
        return Err(FitError::InvalidInput("tau steps must be >= 2".to_string()));
    }

    let ln_min = min.ln();
    let ln_max = max.ln();
    let step = (ln_max - ln_min) / (steps as f64 - 1.0);

    let mut out = Vec::with_capacity(steps);
    for i in 0..steps {
        out.push((ln_min + step * i as f64).exp());
    }
    Ok(out)
}

/// Tau grid suited to a sample window.
pub fn tau_grid_for_window(times: &[f64], steps: usize) -> Result<Vec<f64>, FitError> {
    let min_dt = times
        .windows(2)
        .map(|w| w[1] - w[0])
        .filter(|dt| *dt > 0.0)
        .fold(f64::INFINITY, f64::min);
    let t_max = times.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    if !(min_dt.is_finite() && t_max.is_finite() && t_max > 0.0) {
        return Err(FitError::InsufficientData {
            samples: times.len(),
            params: 2,
        });
    }

    log_space(0.5 * min_dt, 10.0 * t_max, steps)
}
