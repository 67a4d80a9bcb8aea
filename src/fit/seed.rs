//! Initial-guess seeding by grid search.
//!
//! With `τ` fixed the charging model is linear in `V_max`, so each grid point
//! costs one tiny least-squares solve. Candidates are evaluated in parallel and
//! the lowest SSE wins; ties go to the smaller grid index so the result does not
//! depend on thread scheduling.

use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;

use crate::domain::InitialGuess;
use crate::error::FitError;
use crate::fit::tau_grid::{tau_grid_for_window, DEFAULT_TAU_STEPS};
use crate::math::{charge_fraction, solve_least_squares};
use crate::models::sse;

#[derive(Debug, Clone)]
struct Candidate {
    idx: usize,
    tau: f64,
    v_max: f64,
    sse: f64,
}

/// Pick the best `(τ, V_max)` pair from an explicit `τ` grid.
pub fn seed_from_grid(times: &[f64], voltages: &[f64], grid: &[f64]) -> Result<InitialGuess, FitError> {
    if times.len() != voltages.len() {
        return Err(FitError::InvalidInput(format!(
            "length mismatch: {} time sample(s) vs {} voltage sample(s)",
            times.len(),
            voltages.len()
        )));
    }
    if times.is_empty() {
        return Err(FitError::InsufficientData { samples: 0, params: 2 });
    }
    if grid.is_empty() {
        return Err(FitError::InvalidInput("tau grid is empty".to_string()));
    }

    let n = times.len();
    let y = DVector::from_column_slice(voltages);

    let candidates: Vec<Candidate> = grid
        .par_iter()
        .enumerate()
        .filter_map(|(idx, &tau)| {
            if !(tau.is_finite() && tau > 0.0) {
                return None;
            }
            let x = DMatrix::from_fn(n, 1, |i, _| charge_fraction(times[i], tau));
            let beta = solve_least_squares(&x, &y)?;
            let v_max = beta[0];
            let cost = sse(times, voltages, tau, v_max);
            cost.is_finite().then_some(Candidate { idx, tau, v_max, sse: cost })
        })
        .collect();

    let mut iter = candidates.iter();
    let Some(mut best) = iter.next() else {
        return Err(FitError::SingularJacobian);
    };
    for c in iter {
        if c.sse < best.sse || (c.sse == best.sse && c.idx < best.idx) {
            best = c;
        }
    }

    tracing::debug!(tau = best.tau, v_max = best.v_max, sse = best.sse, "tau grid seed");

    Ok(InitialGuess {
        time_constant: best.tau,
        voltage_max: best.v_max,
    })
}

/// Seed using a grid sized to the sample window.
pub fn seed_guess(times: &[f64], voltages: &[f64]) -> Result<InitialGuess, FitError> {
    let grid = tau_grid_for_window(times, DEFAULT_TAU_STEPS)?;
    seed_from_grid(times, voltages, &grid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::predict;

    #[test]
    fn seed_selects_exact_tau_from_grid() {
        let times: Vec<f64> = (1..200).map(|i| i as f64 * 1e-5).collect();
        let volts: Vec<f64> = times.iter().map(|&t| predict(t, 2e-4, 3.0)).collect();

        let grid = vec![1e-4, 2e-4, 4e-4];
        let guess = seed_from_grid(&times, &volts, &grid).unwrap();
        assert_eq!(guess.time_constant, 2e-4);
        assert!((guess.voltage_max - 3.0).abs() < 1e-9);
    }

    #[test]
    fn window_seed_lands_near_truth() {
        let times: Vec<f64> = (1..500).map(|i| i as f64 * 1e-5).collect();
        let volts: Vec<f64> = times.iter().map(|&t| predict(t, 1.7e-4, 5.0)).collect();

        let guess = seed_guess(&times, &volts).unwrap();
        let rel = (guess.time_constant - 1.7e-4).abs() / 1.7e-4;
        assert!(rel < 0.15, "seed tau {} too far from truth", guess.time_constant);
    }
}
