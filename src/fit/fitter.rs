//! Nonlinear least-squares fit of the charging curve.
//!
//! Given:
//! - sample times `t_i`
//! - observed voltages `v_i`
//! - an initial guess `(τ₀, V₀)`
//!
//! we minimise `Σ (v_i - V_max (1 - exp(-t_i/τ)))²` with Levenberg–Marquardt:
//!
//! - analytic Jacobian, columns scaled to unit norm (τ and V_max live on very
//!   different scales)
//! - the damped step solves `[J; √λ I] δ = [r; 0]` by SVD
//! - steps that would make `τ <= 0` are rejected like any other uphill step
//!
//! The optimizer has a hard budget on model evaluations. Running out of budget
//! or hitting a degenerate Jacobian are reported as `FitError`s the caller is
//! expected to recover from.

use nalgebra::{DMatrix, DVector};

use crate::domain::{FitResult, InitialGuess};
use crate::error::FitError;
use crate::math::solve_least_squares;
use crate::models::{fill_jacobian_row, predict, sse, PARAM_COUNT};

/// Default evaluation budget, matching the common `maxfev=5000` setting.
pub const DEFAULT_MAX_EVALUATIONS: usize = 5000;

/// Default relative tolerance on cost reduction and step size.
pub const DEFAULT_TOLERANCE: f64 = 1.49012e-8;

const LAMBDA_INIT: f64 = 1e-3;
const LAMBDA_MIN: f64 = 1e-12;
const LAMBDA_MAX: f64 = 1e16;

/// Anything that can fit the charging model to a sample window.
///
/// Implementations must be pure: identical inputs give identical results.
pub trait CurveFitter {
    fn fit(&self, times: &[f64], voltages: &[f64], guess: InitialGuess) -> Result<FitResult, FitError>;
}

/// Levenberg–Marquardt fitter for `V(t) = V_max (1 - exp(-t/τ))`.
#[derive(Debug, Clone)]
pub struct LevenbergMarquardt {
    pub max_evaluations: usize,
    /// Stop when an accepted step reduces the cost by less than `ftol · cost`.
    pub ftol: f64,
    /// Stop when every parameter moves by less than `xtol · (|p| + xtol)`.
    pub xtol: f64,
}

impl Default for LevenbergMarquardt {
    fn default() -> Self {
        Self {
            max_evaluations: DEFAULT_MAX_EVALUATIONS,
            ftol: DEFAULT_TOLERANCE,
            xtol: DEFAULT_TOLERANCE,
        }
    }
}

impl LevenbergMarquardt {
    pub fn with_max_evaluations(mut self, max_evaluations: usize) -> Self {
        self.max_evaluations = max_evaluations;
        self
    }
}

impl CurveFitter for LevenbergMarquardt {
    fn fit(&self, times: &[f64], voltages: &[f64], guess: InitialGuess) -> Result<FitResult, FitError> {
        validate_inputs(times, voltages, guess)?;

        let n = times.len();
        let mut params = [guess.time_constant, guess.voltage_max];
        let mut cost = sse(times, voltages, params[0], params[1]);
        let mut evaluations = 1usize;
        let mut lambda = LAMBDA_INIT;

        'outer: loop {
            if cost == 0.0 {
                break;
            }

            let (jac, resid) = jacobian_and_residuals(times, voltages, params);
            let scale = column_norms(&jac)?;

            // Augmented system for the damped step in scaled coordinates.
            let mut a = DMatrix::<f64>::zeros(n + PARAM_COUNT, PARAM_COUNT);
            let mut b = DVector::<f64>::zeros(n + PARAM_COUNT);
            for i in 0..n {
                for j in 0..PARAM_COUNT {
                    a[(i, j)] = jac[(i, j)] / scale[j];
                }
                b[i] = resid[i];
            }

            loop {
                if evaluations >= self.max_evaluations {
                    return Err(FitError::DidNotConverge { evaluations });
                }

                let damping = lambda.sqrt();
                for j in 0..PARAM_COUNT {
                    a[(n + j, j)] = damping;
                }

                let step_scaled = solve_least_squares(&a, &b).ok_or(FitError::SingularJacobian)?;
                let step = [step_scaled[0] / scale[0], step_scaled[1] / scale[1]];
                let trial = [params[0] + step[0], params[1] + step[1]];
                let small_step = step
                    .iter()
                    .zip(params.iter())
                    .all(|(d, p)| d.abs() <= self.xtol * (p.abs() + self.xtol));

                if trial[0] > 0.0 && trial.iter().all(|v| v.is_finite()) {
                    let trial_cost = sse(times, voltages, trial[0], trial[1]);
                    evaluations += 1;

                    if trial_cost.is_finite() && trial_cost <= cost {
                        let reduction = cost - trial_cost;
                        let previous = cost;
                        params = trial;
                        cost = trial_cost;
                        lambda = (lambda / 10.0).max(LAMBDA_MIN);

                        if reduction <= self.ftol * previous || small_step {
                            break 'outer;
                        }
                        continue 'outer;
                    }
                }

                // No improvement possible at this resolution: we are at the minimum.
                if small_step {
                    break 'outer;
                }

                lambda *= 10.0;
                if lambda > LAMBDA_MAX {
                    return Err(FitError::DidNotConverge { evaluations });
                }
            }
        }

        let covariance = estimate_covariance(times, voltages, params, cost);
        tracing::trace!(
            tau = params[0],
            v_max = params[1],
            sse = cost,
            evaluations,
            "charging curve fit converged"
        );

        Ok(FitResult {
            time_constant: params[0],
            voltage_max: params[1],
            covariance,
            sse: cost,
            rmse: (cost / n as f64).sqrt(),
            n,
            evaluations,
        })
    }
}

fn validate_inputs(times: &[f64], voltages: &[f64], guess: InitialGuess) -> Result<(), FitError> {
    if times.len() != voltages.len() {
        return Err(FitError::InvalidInput(format!(
            "length mismatch: {} time sample(s) vs {} voltage sample(s)",
            times.len(),
            voltages.len()
        )));
    }
    if times.iter().chain(voltages.iter()).any(|v| !v.is_finite()) {
        return Err(FitError::InvalidInput("samples must be finite".to_string()));
    }
    if !(guess.time_constant.is_finite() && guess.time_constant > 0.0) {
        return Err(FitError::InvalidInput(format!(
            "time constant guess must be finite and > 0 (got {})",
            guess.time_constant
        )));
    }
    if !guess.voltage_max.is_finite() {
        return Err(FitError::InvalidInput("voltage guess must be finite".to_string()));
    }
    if times.len() < PARAM_COUNT {
        return Err(FitError::InsufficientData {
            samples: times.len(),
            params: PARAM_COUNT,
        });
    }
    Ok(())
}

fn jacobian_and_residuals(times: &[f64], voltages: &[f64], params: [f64; 2]) -> (DMatrix<f64>, DVector<f64>) {
    let n = times.len();
    let mut jac = DMatrix::<f64>::zeros(n, PARAM_COUNT);
    let mut resid = DVector::<f64>::zeros(n);
    let mut row = [0.0; PARAM_COUNT];

    for i in 0..n {
        fill_jacobian_row(times[i], params[0], params[1], &mut row);
        for j in 0..PARAM_COUNT {
            jac[(i, j)] = row[j];
        }
        resid[i] = voltages[i] - predict(times[i], params[0], params[1]);
    }

    (jac, resid)
}

fn column_norms(jac: &DMatrix<f64>) -> Result<[f64; 2], FitError> {
    let mut out = [0.0; PARAM_COUNT];
    for (j, slot) in out.iter_mut().enumerate() {
        let norm = jac.column(j).norm();
        if !(norm.is_finite() && norm > 0.0) {
            return Err(FitError::SingularJacobian);
        }
        *slot = norm;
    }
    Ok(out)
}

/// `(JᵀJ)⁻¹ · SSE / (n - p)`, or `None` when it is not estimable.
fn estimate_covariance(times: &[f64], voltages: &[f64], params: [f64; 2], cost: f64) -> Option<[[f64; 2]; 2]> {
    let n = times.len();
    if n <= PARAM_COUNT {
        return None;
    }

    let (jac, _) = jacobian_and_residuals(times, voltages, params);
    let jtj = jac.transpose() * &jac;
    let inv = jtj.try_inverse()?;
    let s2 = cost / (n - PARAM_COUNT) as f64;

    let cov = [
        [inv[(0, 0)] * s2, inv[(0, 1)] * s2],
        [inv[(1, 0)] * s2, inv[(1, 1)] * s2],
    ];
    cov.iter().flatten().all(|v| v.is_finite()).then_some(cov)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synthetic(tau: f64, v_max: f64, step: f64, n: usize) -> (Vec<f64>, Vec<f64>) {
        let times: Vec<f64> = (1..=n).map(|i| i as f64 * step).collect();
        let volts = times.iter().map(|&t| predict(t, tau, v_max)).collect();
        (times, volts)
    }

    #[test]
    fn recovers_parameters_from_exact_data() {
        let (times, volts) = synthetic(1.7e-4, 3.0, 1e-5, 1000);
        let guess = InitialGuess {
            time_constant: 3e-4,
            voltage_max: 2.0,
        };
        let fit = LevenbergMarquardt::default().fit(&times, &volts, guess).unwrap();

        assert!((fit.time_constant - 1.7e-4).abs() / 1.7e-4 < 1e-6, "tau={}", fit.time_constant);
        assert!((fit.voltage_max - 3.0).abs() < 1e-6, "v_max={}", fit.voltage_max);
        assert_eq!(fit.n, 1000);
    }

    #[test]
    fn fitting_is_deterministic() {
        let (times, volts) = synthetic(1e-3, 5.0, 5e-5, 300);
        let guess = InitialGuess {
            time_constant: 5e-4,
            voltage_max: 4.0,
        };
        let fitter = LevenbergMarquardt::default();
        let a = fitter.fit(&times, &volts, guess).unwrap();
        let b = fitter.fit(&times, &volts, guess).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn exhausted_budget_is_reported() {
        let (times, volts) = synthetic(1e-3, 5.0, 5e-5, 300);
        let guess = InitialGuess {
            time_constant: 1e-1,
            voltage_max: 1.0,
        };
        let err = LevenbergMarquardt::default()
            .with_max_evaluations(2)
            .fit(&times, &volts, guess)
            .unwrap_err();
        assert!(matches!(err, FitError::DidNotConverge { evaluations: 2 }));
    }

    #[test]
    fn rejects_bad_inputs() {
        let fitter = LevenbergMarquardt::default();
        let guess = InitialGuess {
            time_constant: 1e-3,
            voltage_max: 1.0,
        };
        assert!(matches!(
            fitter.fit(&[0.0, 1.0], &[0.0], guess),
            Err(FitError::InvalidInput(_))
        ));
        assert!(matches!(
            fitter.fit(&[1e-3], &[0.5], guess),
            Err(FitError::InsufficientData { samples: 1, params: 2 })
        ));
        let bad_guess = InitialGuess {
            time_constant: 0.0,
            voltage_max: 1.0,
        };
        assert!(matches!(
            fitter.fit(&[1e-3, 2e-3], &[0.5, 0.7], bad_guess),
            Err(FitError::InvalidInput(_))
        ));
    }

    #[test]
    fn flat_window_has_singular_jacobian() {
        // All samples at t=0: both Jacobian columns vanish.
        let err = LevenbergMarquardt::default()
            .fit(
                &[0.0, 0.0, 0.0],
                &[1.0, 1.0, 1.0],
                InitialGuess {
                    time_constant: 1e-3,
                    voltage_max: 1.0,
                },
            )
            .unwrap_err();
        assert_eq!(err, FitError::SingularJacobian);
    }

    #[test]
    fn covariance_present_for_noisy_data() {
        let (times, mut volts) = synthetic(1e-3, 5.0, 5e-5, 200);
        for (i, v) in volts.iter_mut().enumerate() {
            *v += if i % 2 == 0 { 1e-3 } else { -1e-3 };
        }
        let fit = LevenbergMarquardt::default()
            .fit(
                &times,
                &volts,
                InitialGuess {
                    time_constant: 1e-3,
                    voltage_max: 5.0,
                },
            )
            .unwrap();
        let (s_tau, s_v) = fit.std_errors().unwrap();
        assert!(s_tau > 0.0 && s_tau < 1e-4);
        assert!(s_v > 0.0 && s_v < 1e-2);
    }
}
