//! Model evaluation for the RC charging curve.
//!
//! The fitter relies on two primitive operations:
//! - predict `V(t)` given `(τ, V_max)` (for residuals/plots)
//! - fill a Jacobian row `[∂V/∂τ, ∂V/∂V_max]` (for the damped Gauss–Newton step)

use crate::math::{charge_fraction, charge_fraction_dtau};

/// Number of fitted parameters (`τ`, `V_max`).
pub const PARAM_COUNT: usize = 2;

/// Predict `V(t) = V_max (1 - exp(-t/τ))`.
pub fn predict(t: f64, tau: f64, v_max: f64) -> f64 {
    v_max * charge_fraction(t, tau)
}

/// Fill the Jacobian row of the model at `t`.
///
/// # Panics
/// Panics if `out` is shorter than `PARAM_COUNT`.
pub fn fill_jacobian_row(t: f64, tau: f64, v_max: f64, out: &mut [f64]) {
    out[0] = v_max * charge_fraction_dtau(t, tau);
    out[1] = charge_fraction(t, tau);
}

/// Sum of squared residuals of the model over a sample set.
pub fn sse(times: &[f64], voltages: &[f64], tau: f64, v_max: f64) -> f64 {
    times
        .iter()
        .zip(voltages.iter())
        .map(|(&t, &v)| {
            let r = v - predict(t, tau, v_max);
            r * r
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predict_reaches_63_percent_at_tau() {
        let v = predict(1e-3, 1e-3, 5.0);
        assert!((v - 5.0 * (1.0 - (-1.0f64).exp())).abs() < 1e-12);
    }

    #[test]
    fn sse_zero_on_exact_samples() {
        let times: Vec<f64> = (1..20).map(|i| i as f64 * 1e-4).collect();
        let volts: Vec<f64> = times.iter().map(|&t| predict(t, 5e-4, 3.0)).collect();
        assert_eq!(sse(&times, &volts, 5e-4, 3.0), 0.0);
    }
}
