//! Stable basis functions for the RC charging curve.
//!
//! The charging model is `V(t) = V_max * g(t, τ)` with
//!
//! - `g(t, τ) = 1 - exp(-t/τ)` (charged fraction)
//! - `∂g/∂τ = -(t/τ²) exp(-t/τ)`
//!
//! Numerical notes:
//! - For small `x = t/τ`, `1 - exp(-x)` suffers from catastrophic cancellation.
//!   We use `expm1`, which stays accurate down to the first sample after the edge.
//! - Negative times are clamped to zero (the capacitor has not started charging).

/// Charged fraction `1 - exp(-t/τ)`.
pub fn charge_fraction(t: f64, tau: f64) -> f64 {
    let x = t.max(0.0) / tau;
    -(-x).exp_m1()
}

/// Derivative of the charged fraction with respect to `τ`.
pub fn charge_fraction_dtau(t: f64, tau: f64) -> f64 {
    let t = t.max(0.0);
    let x = t / tau;
    -(x / tau) * (-x).exp()
}
