//! Reporting utilities: fit residuals and formatted terminal output.

pub mod format;

pub use format::*;

use crate::domain::FitResult;
use crate::error::AppError;
use crate::models::predict;

/// Observed vs fitted voltage at one sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleResidual {
    pub time: f64,
    pub v_obs: f64,
    pub v_fit: f64,
    pub residual: f64,
}

/// Summary of a residual set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResidualStats {
    pub n: usize,
    pub mean: f64,
    pub max_abs: f64,
    /// Time of the largest absolute residual.
    pub max_abs_time: f64,
}

/// Compute fitted values and residuals for each sample.
pub fn compute_residuals(times: &[f64], voltages: &[f64], fit: &FitResult) -> Result<Vec<SampleResidual>, AppError> {
    let mut out = Vec::with_capacity(times.len());
    for (&t, &v) in times.iter().zip(voltages) {
        let v_fit = predict(t, fit.time_constant, fit.voltage_max);
        if !v_fit.is_finite() {
            return Err(AppError::new(4, "Non-finite model prediction during residual computation."));
        }
        out.push(SampleResidual {
            time: t,
            v_obs: v,
            v_fit,
            residual: v - v_fit,
        });
    }
    Ok(out)
}

pub fn residual_stats(residuals: &[SampleResidual]) -> Option<ResidualStats> {
    let worst = residuals
        .iter()
        .max_by(|a, b| a.residual.abs().total_cmp(&b.residual.abs()))?;
    let mean = residuals.iter().map(|r| r.residual).sum::<f64>() / residuals.len() as f64;
    Some(ResidualStats {
        n: residuals.len(),
        mean,
        max_abs: worst.residual.abs(),
        max_abs_time: worst.time,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fit(tau: f64, v_max: f64) -> FitResult {
        FitResult {
            time_constant: tau,
            voltage_max: v_max,
            covariance: None,
            sse: 0.0,
            rmse: 0.0,
            n: 0,
            evaluations: 0,
        }
    }

    #[test]
    fn residuals_against_exact_curve_are_zero() {
        let times = [1e-4, 2e-4, 3e-4];
        let volts: Vec<f64> = times.iter().map(|&t| predict(t, 1e-4, 2.0)).collect();
        let res = compute_residuals(&times, &volts, &fit(1e-4, 2.0)).unwrap();
        assert_eq!(res.len(), 3);
        assert!(res.iter().all(|r| r.residual == 0.0));
    }

    #[test]
    fn stats_find_worst_sample() {
        let times = [1.0, 2.0, 3.0];
        let volts = [1.0, 1.5, 0.9];
        let res = compute_residuals(&times, &volts, &fit(1e-9, 1.0)).unwrap();
        let stats = residual_stats(&res).unwrap();
        assert_eq!(stats.n, 3);
        assert!((stats.max_abs - 0.5).abs() < 1e-12);
        assert_eq!(stats.max_abs_time, 2.0);
        assert!(residual_stats(&[]).is_none());
    }
}
