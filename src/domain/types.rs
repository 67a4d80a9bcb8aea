//! Shared domain types.
//!
//! These types are intentionally kept lightweight and serializable so they can be:
//!
//! - used in-memory during a measurement
//! - exported to JSON
//! - printed by the reporter without reaching back into the controller

use chrono::{DateTime, Local};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::MeasureError;

/// Paired time/voltage samples from one charging transient.
///
/// Construction validates the invariants every consumer relies on: non-empty,
/// equal lengths, finite values, strictly increasing time.
#[derive(Debug, Clone, PartialEq)]
pub struct Trace {
    times: Vec<f64>,
    voltages: Vec<f64>,
}

impl Trace {
    pub fn new(times: Vec<f64>, voltages: Vec<f64>) -> Result<Self, MeasureError> {
        if times.is_empty() || voltages.is_empty() {
            return Err(MeasureError::InvalidParameter("trace is empty".to_string()));
        }
        if times.len() != voltages.len() {
            return Err(MeasureError::InvalidParameter(format!(
                "trace length mismatch: {} time sample(s) vs {} voltage sample(s)",
                times.len(),
                voltages.len()
            )));
        }
        if let Some(i) = times.iter().chain(voltages.iter()).position(|v| !v.is_finite()) {
            return Err(MeasureError::InvalidParameter(format!(
                "trace contains a non-finite value (flat index {i})"
            )));
        }
        if let Some(i) = times.windows(2).position(|w| w[1] <= w[0]) {
            return Err(MeasureError::InvalidParameter(format!(
                "trace time is not strictly increasing at sample {}",
                i + 1
            )));
        }
        Ok(Self { times, voltages })
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn voltages(&self) -> &[f64] {
        &self.voltages
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// Samples with `start <= t <= end`, as owned vectors ready for fitting.
    pub fn window(&self, start: f64, end: f64) -> (Vec<f64>, Vec<f64>) {
        self.times
            .iter()
            .zip(self.voltages.iter())
            .filter(|&(&t, _)| t >= start && t <= end)
            .map(|(&t, &v)| (t, v))
            .unzip()
    }
}

/// Starting point handed to the fitter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InitialGuess {
    pub time_constant: f64,
    pub voltage_max: f64,
}

/// Best-fit charging curve parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitResult {
    /// Fitted τ in seconds.
    pub time_constant: f64,
    /// Fitted asymptotic voltage in volts.
    pub voltage_max: f64,
    /// Parameter covariance `[[ττ, τV], [Vτ, VV]]`, when estimable.
    pub covariance: Option<[[f64; 2]; 2]>,
    pub sse: f64,
    pub rmse: f64,
    /// Number of samples in the fitted window.
    pub n: usize,
    /// Model evaluations spent by the optimizer.
    pub evaluations: usize,
}

impl FitResult {
    /// One-sigma uncertainties `(σ_τ, σ_Vmax)` from the covariance diagonal.
    pub fn std_errors(&self) -> Option<(f64, f64)> {
        let cov = self.covariance?;
        let s_tau = cov[0][0].max(0.0).sqrt();
        let s_v = cov[1][1].max(0.0).sqrt();
        Some((s_tau, s_v))
    }
}

/// Reference values a measurement is judged against. Never mutated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Target {
    /// Reference resistance in ohms.
    pub resistance: f64,
    /// Reference capacitance in farads, when known.
    pub capacitance: Option<f64>,
}

/// Convergence controller settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasureConfig {
    /// Accept when the relative capacitance error is at or below this (percent).
    pub error_target_percent: f64,
    /// Attempt budget.
    pub max_iterations: usize,
    /// Fit window starts here (seconds after the rising edge).
    pub window_start: f64,
    /// Accepted `tau_ratio` band, inclusive.
    pub ratio_low: f64,
    pub ratio_high: f64,
}

impl Default for MeasureConfig {
    fn default() -> Self {
        Self {
            error_target_percent: 2.0,
            max_iterations: 15,
            window_start: 1e-5,
            ratio_low: 0.3,
            ratio_high: 0.9,
        }
    }
}

/// What one attempt produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Fitted {
        fit: FitResult,
        capacitance: f64,
        error_percent: Option<f64>,
        tau_ratio: f64,
    },
    FitFailed {
        reason: String,
    },
}

/// One pass through the convergence loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// 1-based attempt number.
    pub attempt: usize,
    /// Excitation period used for this attempt.
    pub period: f64,
    /// Samples inside the fit window.
    pub window_samples: usize,
    pub outcome: AttemptOutcome,
}

/// Terminal state of a measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeasurementStatus {
    /// Error target and window check were both met.
    Accepted,
    /// The attempt budget ran out; values are best effort.
    Exhausted,
}

impl MeasurementStatus {
    pub fn display_name(self) -> &'static str {
        match self {
            MeasurementStatus::Accepted => "ACCEPTED",
            MeasurementStatus::Exhausted => "EXHAUSTED",
        }
    }
}

/// Result of a capacitance estimation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub status: MeasurementStatus,
    pub attempts: usize,
    /// Period of the accepted attempt, or the adjusted period after the last
    /// attempt when exhausted.
    pub final_period: f64,
    pub fit: Option<FitResult>,
    pub capacitance: Option<f64>,
    pub error_percent: Option<f64>,
    pub tau_ratio: Option<f64>,
    pub history: Vec<AttemptRecord>,
}

impl Measurement {
    pub fn is_accepted(&self) -> bool {
        self.status == MeasurementStatus::Accepted
    }

    pub fn time_constant(&self) -> Option<f64> {
        self.fit.as_ref().map(|f| f.time_constant)
    }

    /// Period of the most recent attempt that produced a fit.
    pub fn fitted_period(&self) -> Option<f64> {
        self.history.iter().rev().find_map(|r| match r.outcome {
            AttemptOutcome::Fitted { .. } => Some(r.period),
            AttemptOutcome::FitFailed { .. } => None,
        })
    }
}

/// A saved measurement (JSON).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementFile {
    pub tool: String,
    pub generated: DateTime<Local>,
    pub target: Target,
    pub pulse_voltage: f64,
    pub initial_period: f64,
    pub config: MeasureConfig,
    pub measurement: Measurement,
}

/// Output format for terminal results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Text,
    Json,
}
