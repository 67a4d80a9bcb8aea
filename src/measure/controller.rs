//! Adaptive capacitance estimation loop.
//!
//! Each attempt requests a trace at the current excitation period, fits the
//! charging curve over `[window_start, period/2]` and judges the result twice:
//!
//! - statistically: relative capacitance error against the reference
//! - structurally: `tau_ratio = τ / (period/2)` must sit inside the ratio band
//!
//! `step` performs exactly one attempt and returns a `Transition`; the loop in
//! `Controller::run` only counts attempts and applies transitions. Expected
//! retry conditions (fit failures, out-of-band ratios) never surface as errors.

use crate::data::{TraceRequest, TraceSource};
use crate::domain::{
    AttemptOutcome, AttemptRecord, FitResult, InitialGuess, MeasureConfig, Measurement, MeasurementStatus, Target,
};
use crate::error::{FitError, MeasureError};
use crate::fit::{seed_guess, CurveFitter};
use crate::measure::strategy::{BangBang, PeriodStrategy};

/// Mutable state of one estimation call. Created fresh per call.
#[derive(Debug, Clone, PartialEq)]
pub struct IterationState {
    pub attempt: usize,
    pub period: f64,
    pub last_error_percent: Option<f64>,
    pub last_fit: Option<FitResult>,
    pub last_capacitance: Option<f64>,
    pub last_tau_ratio: Option<f64>,
    pub history: Vec<AttemptRecord>,
}

impl IterationState {
    pub fn new(initial_period: f64) -> Self {
        Self {
            attempt: 0,
            period: initial_period,
            last_error_percent: None,
            last_fit: None,
            last_capacitance: None,
            last_tau_ratio: None,
            history: Vec::new(),
        }
    }
}

/// Why an attempt was not accepted.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryReason {
    FitFailed(FitError),
    /// Window ended before the capacitor charged.
    RatioHigh,
    /// Window mostly on the plateau.
    RatioLow,
    ErrorAboveTarget,
}

impl std::fmt::Display for RetryReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RetryReason::FitFailed(e) => write!(f, "fit failed: {e}"),
            RetryReason::RatioHigh => write!(f, "tau ratio above band"),
            RetryReason::RatioLow => write!(f, "tau ratio below band"),
            RetryReason::ErrorAboveTarget => write!(f, "error above target"),
        }
    }
}

/// Outcome of one attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Converged,
    Retry { next_period: f64, reason: RetryReason },
}

/// Borrowed collaborators plus the immutable inputs of one estimation.
pub struct Controller<'a, S: ?Sized, F: ?Sized, P: ?Sized> {
    source: &'a S,
    fitter: &'a F,
    strategy: &'a P,
    target: Target,
    pulse_voltage: f64,
    config: &'a MeasureConfig,
}

impl<'a, S, F, P> Controller<'a, S, F, P>
where
    S: TraceSource + ?Sized,
    F: CurveFitter + ?Sized,
    P: PeriodStrategy + ?Sized,
{
    pub fn new(
        source: &'a S,
        fitter: &'a F,
        strategy: &'a P,
        target: Target,
        pulse_voltage: f64,
        config: &'a MeasureConfig,
    ) -> Self {
        Self {
            source,
            fitter,
            strategy,
            target,
            pulse_voltage,
            config,
        }
    }

    /// Run attempts until one is accepted or the budget is spent.
    pub fn run(&self, initial_period: f64) -> Result<Measurement, MeasureError> {
        validate_inputs(self.target, self.pulse_voltage, initial_period, self.config)?;

        let span = tracing::info_span!(
            "measure",
            resistance = self.target.resistance,
            pulse_voltage = self.pulse_voltage,
            initial_period
        );
        let _guard = span.enter();

        let mut state = IterationState::new(initial_period);
        while state.attempt < self.config.max_iterations {
            match self.step(&mut state)? {
                Transition::Converged => {
                    tracing::info!(
                        attempts = state.attempt,
                        period = state.period,
                        capacitance = state.last_capacitance,
                        error_percent = state.last_error_percent,
                        "measurement accepted"
                    );
                    return Ok(finish(state, MeasurementStatus::Accepted));
                }
                Transition::Retry { next_period, reason } => {
                    tracing::debug!(
                        attempt = state.attempt,
                        period = state.period,
                        next_period,
                        %reason,
                        "retrying"
                    );
                    state.period = next_period;
                }
            }
        }

        tracing::warn!(
            attempts = state.attempt,
            final_period = state.period,
            error_percent = state.last_error_percent,
            "attempt budget exhausted"
        );
        Ok(finish(state, MeasurementStatus::Exhausted))
    }

    /// One attempt at `state.period`. Leaves `state.period` untouched; the
    /// caller applies the returned transition.
    pub fn step(&self, state: &mut IterationState) -> Result<Transition, MeasureError> {
        state.attempt += 1;
        let period = state.period;

        let request = TraceRequest {
            resistance: self.target.resistance,
            capacitance: self.target.capacitance,
            pulse_voltage: self.pulse_voltage,
            period,
        };
        let trace = self.source.get_trace(&request)?;
        let (times, voltages) = trace.window(self.config.window_start, period / 2.0);

        let fitted = self
            .initial_guess(&times, &voltages)
            .and_then(|guess| self.fitter.fit(&times, &voltages, guess));

        let fit = match fitted {
            Ok(fit) => fit,
            Err(err) if !err.is_recoverable() => return Err(MeasureError::InvalidParameter(err.to_string())),
            Err(err) => {
                tracing::warn!(attempt = state.attempt, period, error = %err, "fit failed");
                state.history.push(AttemptRecord {
                    attempt: state.attempt,
                    period,
                    window_samples: times.len(),
                    outcome: AttemptOutcome::FitFailed {
                        reason: err.to_string(),
                    },
                });
                return Ok(Transition::Retry {
                    next_period: self.strategy.after_fit_failure(period),
                    reason: RetryReason::FitFailed(err),
                });
            }
        };

        let capacitance = fit.time_constant / self.target.resistance;
        let error_percent = self
            .target
            .capacitance
            .map(|c_ref| (capacitance - c_ref).abs() / c_ref * 100.0);
        let tau_ratio = fit.time_constant / (period / 2.0);

        tracing::debug!(
            attempt = state.attempt,
            period,
            samples = times.len(),
            tau = fit.time_constant,
            capacitance,
            error_percent,
            tau_ratio,
            "attempt fitted"
        );

        state.history.push(AttemptRecord {
            attempt: state.attempt,
            period,
            window_samples: times.len(),
            outcome: AttemptOutcome::Fitted {
                fit: fit.clone(),
                capacitance,
                error_percent,
                tau_ratio,
            },
        });
        state.last_fit = Some(fit);
        state.last_capacitance = Some(capacitance);
        state.last_error_percent = error_percent;
        state.last_tau_ratio = Some(tau_ratio);

        let error_ok = error_percent.is_none_or(|e| e <= self.config.error_target_percent);
        let ratio_ok = tau_ratio >= self.config.ratio_low && tau_ratio <= self.config.ratio_high;
        if error_ok && ratio_ok {
            return Ok(Transition::Converged);
        }

        let reason = if tau_ratio > self.config.ratio_high {
            RetryReason::RatioHigh
        } else if tau_ratio < self.config.ratio_low {
            RetryReason::RatioLow
        } else {
            RetryReason::ErrorAboveTarget
        };
        Ok(Transition::Retry {
            next_period: self.strategy.next_period(period, tau_ratio),
            reason,
        })
    }

    fn initial_guess(&self, times: &[f64], voltages: &[f64]) -> Result<InitialGuess, FitError> {
        match self.target.capacitance {
            Some(c_ref) => Ok(InitialGuess {
                time_constant: self.target.resistance * c_ref,
                voltage_max: self.pulse_voltage,
            }),
            None => seed_guess(times, voltages),
        }
    }
}

/// Estimate a capacitance with the default bang-bang period policy.
pub fn estimate_capacitance<S, F>(
    source: &S,
    fitter: &F,
    target: Target,
    pulse_voltage: f64,
    initial_period: f64,
    config: &MeasureConfig,
) -> Result<Measurement, MeasureError>
where
    S: TraceSource + ?Sized,
    F: CurveFitter + ?Sized,
{
    let strategy = BangBang::with_band(config.ratio_low, config.ratio_high);
    estimate_capacitance_with(source, fitter, &strategy, target, pulse_voltage, initial_period, config)
}

/// Estimate a capacitance with a caller-supplied period policy.
pub fn estimate_capacitance_with<S, F, P>(
    source: &S,
    fitter: &F,
    strategy: &P,
    target: Target,
    pulse_voltage: f64,
    initial_period: f64,
    config: &MeasureConfig,
) -> Result<Measurement, MeasureError>
where
    S: TraceSource + ?Sized,
    F: CurveFitter + ?Sized,
    P: PeriodStrategy + ?Sized,
{
    Controller::new(source, fitter, strategy, target, pulse_voltage, config).run(initial_period)
}

fn finish(state: IterationState, status: MeasurementStatus) -> Measurement {
    Measurement {
        status,
        attempts: state.attempt,
        final_period: state.period,
        fit: state.last_fit,
        capacitance: state.last_capacitance,
        error_percent: state.last_error_percent,
        tau_ratio: state.last_tau_ratio,
        history: state.history,
    }
}

fn validate_inputs(
    target: Target,
    pulse_voltage: f64,
    initial_period: f64,
    config: &MeasureConfig,
) -> Result<(), MeasureError> {
    let invalid = |msg: String| Err(MeasureError::InvalidParameter(msg));

    if !(target.resistance.is_finite() && target.resistance > 0.0) {
        return invalid(format!("resistance must be finite and > 0 (got {})", target.resistance));
    }
    if let Some(c) = target.capacitance {
        if !(c.is_finite() && c > 0.0) {
            return invalid(format!("reference capacitance must be finite and > 0 (got {c})"));
        }
    }
    if !(pulse_voltage.is_finite() && pulse_voltage != 0.0) {
        return invalid(format!("pulse voltage must be finite and non-zero (got {pulse_voltage})"));
    }
    if !(initial_period.is_finite() && initial_period > 0.0) {
        return invalid(format!("initial period must be finite and > 0 (got {initial_period})"));
    }
    if config.max_iterations == 0 {
        return invalid("max iterations must be at least 1".to_string());
    }
    if !(config.error_target_percent.is_finite() && config.error_target_percent >= 0.0) {
        return invalid(format!(
            "error target must be finite and >= 0 (got {})",
            config.error_target_percent
        ));
    }
    if !(config.window_start.is_finite() && config.window_start >= 0.0) {
        return invalid(format!("window start must be finite and >= 0 (got {})", config.window_start));
    }
    if !(config.ratio_low > 0.0 && config.ratio_low <= config.ratio_high && config.ratio_high.is_finite()) {
        return invalid(format!(
            "ratio band must satisfy 0 < low <= high (got {}..{})",
            config.ratio_low, config.ratio_high
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::domain::Trace;
    use crate::fit::LevenbergMarquardt;
    use crate::models::predict;

    /// Exact charging curve for the request, counting calls.
    struct IdealSource {
        calls: AtomicUsize,
    }

    impl IdealSource {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl TraceSource for IdealSource {
        fn get_trace(&self, request: &TraceRequest) -> Result<Trace, MeasureError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let tau = request.resistance * request.capacitance.unwrap_or(17e-9);
            let n = 400;
            let dt = request.period / n as f64;
            let times: Vec<f64> = (0..=n).map(|i| i as f64 * dt).collect();
            let volts = times.iter().map(|&t| predict(t, tau, request.pulse_voltage)).collect();
            Trace::new(times, volts)
        }
    }

    struct FailingFitter;

    impl CurveFitter for FailingFitter {
        fn fit(&self, _t: &[f64], _v: &[f64], _g: InitialGuess) -> Result<FitResult, FitError> {
            Err(FitError::DidNotConverge { evaluations: 5000 })
        }
    }

    /// Always reports the same τ, whatever the data.
    struct FixedFitter(f64);

    impl CurveFitter for FixedFitter {
        fn fit(&self, times: &[f64], _v: &[f64], guess: InitialGuess) -> Result<FitResult, FitError> {
            Ok(FitResult {
                time_constant: self.0,
                voltage_max: guess.voltage_max,
                covariance: None,
                sse: 0.0,
                rmse: 0.0,
                n: times.len(),
                evaluations: 1,
            })
        }
    }

    fn target(c: Option<f64>) -> Target {
        Target {
            resistance: 10_000.0,
            capacitance: c,
        }
    }

    #[test]
    fn ideal_source_is_accepted() {
        let source = IdealSource::new();
        let m = estimate_capacitance(
            &source,
            &LevenbergMarquardt::default(),
            target(Some(17e-9)),
            3.0,
            0.02,
            &MeasureConfig::default(),
        )
        .unwrap();

        assert!(m.is_accepted());
        assert!(m.attempts <= 15);
        assert!(m.error_percent.unwrap() < 1e-3);
        let ratio = m.tau_ratio.unwrap();
        assert!((0.3..=0.9).contains(&ratio), "ratio={ratio}");
        assert_eq!(source.calls(), m.attempts);
    }

    #[test]
    fn failing_fits_exhaust_the_budget() {
        let source = IdealSource::new();
        let config = MeasureConfig::default();
        let m = estimate_capacitance(&source, &FailingFitter, target(Some(17e-9)), 3.0, 0.02, &config).unwrap();

        assert_eq!(m.status, MeasurementStatus::Exhausted);
        assert_eq!(m.attempts, config.max_iterations);
        assert_eq!(m.history.len(), config.max_iterations);
        assert!(m.fit.is_none());
        assert!(m.capacitance.is_none());

        let expected = 0.02 * 1.2f64.powi(config.max_iterations as i32);
        assert!((m.final_period - expected).abs() <= expected * 1e-12);

        let mut period = 0.02;
        for rec in &m.history {
            assert!((rec.period - period).abs() <= period * 1e-12);
            assert!(matches!(rec.outcome, AttemptOutcome::FitFailed { .. }));
            period *= 1.2;
        }
    }

    #[test]
    fn zero_reference_capacitance_makes_no_source_calls() {
        let source = IdealSource::new();
        let err = estimate_capacitance(
            &source,
            &LevenbergMarquardt::default(),
            target(Some(0.0)),
            3.0,
            0.02,
            &MeasureConfig::default(),
        )
        .unwrap_err();

        assert!(matches!(err, MeasureError::InvalidParameter(_)));
        assert_eq!(source.calls(), 0);
    }

    #[test]
    fn invalid_inputs_are_rejected_up_front() {
        let source = IdealSource::new();
        let fitter = LevenbergMarquardt::default();
        let config = MeasureConfig::default();

        let zero_r = Target {
            resistance: 0.0,
            capacitance: Some(1e-9),
        };
        assert!(estimate_capacitance(&source, &fitter, zero_r, 3.0, 0.02, &config).is_err());
        assert!(estimate_capacitance(&source, &fitter, target(None), 0.0, 0.02, &config).is_err());
        assert!(estimate_capacitance(&source, &fitter, target(None), 3.0, -1.0, &config).is_err());

        let no_budget = MeasureConfig {
            max_iterations: 0,
            ..MeasureConfig::default()
        };
        assert!(estimate_capacitance(&source, &fitter, target(None), 3.0, 0.02, &no_budget).is_err());
        assert_eq!(source.calls(), 0);
    }

    #[test]
    fn high_ratio_grows_the_period() {
        // τ = 0.95 · period/2 on the first attempt.
        let period = 0.02;
        let fitter = FixedFitter(0.95 * period / 2.0);
        let config = MeasureConfig {
            max_iterations: 2,
            ..MeasureConfig::default()
        };
        let m = estimate_capacitance(&IdealSource::new(), &fitter, target(None), 3.0, period, &config).unwrap();

        assert_eq!(m.history.len(), 2);
        assert_eq!(m.history[0].period, period);
        assert_eq!(m.history[1].period, period * 1.2);
    }

    #[test]
    fn single_attempt_budget_stops_after_one_pass() {
        let fitter = FixedFitter(0.95 * 0.01);
        let config = MeasureConfig {
            max_iterations: 1,
            ..MeasureConfig::default()
        };
        let source = IdealSource::new();
        let m = estimate_capacitance(&source, &fitter, target(None), 3.0, 0.02, &config).unwrap();

        assert_eq!(m.status, MeasurementStatus::Exhausted);
        assert_eq!(m.attempts, 1);
        assert_eq!(source.calls(), 1);
        assert!((m.tau_ratio.unwrap() - 0.95).abs() < 1e-12);
        assert_eq!(m.final_period, 0.02 * 1.2);
    }

    #[test]
    fn attempts_increase_by_one() {
        let config = MeasureConfig::default();
        let m = estimate_capacitance(
            &IdealSource::new(),
            &FixedFitter(1e-9),
            target(Some(17e-9)),
            3.0,
            0.02,
            &config,
        )
        .unwrap();

        assert_eq!(m.attempts, config.max_iterations);
        for (i, rec) in m.history.iter().enumerate() {
            assert_eq!(rec.attempt, i + 1);
        }
    }

    #[test]
    fn missing_reference_accepts_on_ratio_alone() {
        let fitter = FixedFitter(0.5 * 0.01);
        let m = estimate_capacitance(
            &IdealSource::new(),
            &fitter,
            target(None),
            3.0,
            0.02,
            &MeasureConfig::default(),
        )
        .unwrap();

        assert!(m.is_accepted());
        assert_eq!(m.attempts, 1);
        assert_eq!(m.error_percent, None);
        assert_eq!(m.final_period, 0.02);
        assert_eq!(m.capacitance, Some(0.005 / 10_000.0));
    }

    #[test]
    fn error_above_target_nudges_period() {
        // Ratio 0.55 is in band but the capacitance is 10% off.
        let period = 0.04;
        let fitter = FixedFitter(1.1 * 10_000.0 * 1e-6);
        let config = MeasureConfig {
            max_iterations: 2,
            ..MeasureConfig::default()
        };
        let m = estimate_capacitance(&IdealSource::new(), &fitter, target(Some(1e-6)), 3.0, period, &config).unwrap();

        assert_eq!(m.status, MeasurementStatus::Exhausted);
        assert_eq!(m.history[1].period, period * 1.05);
    }

    #[test]
    fn step_leaves_period_to_the_caller() {
        let source = IdealSource::new();
        let fitter = FixedFitter(0.95 * 0.01);
        let strategy = BangBang::default();
        let config = MeasureConfig::default();
        let controller = Controller::new(&source, &fitter, &strategy, target(None), 3.0, &config);

        let mut state = IterationState::new(0.02);
        let transition = controller.step(&mut state).unwrap();
        assert_eq!(state.attempt, 1);
        assert_eq!(state.period, 0.02);
        assert_eq!(
            transition,
            Transition::Retry {
                next_period: 0.02 * 1.2,
                reason: RetryReason::RatioHigh,
            }
        );
    }

    struct RejectingFitter;

    impl CurveFitter for RejectingFitter {
        fn fit(&self, _t: &[f64], _v: &[f64], _g: InitialGuess) -> Result<FitResult, FitError> {
            Err(FitError::InvalidInput("samples must be finite".to_string()))
        }
    }

    #[test]
    fn unrecoverable_fit_error_is_invalid_parameter() {
        let source = IdealSource::new();
        let err = estimate_capacitance(
            &source,
            &RejectingFitter,
            target(Some(17e-9)),
            3.0,
            0.02,
            &MeasureConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, MeasureError::InvalidParameter(ref msg) if msg.contains("samples must be finite")));
        assert_eq!(source.calls(), 1);
    }

    struct OfflineSource;

    impl TraceSource for OfflineSource {
        fn get_trace(&self, _request: &TraceRequest) -> Result<Trace, MeasureError> {
            Err(MeasureError::Source("scope offline".to_string()))
        }
    }

    #[test]
    fn source_failure_ends_the_call() {
        let err = estimate_capacitance(
            &OfflineSource,
            &LevenbergMarquardt::default(),
            target(Some(17e-9)),
            3.0,
            0.02,
            &MeasureConfig::default(),
        )
        .unwrap_err();
        assert_eq!(err, MeasureError::Source("scope offline".to_string()));
    }

    #[test]
    fn empty_window_retries_with_longer_period() {
        // The window starts after the charging half ends, so nothing is fitted.
        let config = MeasureConfig {
            window_start: 0.015,
            max_iterations: 2,
            ..MeasureConfig::default()
        };
        let source = IdealSource::new();
        let fitter = LevenbergMarquardt::default();
        let strategy = BangBang::default();
        let controller = Controller::new(&source, &fitter, &strategy, target(Some(17e-9)), 3.0, &config);

        let mut state = IterationState::new(0.02);
        assert_eq!(
            controller.step(&mut state).unwrap(),
            Transition::Retry {
                next_period: 0.02 * 1.2,
                reason: RetryReason::FitFailed(FitError::InsufficientData { samples: 0, params: 2 }),
            }
        );

        let m = estimate_capacitance(&source, &fitter, target(Some(17e-9)), 3.0, 0.02, &config).unwrap();
        assert_eq!(m.status, MeasurementStatus::Exhausted);
        assert_eq!(m.attempts, 2);
        assert!(m.fit.is_none());
        assert_eq!(m.history[1].period, 0.02 * 1.2);
        assert!(m.history.iter().all(|rec| rec.window_samples == 0));
        assert!(m
            .history
            .iter()
            .all(|rec| matches!(rec.outcome, AttemptOutcome::FitFailed { .. })));
        assert_eq!(m.final_period, 0.02 * 1.2 * 1.2);
    }

    #[test]
    fn calls_do_not_share_state() {
        let source = IdealSource::new();
        let fitter = LevenbergMarquardt::default();
        let config = MeasureConfig::default();
        let a = estimate_capacitance(&source, &fitter, target(Some(17e-9)), 3.0, 0.02, &config).unwrap();
        let b = estimate_capacitance(&source, &fitter, target(Some(17e-9)), 3.0, 0.02, &config).unwrap();
        assert_eq!(a, b);
    }
}
