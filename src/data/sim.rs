//! Series-RC pulse response simulator.
//!
//! Stands in for a circuit simulator run of
//!
//! ```text
//! vin ──R──┬── vout
//!          C
//!         gnd
//! ```
//!
//! driven by a 50 % duty-cycle pulse. The input is piecewise linear, so between
//! waveform corners the ODE `dv/dt = (u(t) - v) / RC` has a closed-form
//! solution; we step corner to corner and sample to sample with it, which makes
//! the trace exact up to floating point (no truncation error to tune).
//!
//! Optional Gaussian noise models a real acquisition. The RNG seed is derived
//! from the configured seed and the request, so the same request always yields
//! the same trace.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::Normal;

use crate::data::pulse::PulseSpec;
use crate::data::{TraceRequest, TraceSource};
use crate::domain::Trace;
use crate::error::MeasureError;

/// Simulator settings.
#[derive(Debug, Clone, PartialEq)]
pub struct SimConfig {
    /// Nominal sample spacing in seconds.
    pub step: f64,
    /// Lower bound on samples per period; shrinks the step for short periods.
    pub min_samples: usize,
    /// Upper bound on samples per trace; longer periods are rejected.
    pub max_samples: usize,
    pub rise_time: f64,
    pub fall_time: f64,
    /// Standard deviation of additive noise, volts. Zero disables noise.
    pub noise_std: f64,
    pub seed: u64,
    /// Physical capacitance of the simulated part. Overrides the request,
    /// which lets a known-wrong reference be exercised.
    pub capacitance: Option<f64>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            step: 1e-5,
            min_samples: 200,
            max_samples: 1_000_000,
            rise_time: 1e-9,
            fall_time: 1e-9,
            noise_std: 0.0,
            seed: 42,
            capacitance: None,
        }
    }
}

/// Exact-solution RC transient source.
#[derive(Debug, Clone, Default)]
pub struct RcSimulator {
    config: SimConfig,
}

impl RcSimulator {
    pub fn new(config: SimConfig) -> Result<Self, MeasureError> {
        if !(config.step.is_finite() && config.step > 0.0) {
            return Err(MeasureError::InvalidParameter(format!(
                "simulation step must be finite and > 0 (got {})",
                config.step
            )));
        }
        if config.min_samples < 2 {
            return Err(MeasureError::InvalidParameter(
                "simulation needs at least 2 samples per period".to_string(),
            ));
        }
        if config.max_samples < config.min_samples {
            return Err(MeasureError::InvalidParameter(format!(
                "max_samples ({}) must be >= min_samples ({})",
                config.max_samples, config.min_samples
            )));
        }
        if !(config.rise_time.is_finite() && config.rise_time >= 0.0)
            || !(config.fall_time.is_finite() && config.fall_time >= 0.0)
        {
            return Err(MeasureError::InvalidParameter(
                "rise/fall times must be finite and >= 0".to_string(),
            ));
        }
        if !(config.noise_std.is_finite() && config.noise_std >= 0.0) {
            return Err(MeasureError::InvalidParameter(format!(
                "noise std must be finite and >= 0 (got {})",
                config.noise_std
            )));
        }
        if let Some(c) = config.capacitance {
            if !(c.is_finite() && c > 0.0) {
                return Err(MeasureError::InvalidParameter(format!(
                    "simulated capacitance must be finite and > 0 (got {c})"
                )));
            }
        }
        Ok(Self { config })
    }

    /// Sample spacing actually used for a given period.
    pub fn effective_step(&self, period: f64) -> f64 {
        self.config.step.min(period / self.config.min_samples as f64)
    }
}

impl TraceSource for RcSimulator {
    fn get_trace(&self, request: &TraceRequest) -> Result<Trace, MeasureError> {
        let resistance = request.resistance;
        let capacitance = self.config.capacitance.or(request.capacitance).ok_or_else(|| {
            MeasureError::InvalidParameter(
                "simulator needs a capacitance (reference or device under test)".to_string(),
            )
        })?;
        if !(resistance.is_finite() && resistance > 0.0) {
            return Err(MeasureError::InvalidParameter(format!(
                "resistance must be finite and > 0 (got {resistance})"
            )));
        }
        if !(capacitance.is_finite() && capacitance > 0.0) {
            return Err(MeasureError::InvalidParameter(format!(
                "capacitance must be finite and > 0 (got {capacitance})"
            )));
        }
        if !(request.period.is_finite() && request.period > 0.0) {
            return Err(MeasureError::InvalidParameter(format!(
                "period must be finite and > 0 (got {})",
                request.period
            )));
        }
        if !request.pulse_voltage.is_finite() {
            return Err(MeasureError::InvalidParameter("pulse voltage must be finite".to_string()));
        }

        let tau = resistance * capacitance;
        let pulse = PulseSpec::square(
            request.pulse_voltage,
            request.period,
            self.config.rise_time,
            self.config.fall_time,
        );

        let step = self.effective_step(request.period);
        let span = request.period / step;
        if span > self.config.max_samples as f64 {
            return Err(MeasureError::InvalidParameter(format!(
                "period {} s needs ~{span:.0} samples at step {step:e} s (limit {})",
                request.period, self.config.max_samples
            )));
        }
        // Guard against `period / step` landing a hair under an integer.
        let n = (span * (1.0 + 1e-12)).floor() as usize;
        let times: Vec<f64> = (0..=n).map(|i| i as f64 * step).collect();

        let mut voltages = integrate(&pulse, tau, &times);

        if self.config.noise_std > 0.0 {
            let normal = Normal::new(0.0, self.config.noise_std)
                .map_err(|e| MeasureError::InvalidParameter(format!("noise distribution error: {e}")))?;
            let mut rng = StdRng::seed_from_u64(noise_seed(self.config.seed, request, capacitance));
            for v in voltages.iter_mut() {
                *v += normal.sample(&mut rng);
            }
        }

        tracing::trace!(tau, step, samples = times.len(), period = request.period, "simulated RC trace");
        Trace::new(times, voltages)
    }
}

/// Capacitor voltage at each sample time, starting discharged at `t = 0`.
fn integrate(pulse: &PulseSpec, tau: f64, times: &[f64]) -> Vec<f64> {
    let t_end = times.last().copied().unwrap_or(0.0);
    let corners = pulse.breakpoints(t_end);
    let mut corner_idx = 0;

    let mut out = Vec::with_capacity(times.len());
    let mut t = 0.0;
    let mut v = 0.0;

    for &ts in times {
        while corner_idx < corners.len() && corners[corner_idx] < ts {
            let c = corners[corner_idx];
            if c > t {
                v = advance(pulse, tau, t, c, v);
                t = c;
            }
            corner_idx += 1;
        }
        if ts > t {
            v = advance(pulse, tau, t, ts, v);
            t = ts;
        }
        out.push(v);
    }

    out
}

/// Exact RC response over `[a, b]`, where the input is linear.
///
/// With `u(s) = u_a + k s`:
/// `v(h) = v0 + (u_a - kτ - v0)(1 - e^{-h/τ}) + k h`.
fn advance(pulse: &PulseSpec, tau: f64, a: f64, b: f64, v0: f64) -> f64 {
    let h = b - a;
    // Sample inside the piece so a step discontinuity at either end cannot leak in.
    let q1 = a + 0.25 * h;
    let q3 = a + 0.75 * h;
    let u1 = pulse.evaluate(q1);
    let u3 = pulse.evaluate(q3);
    let k = (u3 - u1) / (0.5 * h);
    let u_a = u1 - k * 0.25 * h;

    let one_minus_e = -(-h / tau).exp_m1();
    v0 + (u_a - k * tau - v0) * one_minus_e + k * h
}

fn noise_seed(seed: u64, request: &TraceRequest, capacitance: f64) -> u64 {
    let mut hasher = DefaultHasher::new();
    seed.hash(&mut hasher);
    request.resistance.to_bits().hash(&mut hasher);
    capacitance.to_bits().hash(&mut hasher);
    request.pulse_voltage.to_bits().hash(&mut hasher);
    request.period.to_bits().hash(&mut hasher);
    hasher.finish()
}
