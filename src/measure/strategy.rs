//! Excitation period adjustment between attempts.

/// Decides the period of the next attempt.
///
/// Implementations see only the current period and the latest `tau_ratio`;
/// they carry no memory of earlier attempts.
pub trait PeriodStrategy {
    /// Next period after a successful fit that was not accepted.
    fn next_period(&self, period: f64, tau_ratio: f64) -> f64;

    /// Next period after the fitter gave up on the current window.
    fn after_fit_failure(&self, period: f64) -> f64;
}

/// Fixed-factor bang-bang policy.
///
/// - `tau_ratio > high`: the window ended before the capacitor charged; grow.
/// - `tau_ratio < low`: most samples sit on the plateau; shrink.
/// - otherwise: ratio is fine but the error is not; nudge.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BangBang {
    pub grow: f64,
    pub shrink: f64,
    pub nudge: f64,
    pub low: f64,
    pub high: f64,
}

impl Default for BangBang {
    fn default() -> Self {
        Self {
            grow: 1.2,
            shrink: 0.8,
            nudge: 1.05,
            low: 0.3,
            high: 0.9,
        }
    }
}

impl BangBang {
    /// Default factors with a custom ratio band.
    pub fn with_band(low: f64, high: f64) -> Self {
        Self {
            low,
            high,
            ..Self::default()
        }
    }
}

impl PeriodStrategy for BangBang {
    fn next_period(&self, period: f64, tau_ratio: f64) -> f64 {
        if tau_ratio > self.high {
            period * self.grow
        } else if tau_ratio < self.low {
            period * self.shrink
        } else {
            period * self.nudge
        }
    }

    fn after_fit_failure(&self, period: f64) -> f64 {
        period * self.grow
    }
}
