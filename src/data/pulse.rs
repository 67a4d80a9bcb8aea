//! Periodic pulse excitation.
//!
//! ```text
//!       v2 ─────┬─────┐
//!              /│     │\
//!             / │     │ \
//!            /  │     │  \
//!       v1 ─┘   │     │   └─────
//!           │   │     │   │
//!           td  tr    pw  tf
//!           └───────per───────┘
//! ```
//!
//! The waveform is piecewise linear; `breakpoints` lists every corner so the
//! simulator can integrate each linear piece exactly.

#[derive(Debug, Clone, PartialEq)]
pub struct PulseSpec {
    /// Low level.
    pub v1: f64,
    /// High level.
    pub v2: f64,
    pub delay: f64,
    pub rise: f64,
    pub fall: f64,
    /// Time at the high level.
    pub width: f64,
    pub period: f64,
}

impl PulseSpec {
    /// 50 % duty-cycle pulse from 0 V to `amplitude`, starting at `t = 0`.
    pub fn square(amplitude: f64, period: f64, rise: f64, fall: f64) -> Self {
        Self {
            v1: 0.0,
            v2: amplitude,
            delay: 0.0,
            rise,
            fall,
            width: period / 2.0,
            period,
        }
    }

    /// Evaluate the waveform at `t`.
    pub fn evaluate(&self, t: f64) -> f64 {
        if t < self.delay {
            return self.v1;
        }

        let t_rel = if self.period > 0.0 {
            (t - self.delay) % self.period
        } else {
            t - self.delay
        };

        if t_rel < self.rise {
            if self.rise > 0.0 {
                self.v1 + (self.v2 - self.v1) * t_rel / self.rise
            } else {
                self.v2
            }
        } else if t_rel < self.rise + self.width {
            self.v2
        } else if t_rel < self.rise + self.width + self.fall {
            if self.fall > 0.0 {
                self.v2 + (self.v1 - self.v2) * (t_rel - self.rise - self.width) / self.fall
            } else {
                self.v1
            }
        } else {
            self.v1
        }
    }

    /// Waveform corners in `(0, t_end)`, sorted.
    pub fn breakpoints(&self, t_end: f64) -> Vec<f64> {
        let mut out = Vec::new();
        if !(self.period > 0.0) {
            return out;
        }

        let offsets = [
            0.0,
            self.rise,
            self.rise + self.width,
            self.rise + self.width + self.fall,
        ];
        let mut start = self.delay;
        while start < t_end {
            for off in offsets {
                let t = start + off;
                if t > 0.0 && t < t_end {
                    out.push(t);
                }
            }
            start += self.period;
        }

        out.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        out.dedup();
        out
    }
}
