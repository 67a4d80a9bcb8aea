//! Formatted terminal output.
//!
//! We keep formatting code in one place so:
//! - the controller and fitter stay free of presentation
//! - output changes are localized (the tests below pin the important lines)

use crate::domain::{AttemptOutcome, AttemptRecord, FitResult, Measurement};
use crate::report::ResidualStats;

/// Inputs of a measurement that the result itself does not carry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReportContext {
    pub resistance: f64,
    pub pulse_voltage: f64,
    pub reference_capacitance: Option<f64>,
}

/// One row of a sweep: the simulated device and its outcome.
#[derive(Debug, Clone)]
pub struct SweepRow {
    pub dut_capacitance: f64,
    pub outcome: Result<Measurement, String>,
}

/// Format the measurement summary.
pub fn format_measurement(ctx: &ReportContext, m: &Measurement) -> String {
    let mut out = String::new();

    out.push_str("=== rcm - RC capacitance measurement ===\n");
    out.push_str(&format!("Status: {}\n", m.status.display_name()));
    out.push_str(&format!("Attempts: {}\n", m.attempts));
    out.push_str(&format!("Resistance: {}\n", fmt_si(ctx.resistance, "Ω")));
    out.push_str(&format!("Pulse voltage: {}\n", fmt_si(ctx.pulse_voltage, "V")));
    out.push_str(&format!("Final period: {}\n", fmt_si(m.final_period, "s")));

    match &m.fit {
        Some(fit) => {
            let tau = fmt_si(fit.time_constant, "s");
            match fit.std_errors() {
                Some((s_tau, _)) => out.push_str(&format!("Time constant: {tau} (± {})\n", fmt_si(s_tau, "s"))),
                None => out.push_str(&format!("Time constant: {tau}\n")),
            }
        }
        None => out.push_str("Time constant: n/a\n"),
    }

    out.push_str(&format!(
        "Capacitance: {}\n",
        m.capacitance.map_or_else(|| "n/a".to_string(), |c| fmt_si(c, "F"))
    ));
    out.push_str(&format!(
        "Reference: {}\n",
        ctx.reference_capacitance
            .map_or_else(|| "n/a".to_string(), |c| fmt_si(c, "F"))
    ));
    out.push_str(&format!(
        "Error: {}\n",
        m.error_percent.map_or_else(|| "n/a".to_string(), |e| format!("{e:.4} %"))
    ));
    out.push_str(&format!(
        "Tau ratio: {}\n",
        m.tau_ratio.map_or_else(|| "n/a".to_string(), |r| format!("{r:.3}"))
    ));

    out
}

/// Format the per-attempt history table.
pub fn format_attempts(history: &[AttemptRecord]) -> String {
    let mut out = String::new();

    push_row(
        &mut out,
        format!(
            "{:>3} {:>14} {:>7} {:>14} {:>14} {:>10} {:>7} {:<}",
            "#", "period", "samples", "tau", "capacitance", "error%", "ratio", "note"
        ),
    );
    push_row(
        &mut out,
        format!(
            "{:-<3} {:-<14} {:-<7} {:-<14} {:-<14} {:-<10} {:-<7} {:-<4}",
            "", "", "", "", "", "", "", ""
        ),
    );

    for r in history {
        let line = match &r.outcome {
            AttemptOutcome::Fitted {
                fit,
                capacitance,
                error_percent,
                tau_ratio,
            } => format!(
                "{:>3} {:>14} {:>7} {:>14} {:>14} {:>10} {:>7.3}",
                r.attempt,
                fmt_si(r.period, "s"),
                r.window_samples,
                fmt_si(fit.time_constant, "s"),
                fmt_si(*capacitance, "F"),
                error_percent.map_or_else(|| "n/a".to_string(), |e| format!("{e:.4}")),
                tau_ratio,
            ),
            AttemptOutcome::FitFailed { reason } => format!(
                "{:>3} {:>14} {:>7} {:>14} {:>14} {:>10} {:>7} {}",
                r.attempt,
                fmt_si(r.period, "s"),
                r.window_samples,
                "-",
                "-",
                "-",
                "-",
                reason
            ),
        };
        push_row(&mut out, line);
    }

    out
}

/// Format a single-shot fit (no convergence loop).
pub fn format_fit_summary(fit: &FitResult, resistance: Option<f64>, stats: Option<&ResidualStats>) -> String {
    let mut out = String::new();

    out.push_str("=== rcm - charging curve fit ===\n");
    out.push_str(&format!("Samples: {}\n", fit.n));
    out.push_str(&format!("Evaluations: {}\n", fit.evaluations));

    let (s_tau, s_v) = match fit.std_errors() {
        Some((a, b)) => (Some(a), Some(b)),
        None => (None, None),
    };
    out.push_str(&format!(
        "Time constant: {}{}\n",
        fmt_si(fit.time_constant, "s"),
        fmt_pm(s_tau, "s")
    ));
    out.push_str(&format!("V_max: {}{}\n", fmt_si(fit.voltage_max, "V"), fmt_pm(s_v, "V")));

    if let Some(r) = resistance {
        out.push_str(&format!(
            "Capacitance: {}{} (R = {})\n",
            fmt_si(fit.time_constant / r, "F"),
            fmt_pm(s_tau.map(|s| s / r), "F"),
            fmt_si(r, "Ω")
        ));
    }

    out.push_str(&format!("SSE={:.6e} RMSE={}\n", fit.sse, fmt_si(fit.rmse, "V")));
    if let Some(s) = stats {
        out.push_str(&format!(
            "Residuals: mean={} max|r|={} at t={}\n",
            fmt_si(s.mean, "V"),
            fmt_si(s.max_abs, "V"),
            fmt_si(s.max_abs_time, "s")
        ));
    }

    out
}

/// Format a capacitance sweep table.
pub fn format_sweep(rows: &[SweepRow]) -> String {
    let mut out = String::new();

    push_row(
        &mut out,
        format!(
            "{:>14} {:<10} {:>8} {:>14} {:>10} {:>14}",
            "dut", "status", "attempts", "estimate", "error%", "final period"
        ),
    );
    push_row(
        &mut out,
        format!("{:-<14} {:-<10} {:-<8} {:-<14} {:-<10} {:-<14}", "", "", "", "", "", ""),
    );

    for row in rows {
        let line = match &row.outcome {
            Ok(m) => format!(
                "{:>14} {:<10} {:>8} {:>14} {:>10} {:>14}",
                fmt_si(row.dut_capacitance, "F"),
                m.status.display_name(),
                m.attempts,
                m.capacitance.map_or_else(|| "n/a".to_string(), |c| fmt_si(c, "F")),
                m.error_percent.map_or_else(|| "n/a".to_string(), |e| format!("{e:.4}")),
                fmt_si(m.final_period, "s"),
            ),
            Err(msg) => format!("{:>14} {:<10} {msg}", fmt_si(row.dut_capacitance, "F"), "ERROR"),
        };
        push_row(&mut out, line);
    }

    out
}

/// Engineering notation with an SI prefix, 3 decimals: `17.000 nF`.
pub fn fmt_si(value: f64, unit: &str) -> String {
    const PREFIXES: [(i32, &str); 10] = [
        (-15, "f"),
        (-12, "p"),
        (-9, "n"),
        (-6, "µ"),
        (-3, "m"),
        (0, ""),
        (3, "k"),
        (6, "M"),
        (9, "G"),
        (12, "T"),
    ];

    if !value.is_finite() {
        return format!("{value} {unit}");
    }
    if value == 0.0 {
        return format!("0.000 {unit}");
    }

    let mut exp = ((value.abs().log10() / 3.0).floor() as i32 * 3).clamp(-15, 12);
    // log10 rounding can leave the mantissa at 1000.
    if (value.abs() / 10f64.powi(exp)) >= 999.9995 && exp < 12 {
        exp += 3;
    }
    let prefix = PREFIXES
        .iter()
        .find(|(e, _)| *e == exp)
        .map_or("", |(_, p)| *p);

    format!("{:.3} {prefix}{unit}", value / 10f64.powi(exp))
}

fn fmt_pm(sigma: Option<f64>, unit: &str) -> String {
    sigma.map_or_else(String::new, |s| format!(" ± {}", fmt_si(s, unit)))
}

fn push_row(out: &mut String, line: String) {
    out.push_str(line.trim_end());
    out.push('\n');
}
