//! ASCII plotting for terminal output.
//!
//! This is intentionally "dumb" (fixed-size grid), optimized for:
//! - quick visual sanity checks of a fit window in a terminal
//! - deterministic output (helpful for golden tests)
//!
//! Plot elements:
//! - observed samples: `o`
//! - fitted charging curve: `-` line

use crate::domain::FitResult;
use crate::models::predict;
use crate::report::fmt_si;

/// Render trace samples with an optional fitted curve over the same time span.
pub fn render_trace_plot(
    times: &[f64],
    voltages: &[f64],
    fit: Option<&FitResult>,
    width: usize,
    height: usize,
) -> String {
    let width = width.max(10);
    let height = height.max(5);

    let (t_min, t_max) = time_range(times).unwrap_or((0.0, 1.0));
    let curve = fit.map(|f| sample_curve(f, t_min, t_max, width));

    let (v_min, v_max) = v_range(voltages, curve.as_deref()).unwrap_or((0.0, 1.0));
    let (v_min, v_max) = pad_range(v_min, v_max, 0.05);

    let mut grid = vec![vec![' '; width]; height];

    // Curve first so samples overlay it.
    if let Some(curve) = &curve {
        draw_curve(&mut grid, curve, t_min, t_max, v_min, v_max);
    }

    for (&t, &v) in times.iter().zip(voltages) {
        let x = map_x(t, t_min, t_max, width);
        let y = map_y(v, v_min, v_max, height);
        grid[y][x] = 'o';
    }

    let mut out = String::new();
    out.push_str(&format!(
        "Plot: t=[{}, {}] | v=[{v_min:.3}, {v_max:.3}] V\n",
        fmt_si(t_min, "s"),
        fmt_si(t_max, "s")
    ));

    for row in grid {
        out.push_str(&row.into_iter().collect::<String>());
        out.push('\n');
    }

    out
}

fn time_range(times: &[f64]) -> Option<(f64, f64)> {
    let min_t = times.iter().copied().fold(f64::INFINITY, f64::min);
    let max_t = times.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    (min_t.is_finite() && max_t.is_finite() && max_t > min_t).then_some((min_t, max_t))
}

fn sample_curve(fit: &FitResult, t_min: f64, t_max: f64, n: usize) -> Vec<(f64, f64)> {
    let n = n.max(2);
    (0..n)
        .map(|i| {
            let u = i as f64 / (n as f64 - 1.0);
            let t = t_min + u * (t_max - t_min);
            (t, predict(t, fit.time_constant, fit.voltage_max))
        })
        .collect()
}

fn v_range(voltages: &[f64], curve: Option<&[(f64, f64)]>) -> Option<(f64, f64)> {
    let mut min_v = f64::INFINITY;
    let mut max_v = f64::NEG_INFINITY;

    for &v in voltages {
        min_v = min_v.min(v);
        max_v = max_v.max(v);
    }
    for &(_, v) in curve.unwrap_or(&[]) {
        min_v = min_v.min(v);
        max_v = max_v.max(v);
    }

    (min_v.is_finite() && max_v.is_finite() && max_v > min_v).then_some((min_v, max_v))
}

fn pad_range(min: f64, max: f64, frac: f64) -> (f64, f64) {
    let span = (max - min).abs();
    let pad = (span * frac).max(1e-12);
    (min - pad, max + pad)
}

fn map_x(t: f64, t_min: f64, t_max: f64, width: usize) -> usize {
    let width = width.max(2);
    let u = ((t - t_min) / (t_max - t_min)).clamp(0.0, 1.0);
    (u * (width as f64 - 1.0)).round() as usize
}

fn map_y(v: f64, v_min: f64, v_max: f64, height: usize) -> usize {
    let height = height.max(2);
    let u = ((v - v_min) / (v_max - v_min)).clamp(0.0, 1.0);
    // v_max is row 0.
    (height as f64 - 1.0 - (u * (height as f64 - 1.0))).round() as usize
}

fn draw_curve(grid: &mut [Vec<char>], curve: &[(f64, f64)], t_min: f64, t_max: f64, v_min: f64, v_max: f64) {
    if curve.len() < 2 {
        return;
    }
    let height = grid.len();
    let width = grid[0].len();

    let mut prev = None;
    for &(t, v) in curve {
        let x = map_x(t, t_min, t_max, width);
        let y = map_y(v, v_min, v_max, height);
        match prev {
            Some((x0, y0)) => draw_line(grid, x0, y0, x, y, '-'),
            None => grid[y][x] = '-',
        }
        prev = Some((x, y));
    }
}

/// Integer line drawing (Bresenham).
fn draw_line(grid: &mut [Vec<char>], x0: usize, y0: usize, x1: usize, y1: usize, ch: char) {
    let (mut x, mut y) = (x0 as isize, y0 as isize);
    let (x1, y1) = (x1 as isize, y1 as isize);

    let dx = (x1 - x).abs();
    let sx = if x < x1 { 1 } else { -1 };
    let dy = -(y1 - y).abs();
    let sy = if y < y1 { 1 } else { -1 };
    let mut err = dx + dy;

    loop {
        let inside = y >= 0 && (y as usize) < grid.len() && x >= 0 && (x as usize) < grid[0].len();
        if inside && grid[y as usize][x as usize] == ' ' {
            grid[y as usize][x as usize] = ch;
        }

        if x == x1 && y == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x += sx;
        }
        if e2 <= dx {
            err += dx;
            y += sy;
        }
    }
}
