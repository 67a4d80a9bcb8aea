//! Least squares solver.
//!
//! Two places need a small dense least-squares solve:
//!
//! ```text
//! minimize ‖A x - b‖²
//! ```
//!
//! - the damped Gauss–Newton step of the Levenberg–Marquardt fitter
//!   (`A` is the column-scaled Jacobian stacked on `√λ·I`)
//! - the τ grid seed, where `V_max` is linear once `τ` is fixed
//!
//! We use SVD because `A` is tall (more rows than columns); nalgebra's
//! `QR::solve` only handles square systems.

use nalgebra::{DMatrix, DVector};

/// Solve a least squares problem using SVD.
///
/// Returns `None` if the system is too ill-conditioned to solve robustly.
pub fn solve_least_squares(a: &DMatrix<f64>, b: &DVector<f64>) -> Option<DVector<f64>> {
    if a.nrows() == 0 || a.ncols() == 0 || a.nrows() != b.len() {
        return None;
    }

    let svd = a.clone().svd(true, true);

    // Singular values below the tolerance are treated as zero. Start strict and
    // relax; a solution with non-finite entries is never accepted.
    for &tol in &[1e-12, 1e-10, 1e-8] {
        if let Ok(x) = svd.solve(b, tol) {
            if x.iter().all(|v| v.is_finite()) {
                return Some(x);
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn least_squares_solves_simple_system() {
        // Fit y = 2 + 3x on x = [0,1,2]
        let a = DMatrix::from_row_slice(3, 2, &[1.0, 0.0, 1.0, 1.0, 1.0, 2.0]);
        let b = DVector::from_row_slice(&[2.0, 5.0, 8.0]);

        let x = solve_least_squares(&a, &b).unwrap();
        assert!((x[0] - 2.0).abs() < 1e-10);
        assert!((x[1] - 3.0).abs() < 1e-10);
    }

    #[test]
    fn mismatched_shapes_are_rejected() {
        let a = DMatrix::from_row_slice(2, 1, &[1.0, 1.0]);
        let b = DVector::from_row_slice(&[1.0, 2.0, 3.0]);
        assert!(solve_least_squares(&a, &b).is_none());
    }
}
