//! Least squares solver for the damped Gauss–Newton steps.
//!
//! Every Levenberg–Marquardt iteration solves a small linear problem of the form:
//!
//! ```text
//! minimize ‖ [J; √λ·D] δ − [−r; 0] ‖²
//! ```
//!
//! Implementation choices:
//! - We stack the damping rows under the Jacobian and solve the tall system
//!   directly instead of forming `JᵀJ`, which squares the condition number.
//! - SVD handles the non-square system robustly.
//!   (Nalgebra's `QR::solve` is intended for square systems and will panic for
//!   non-square matrices.)
//! - Parameter counts are tiny (2–5 columns), so SVD cost is negligible next to
//!   model evaluation.

use nalgebra::{DMatrix, DVector};

/// Solve a least squares problem using SVD.
///
/// Returns `None` if the system is too ill-conditioned to solve robustly.
pub fn solve_least_squares(x: &DMatrix<f64>, y: &DVector<f64>) -> Option<DVector<f64>> {
    let svd = x.clone().svd(true, true);

    // Try progressively looser tolerances if strict solve fails.
    for &tol in &[1e-10, 1e-8, 1e-6] {
        if let Ok(beta) = svd.solve(y, tol) {
            if beta.iter().all(|v| v.is_finite()) {
                return Some(beta);
            }
        }
    }

    None
}
