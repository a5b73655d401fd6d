//! Bounded Levenberg–Marquardt for small nonlinear least-squares problems.
//!
//! The solver minimizes `Σ r_i(p)²` for a residual function `r`. The damping
//! grows by `lambda_up` after a rejected step and shrinks by `lambda_down`
//! after an accepted one. Bounds are handled by projection: every trial point
//! is clamped into the box before it is evaluated. Jacobians come from
//! central finite differences (one-sided at an active bound).

use nalgebra::{DMatrix, DVector};
use thiserror::Error;

use crate::math::solve_least_squares;

/// Lower and upper box constraints, one entry per parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Bounds {
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
}

impl Bounds {
    pub fn unbounded(n: usize) -> Self {
        Self {
            lower: vec![f64::NEG_INFINITY; n],
            upper: vec![f64::INFINITY; n],
        }
    }

    pub fn clamp(&self, p: &mut [f64]) {
        for ((v, &lo), &hi) in p.iter_mut().zip(&self.lower).zip(&self.upper) {
            *v = v.clamp(lo, hi);
        }
    }

    pub fn contains(&self, p: &[f64]) -> bool {
        p.iter()
            .zip(&self.lower)
            .zip(&self.upper)
            .all(|((&v, &lo), &hi)| v >= lo && v <= hi)
    }
}

#[derive(Debug, Clone)]
pub struct LmOptions {
    pub max_iterations: usize,
    /// Relative SSE decrease below which the fit is considered converged.
    pub ftol: f64,
    /// Relative step size below which the fit is considered converged.
    pub xtol: f64,
    pub initial_lambda: f64,
    /// Factor applied to the damping after a rejected step.
    pub lambda_up: f64,
    /// Factor applied to the damping after an accepted step.
    pub lambda_down: f64,
    /// Damping above which no descent direction is left.
    pub max_lambda: f64,
}

impl Default for LmOptions {
    fn default() -> Self {
        Self {
            max_iterations: 500,
            ftol: 1e-12,
            xtol: 1e-12,
            initial_lambda: 1e-3,
            lambda_up: 10.0,
            lambda_down: 0.1,
            max_lambda: 1e16,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LmSolution {
    pub params: Vec<f64>,
    pub sse: f64,
    pub iterations: usize,
    /// Residual Jacobian `∂r/∂p` at the solution.
    pub jacobian: DMatrix<f64>,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum LmError {
    #[error("damping factors must satisfy lambda_up > 1 and 0 < lambda_down < 1")]
    InvalidDamping,
    #[error("initial guess lies outside the parameter bounds")]
    InitialOutOfBounds,
    #[error("residuals are not finite at the initial guess")]
    NonFiniteStart,
    #[error("Jacobian is not finite")]
    NonFiniteJacobian,
    #[error("no solvable step (singular system)")]
    SingularStep,
    #[error("no convergence after {0} iterations")]
    MaxIterations(usize),
}

/// Minimize `‖r(p)‖²` starting from `x0`.
pub fn levenberg_marquardt<F>(
    residuals: F,
    x0: &[f64],
    bounds: &Bounds,
    opts: &LmOptions,
) -> Result<LmSolution, LmError>
where
    F: Fn(&[f64]) -> Vec<f64>,
{
    if !(opts.lambda_up > 1.0 && opts.lambda_down > 0.0 && opts.lambda_down < 1.0) {
        return Err(LmError::InvalidDamping);
    }
    if !bounds.contains(x0) {
        return Err(LmError::InitialOutOfBounds);
    }

    let mut p = x0.to_vec();
    let mut r = residuals(&p);
    let mut sse = sum_sq(&r);
    if !sse.is_finite() {
        return Err(LmError::NonFiniteStart);
    }

    let n = r.len();
    let k = p.len();
    let mut lambda = opts.initial_lambda;

    for iteration in 1..=opts.max_iterations {
        let jac = jacobian(&residuals, &p, &r, bounds)?;

        // Marquardt scaling: damp each direction relative to its curvature.
        let jtj_diag: Vec<f64> = (0..k)
            .map(|j| jac.column(j).norm_squared().max(1e-12))
            .collect();

        let mut stepped = false;
        while lambda <= opts.max_lambda {
            let mut a = DMatrix::<f64>::zeros(n + k, k);
            a.view_mut((0, 0), (n, k)).copy_from(&jac);
            for j in 0..k {
                a[(n + j, j)] = (lambda * jtj_diag[j]).sqrt();
            }
            let mut b = DVector::<f64>::zeros(n + k);
            for i in 0..n {
                b[i] = -r[i];
            }

            let Some(delta) = solve_least_squares(&a, &b) else {
                lambda *= opts.lambda_up;
                continue;
            };

            let mut trial: Vec<f64> = p.iter().zip(delta.iter()).map(|(a, d)| a + d).collect();
            bounds.clamp(&mut trial);
            let trial_r = residuals(&trial);
            let trial_sse = sum_sq(&trial_r);

            if trial_sse.is_finite() && trial_sse < sse {
                let step_norm = trial
                    .iter()
                    .zip(&p)
                    .map(|(a, b)| (a - b) * (a - b))
                    .sum::<f64>()
                    .sqrt();
                let p_norm = p.iter().map(|v| v * v).sum::<f64>().sqrt();
                let rel_decrease = (sse - trial_sse) / sse.max(f64::MIN_POSITIVE);

                p = trial;
                r = trial_r;
                sse = trial_sse;
                lambda = (lambda * opts.lambda_down).max(1e-12);
                stepped = true;

                if rel_decrease < opts.ftol || step_norm < opts.xtol * (p_norm + opts.xtol) {
                    let jacobian = jacobian(&residuals, &p, &r, bounds)?;
                    return Ok(LmSolution {
                        params: p,
                        sse,
                        iterations: iteration,
                        jacobian,
                    });
                }
                break;
            }
            lambda *= opts.lambda_up;
        }

        if !stepped {
            // No damping level yields descent: `p` is stationary.
            if !sse.is_finite() {
                return Err(LmError::SingularStep);
            }
            return Ok(LmSolution {
                params: p,
                sse,
                iterations: iteration,
                jacobian: jac,
            });
        }
    }

    Err(LmError::MaxIterations(opts.max_iterations))
}

/// Covariance `s² (JᵀJ)⁻¹` with `s² = SSE / (n − k)`.
///
/// Returns `None` when `JᵀJ` is singular or there are no residual degrees of freedom.
pub fn covariance(jacobian: &DMatrix<f64>, sse: f64) -> Option<DMatrix<f64>> {
    let (n, k) = jacobian.shape();
    if n <= k {
        return None;
    }
    let jtj = jacobian.transpose() * jacobian;
    let inv = jtj.try_inverse()?;
    let s2 = sse / (n - k) as f64;
    Some(inv * s2)
}

fn sum_sq(r: &[f64]) -> f64 {
    r.iter().map(|v| v * v).sum()
}

fn jacobian<F>(residuals: &F, p: &[f64], r0: &[f64], bounds: &Bounds) -> Result<DMatrix<f64>, LmError>
where
    F: Fn(&[f64]) -> Vec<f64>,
{
    let n = r0.len();
    let k = p.len();
    let mut jac = DMatrix::<f64>::zeros(n, k);
    let mut probe = p.to_vec();

    for j in 0..k {
        let h = f64::EPSILON.cbrt() * p[j].abs().max(1e-3);
        let up_ok = p[j] + h <= bounds.upper[j];
        let down_ok = p[j] - h >= bounds.lower[j];

        let column: Vec<f64> = match (up_ok, down_ok) {
            (true, true) => {
                probe[j] = p[j] + h;
                let rp = residuals(&probe);
                probe[j] = p[j] - h;
                let rm = residuals(&probe);
                rp.iter().zip(&rm).map(|(a, b)| (a - b) / (2.0 * h)).collect()
            }
            (true, false) => {
                probe[j] = p[j] + h;
                let rp = residuals(&probe);
                rp.iter().zip(r0).map(|(a, b)| (a - b) / h).collect()
            }
            (false, true) => {
                probe[j] = p[j] - h;
                let rm = residuals(&probe);
                r0.iter().zip(&rm).map(|(a, b)| (a - b) / h).collect()
            }
            // Box narrower than the probe step: the parameter is effectively fixed.
            (false, false) => vec![0.0; n],
        };
        probe[j] = p[j];

        if column.len() != n || column.iter().any(|v| !v.is_finite()) {
            return Err(LmError::NonFiniteJacobian);
        }
        for (i, v) in column.into_iter().enumerate() {
            jac[(i, j)] = v;
        }
    }

    Ok(jac)
}
