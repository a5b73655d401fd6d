//! Nonlinear fitting of a single ISF curve.
//!
//! Given:
//! - lag times `t_i`
//! - ISF values `f_i`
//! - a model kind
//!
//! we:
//! - reject curves that are indistinguishable from a straight line
//! - pick the best seed (lowest SSE) from a deterministic τ grid
//! - refine it with bounded Levenberg–Marquardt
//! - report standard errors from `s² (JᵀJ)⁻¹`

use rayon::prelude::*;
use tracing::debug;

use crate::domain::{FitResult, ModelKind};
use crate::error::{DdmError, Degeneracy, Result};
use crate::fit::tau_grid::{seed_tau_pairs, seed_taus};
use crate::math::{Bounds, LmOptions, covariance, levenberg_marquardt};
use crate::models::predict;

/// Guard statistic below which a curve counts as linear.
pub const LINEARITY_THRESHOLD: f64 = 0.1;
/// Smallest `A(q) / B` for which the ISF of a bin is fitted.
pub const MIN_AMPLITUDE_RATIO: f64 = 0.5;

/// Options for a single-curve fit.
#[derive(Debug, Clone)]
pub struct FitOptions {
    pub lm: LmOptions,
    /// Grid size for single-τ seeds.
    pub seed_steps: usize,
    /// Grid size per axis for `(τ1, τ2)` seed pairs.
    pub pair_seed_steps: usize,
    pub linearity_threshold: f64,
    /// Only consulted when a calibration is available (see `fit::batch`).
    pub min_amplitude_ratio: f64,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            lm: LmOptions::default(),
            seed_steps: 32,
            pair_seed_steps: 16,
            linearity_threshold: LINEARITY_THRESHOLD,
            min_amplitude_ratio: MIN_AMPLITUDE_RATIO,
        }
    }
}

#[derive(Debug, Clone)]
struct Candidate {
    idx: usize,
    params: Vec<f64>,
    sse: f64,
}

/// Fit `curve` (one value per lag time) with default options.
pub fn fit_isf(curve: &[f64], lag_times: &[f64], model: ModelKind) -> Result<FitResult> {
    fit_isf_with(curve, lag_times, model, &FitOptions::default())
}

/// Fit with a model given by name; unknown names fail before any work.
pub fn fit_isf_named(curve: &[f64], lag_times: &[f64], model: &str) -> Result<FitResult> {
    let model: ModelKind = model.parse()?;
    fit_isf(curve, lag_times, model)
}

pub fn fit_isf_with(
    curve: &[f64],
    lag_times: &[f64],
    model: ModelKind,
    opts: &FitOptions,
) -> Result<FitResult> {
    validate_curve(curve, lag_times, model)?;
    linearity_guard(curve, lag_times, opts.linearity_threshold)?;

    let bounds = model_bounds(model);
    let seed = best_seed(model, curve, lag_times, opts)?;
    debug!(model = %model, seed = ?seed.params, sse = seed.sse, "seed selected");

    let residuals = |p: &[f64]| -> Vec<f64> {
        lag_times
            .iter()
            .zip(curve)
            .map(|(&t, &y)| y - predict(model, t, p))
            .collect()
    };

    let solution = levenberg_marquardt(residuals, &seed.params, &bounds, &opts.lm).map_err(|e| {
        DdmError::FitNonConvergence {
            model: model.name(),
            reason: e.to_string(),
        }
    })?;

    let cov = covariance(&solution.jacobian, solution.sse).ok_or_else(|| DdmError::FitNonConvergence {
        model: model.name(),
        reason: "parameter covariance is singular (JᵀJ not invertible)".into(),
    })?;
    let errors: Vec<f64> = (0..model.param_count())
        .map(|j| cov[(j, j)].max(0.0).sqrt())
        .collect();

    let n = curve.len();
    Ok(FitResult {
        model,
        params: solution.params,
        errors,
        sse: solution.sse,
        rmse: (solution.sse / n as f64).sqrt(),
        iterations: solution.iterations,
        n,
    })
}

/// Box constraints, ordered as `ModelKind::param_names`.
pub fn model_bounds(model: ModelKind) -> Bounds {
    let pos = f64::MIN_POSITIVE;
    let inf = f64::INFINITY;
    match model {
        ModelKind::SingleExponential => Bounds {
            lower: vec![pos, pos],
            upper: vec![inf, 10.0],
        },
        ModelKind::DoubleExponential => Bounds {
            lower: vec![0.0, 0.0, 0.0, 1.0, 1.0],
            upper: vec![inf, inf, 1.0, 2.0, 2.0],
        },
        ModelKind::Schultz => Bounds {
            lower: vec![pos, pos, 0.0, pos, pos],
            upper: vec![inf, inf, 1.0, 10.0, inf],
        },
    }
}

fn validate_curve(curve: &[f64], lag_times: &[f64], model: ModelKind) -> Result<()> {
    if curve.len() != lag_times.len() {
        return Err(DdmError::InvalidInput(format!(
            "ISF curve has {} values but {} lag times.",
            curve.len(),
            lag_times.len()
        )));
    }
    let k = model.param_count();
    if curve.len() <= k {
        return Err(DdmError::InvalidInput(format!(
            "Model {model} has {k} parameters; need more than {k} lag times, got {}.",
            curve.len()
        )));
    }
    if curve.iter().chain(lag_times).any(|v| !v.is_finite()) {
        return Err(DdmError::InvalidInput("ISF curve or lag times contain non-finite values.".into()));
    }
    if lag_times.iter().any(|&t| t < 0.0) {
        return Err(DdmError::InvalidInput("Lag times must be non-negative.".into()));
    }
    Ok(())
}

/// Reject curves that a straight line through their endpoints already explains.
pub fn linearity_guard(curve: &[f64], lag_times: &[f64], threshold: f64) -> Result<()> {
    let (Some(&t0), Some(&t1)) = (lag_times.first(), lag_times.last()) else {
        return Err(DdmError::InvalidInput("ISF curve is empty.".into()));
    };
    if t1 == t0 {
        return Err(DdmError::InvalidInput("Lag times span no range.".into()));
    }
    let (y0, y1) = (curve[0], curve[curve.len() - 1]);
    let slope = (y1 - y0) / (t1 - t0);

    let residual = lag_times
        .iter()
        .zip(curve)
        .map(|(&t, &y)| {
            let r = y - (y0 + slope * (t - t0));
            r * r
        })
        .sum::<f64>()
        .sqrt();

    if residual < threshold {
        return Err(DdmError::DegenerateSignal {
            cause: Degeneracy::Linear,
            statistic: residual,
            threshold,
        });
    }
    Ok(())
}

/// Reject a q bin whose amplitude does not rise clearly above the noise floor.
///
/// Dividing by such an `A(q)` turns noise into an ISF of arbitrary size.
pub fn amplitude_guard(amplitude: f64, noise_floor: f64, min_ratio: f64) -> Result<()> {
    let ratio = amplitude / noise_floor;
    if ratio.is_nan() || ratio < min_ratio {
        return Err(DdmError::DegenerateSignal {
            cause: Degeneracy::WeakAmplitude,
            statistic: ratio,
            threshold: min_ratio,
        });
    }
    Ok(())
}

fn seed_candidates(model: ModelKind, lag_times: &[f64], opts: &FitOptions) -> Result<Vec<Vec<f64>>> {
    Ok(match model {
        ModelKind::SingleExponential => seed_taus(lag_times, opts.seed_steps)?
            .into_iter()
            .map(|tau| vec![tau, 1.0])
            .collect(),
        ModelKind::DoubleExponential => seed_tau_pairs(lag_times, opts.pair_seed_steps)?
            .into_iter()
            .map(|[tau1, tau2]| vec![tau1, tau2, 0.5, 1.0, 1.0])
            .collect(),
        ModelKind::Schultz => seed_taus(lag_times, opts.seed_steps)?
            .into_iter()
            .map(|tau| vec![tau, tau, 0.5, 1.0, 10.0])
            .collect(),
    })
}

fn best_seed(model: ModelKind, curve: &[f64], lag_times: &[f64], opts: &FitOptions) -> Result<Candidate> {
    let seeds = seed_candidates(model, lag_times, opts)?;

    // Evaluate each seed independently (parallel).
    let candidates: Vec<Candidate> = seeds
        .into_par_iter()
        .enumerate()
        .filter_map(|(idx, params)| {
            let sse: f64 = lag_times
                .iter()
                .zip(curve)
                .map(|(&t, &y)| {
                    let r = y - predict(model, t, &params);
                    r * r
                })
                .sum();
            sse.is_finite().then_some(Candidate { idx, params, sse })
        })
        .collect();

    // Deterministic selection: minimum SSE, ties broken by grid index.
    candidates
        .into_iter()
        .min_by(|a, b| a.sse.total_cmp(&b.sse).then(a.idx.cmp(&b.idx)))
        .ok_or_else(|| DdmError::FitNonConvergence {
            model: model.name(),
            reason: "no seed produced a finite residual".into(),
        })
}
