//! Fitting every q bin of an ISF.
//!
//! Each curve is fitted independently (parallel). A curve that cannot be
//! fitted is reported in `skipped` with its reason and does not abort the
//! batch. With a calibration at hand, bins whose `A(q)` is not resolved above
//! `B` are skipped as degenerate before any fit.

use std::ops::Range;

use rayon::prelude::*;
use tracing::{info, warn};

use crate::domain::{Calibration, FitResult, Isf, ModelKind};
use crate::error::{DdmError, Result};
use crate::fit::fitter::{FitOptions, amplitude_guard, fit_isf_with};

/// Output of fitting a range of q bins.
#[derive(Debug, Clone, Default)]
pub struct BatchFit {
    /// Successful fits, ascending by q index.
    pub fits: Vec<(usize, FitResult)>,
    /// q bins that were skipped and why (for diagnostics).
    pub skipped: Vec<(usize, String)>,
}

impl BatchFit {
    pub fn attempted(&self) -> usize {
        self.fits.len() + self.skipped.len()
    }
}

/// Fit `model` to every q in `q_range` with default options.
pub fn fit_all_q(isf: &Isf, lag_times: &[f64], model: ModelKind, q_range: Range<usize>) -> Result<BatchFit> {
    fit_all_q_with(isf, None, lag_times, model, q_range, &FitOptions::default())
}

/// Like `fit_all_q`, but bins with too little amplitude are skipped up front.
pub fn fit_all_q_calibrated(
    isf: &Isf,
    calibration: &Calibration,
    lag_times: &[f64],
    model: ModelKind,
    q_range: Range<usize>,
) -> Result<BatchFit> {
    fit_all_q_with(isf, Some(calibration), lag_times, model, q_range, &FitOptions::default())
}

pub fn fit_all_q_with(
    isf: &Isf,
    calibration: Option<&Calibration>,
    lag_times: &[f64],
    model: ModelKind,
    q_range: Range<usize>,
    opts: &FitOptions,
) -> Result<BatchFit> {
    if let Some(calibration) = calibration {
        if calibration.a.len() != isf.n_q() {
            return Err(DdmError::InvalidInput(format!(
                "Calibration has {} amplitudes but the ISF has {} q bins.",
                calibration.a.len(),
                isf.n_q()
            )));
        }
    }
    if lag_times.len() != isf.taus().len() {
        return Err(DdmError::InvalidInput(format!(
            "ISF has {} lag times but {} were supplied.",
            isf.taus().len(),
            lag_times.len()
        )));
    }
    if q_range.start >= q_range.end || q_range.end > isf.n_q() {
        return Err(DdmError::InvalidInput(format!(
            "q range {}..{} is empty or exceeds the {} available bins.",
            q_range.start,
            q_range.end,
            isf.n_q()
        )));
    }

    let outcomes: Vec<(usize, Result<FitResult>)> = q_range
        .into_par_iter()
        .map(|q| {
            let outcome = calibration
                .map_or(Ok(()), |c| amplitude_guard(c.a[q], c.b, opts.min_amplitude_ratio))
                .and_then(|()| match isf.curve(q) {
                    Some(curve) => fit_isf_with(&curve, lag_times, model, opts),
                    None => Err(DdmError::InvalidInput(format!("q bin {q} is out of range."))),
                });
            (q, outcome)
        })
        .collect();

    let mut batch = BatchFit::default();
    for (q, outcome) in outcomes {
        match outcome {
            Ok(fit) => batch.fits.push((q, fit)),
            Err(e) => {
                warn!(q, error = %e, "q bin skipped");
                batch.skipped.push((q, e.to_string()));
            }
        }
    }

    info!(
        model = %model,
        fitted = batch.fits.len(),
        skipped = batch.skipped.len(),
        "batch fit complete"
    );
    Ok(batch)
}
