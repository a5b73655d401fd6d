//! DDM matrix assembly.
//!
//! For each lag the builder asks the engine for `g(q, τ)`, reduces it with a
//! radial averager centred on zero frequency, and stores the profile as one
//! row. Rows are independent; they may complete in any order but are always
//! assembled by ascending `τ`. A cancelled build returns `DdmError::Cancelled`
//! and no matrix.

use std::time::Instant;

use ndarray::Array2;
use rayon::prelude::*;
use tracing::{debug, info};

use crate::domain::{DdmMatrix, ExecutionConfig, ImageStack, LagTimes};
use crate::error::{DdmError, Result};
use crate::math::RadialAverager;
use crate::processing::engine::DifferenceFftEngine;
use crate::processing::strategy::{CancelToken, NoProgress, ProgressSink};

pub struct DdmMatrixBuilder<'p> {
    progress: &'p dyn ProgressSink,
    cancel: CancelToken,
}

impl Default for DdmMatrixBuilder<'static> {
    fn default() -> Self {
        Self {
            progress: &NoProgress,
            cancel: CancelToken::new(),
        }
    }
}

impl DdmMatrixBuilder<'static> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<'p> DdmMatrixBuilder<'p> {
    pub fn with_progress<'q>(self, progress: &'q dyn ProgressSink) -> DdmMatrixBuilder<'q> {
        DdmMatrixBuilder {
            progress,
            cancel: self.cancel,
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Build the matrix for `stack`, resolving an engine from `config`.
    ///
    /// `lags = None` uses every lag from 1 to `T / 2`.
    pub fn build<S: ImageStack + ?Sized>(
        &self,
        stack: &S,
        lags: Option<&LagTimes>,
        config: &ExecutionConfig,
    ) -> Result<DdmMatrix> {
        let lags = match lags {
            Some(l) => l.clone(),
            None => LagTimes::default_for(stack.len())?,
        };
        check_lags(&lags, stack.len())?;
        let engine = DifferenceFftEngine::new(stack, config)?;
        self.build_with(&engine, &lags)
    }

    /// Build the matrix with an existing engine (shares the in-memory cube with calibration).
    pub fn build_with<S: ImageStack + ?Sized>(
        &self,
        engine: &DifferenceFftEngine<'_, S>,
        lags: &LagTimes,
    ) -> Result<DdmMatrix> {
        check_lags(lags, engine.frames())?;
        self.cancel.check()?;

        let (height, width) = engine.frame_shape();
        let averager = RadialAverager::centered(height, width);
        let taus = lags.as_slice();
        let started = Instant::now();

        info!(
            lags = taus.len(),
            strategy = %engine.strategy(),
            q_bins = averager.n_bins(),
            "building DDM matrix"
        );
        self.progress.start(taus.len());

        let row = |tau: usize| -> Result<Vec<f64>> {
            self.cancel.check()?;
            let t0 = Instant::now();
            let g = engine.structure_function(tau)?;
            let profile = averager.average(g.view())?;
            self.progress.advance(1);
            debug!(tau, elapsed_ms = t0.elapsed().as_millis() as u64, "lag done");
            Ok(profile)
        };

        let rows: Vec<Vec<f64>> = if engine.strategy().parallel_over_lags() {
            engine.plan().install(|| taus.par_iter().map(|&tau| row(tau)).collect::<Result<_>>())?
        } else {
            taus.iter().map(|&tau| row(tau)).collect::<Result<_>>()?
        };

        // A token flipped while the last rows were in flight still voids the build.
        self.cancel.check()?;
        self.progress.finish();

        let n_q = averager.n_bins();
        let mut values = Array2::<f64>::zeros((taus.len(), n_q));
        for (i, profile) in rows.into_iter().enumerate() {
            if profile.len() != n_q {
                return Err(DdmError::InvalidInput(format!(
                    "Radial profile for lag {} has {} bins, expected {n_q}.",
                    taus[i],
                    profile.len()
                )));
            }
            values.row_mut(i).assign(&ndarray::ArrayView1::from(&profile));
        }

        info!(elapsed_ms = started.elapsed().as_millis() as u64, "DDM matrix complete");
        DdmMatrix::new(taus.to_vec(), values, (height, width))
    }
}

fn check_lags(lags: &LagTimes, frames: usize) -> Result<()> {
    if let Some(&tau) = lags.as_slice().iter().find(|&&tau| tau == 0 || tau >= frames) {
        return Err(DdmError::InvalidLagTime { tau, frames });
    }
    Ok(())
}
