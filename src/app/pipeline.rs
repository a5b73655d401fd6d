//! The analysis pipeline behind the `ddm` binary.
//!
//! stack -> calibration -> DDM matrix -> export -> ISF -> per-q fits
//!
//! Everything here works on an `ImageStack`, so the same workflow runs on a
//! TIFF file or on frames already in memory.

use std::ops::Range;
use std::path::Path;

use tracing::info;

use crate::domain::{AnalysisConfig, Calibration, DdmMatrix, ImageStack, Isf, LagTimes};
use crate::error::{DdmError, Result};
use crate::fit::{BatchFit, fit_all_q_calibrated};
use crate::io::{DdmArtifact, ExportPaths, TiffStack, export_artifact};
use crate::processing::{
    DdmMatrixBuilder, DifferenceFftEngine, ProgressSink, check_calibration_shape, estimate_calibration,
    extract_isf,
};
use crate::report::RunSummary;

/// All computed outputs of a single run.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub summary: RunSummary,
    pub calibration: Calibration,
    pub matrix: DdmMatrix,
    pub isf: Isf,
    pub fits: BatchFit,
    /// Wavevector of every q bin (rad/µm) when the pixel size is known.
    pub wavevectors: Option<Vec<f64>>,
    pub exported: Option<ExportPaths>,
}

/// Open the configured TIFF stack and run the full analysis.
pub fn run_analysis(config: &AnalysisConfig, progress: &dyn ProgressSink) -> Result<RunOutput> {
    let stack = TiffStack::open(&config.file)?;
    let metadata = stack.metadata().with_overrides(config.um_per_px, config.ms_per_frame);
    let stack = stack.with_metadata(metadata);
    run_on_stack(&stack, config, progress)
}

/// Run the analysis on any stack. `config.file` is ignored; the stack's own
/// source (if any) labels the export.
pub fn run_on_stack<S: ImageStack + ?Sized>(
    stack: &S,
    config: &AnalysisConfig,
    progress: &dyn ProgressSink,
) -> Result<RunOutput> {
    let (height, width) = stack.shape();
    // Frames too small for the noise window, or a q range past the last bin,
    // fail before any transform.
    let averager = check_calibration_shape(height, width)?;
    let q_range = fit_range(config, averager.n_bins())?;

    let lags = LagTimes::resolve(config.max_tau.map(|max| (1..=max).collect()), stack.len())?;
    let metadata = stack.metadata();

    let engine = DifferenceFftEngine::new(stack, &config.execution)?;
    let calibration = estimate_calibration(&engine)?;
    let matrix = DdmMatrixBuilder::new()
        .with_progress(progress)
        .build_with(&engine, &lags)?;

    let exported = match &config.out_dir {
        Some(dir) => {
            let source = source_label(stack.source());
            let artifact = DdmArtifact::from_matrix(&matrix, metadata.um_per_px, source);
            Some(export_artifact(dir, &artifact)?)
        }
        None => None,
    };

    let isf = extract_isf(&matrix, &calibration)?;
    let lag_axis: Vec<f64> = match metadata.ms_per_frame {
        Some(ms) => matrix.lag_times_ms(ms),
        None => matrix.taus().iter().map(|&t| t as f64).collect(),
    };

    let fits = fit_all_q_calibrated(&isf, &calibration, &lag_axis, config.model, q_range)?;

    let wavevectors = metadata.um_per_px.map(|dx| matrix.wavevectors(dx));
    let summary = RunSummary {
        source: source_label(stack.source()),
        frames: stack.len(),
        frame_shape: (height, width),
        um_per_px: metadata.um_per_px,
        ms_per_frame: metadata.ms_per_frame,
        strategy: engine.strategy(),
        lags: matrix.taus().len(),
        q_bins: matrix.n_q(),
        noise_floor: calibration.b,
        model: config.model,
        fitted: fits.fits.len(),
        skipped: fits.skipped.len(),
    };
    info!(fitted = summary.fitted, skipped = summary.skipped, "analysis complete");

    Ok(RunOutput {
        summary,
        calibration,
        matrix,
        isf,
        fits,
        wavevectors,
        exported,
    })
}

/// Half-open range of q bins to fit; `q_max` is inclusive in the config.
fn fit_range(config: &AnalysisConfig, n_q: usize) -> Result<Range<usize>> {
    let last_q = n_q.saturating_sub(1);
    let q_max = config.q_max.unwrap_or(last_q);
    if config.q_min > q_max || q_max > last_q {
        return Err(DdmError::InvalidInput(format!(
            "q range {}..={q_max} is outside the available bins 0..={last_q}.",
            config.q_min
        )));
    }
    Ok(config.q_min..q_max + 1)
}

fn source_label(source: Option<&Path>) -> String {
    source
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "in-memory".to_string())
}
