//! Formatted terminal output.
//!
//! We keep formatting code in one place so:
//! - the math/fitting code stays clean and testable
//! - output changes are localized

use crate::domain::ModelKind;
use crate::fit::BatchFit;
use crate::processing::Strategy;

/// Facts about a run, gathered by the pipeline for the summary header.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub source: String,
    pub frames: usize,
    pub frame_shape: (usize, usize),
    pub um_per_px: Option<f64>,
    pub ms_per_frame: Option<f64>,
    pub strategy: Strategy,
    pub lags: usize,
    pub q_bins: usize,
    pub noise_floor: f64,
    pub model: ModelKind,
    pub fitted: usize,
    pub skipped: usize,
}

/// Format the run summary (stack info + execution + calibration + fit counts).
pub fn format_run_summary(summary: &RunSummary) -> String {
    let mut out = String::new();

    out.push_str("=== ddm - Differential Dynamic Microscopy ===\n");
    out.push_str(&format!("Source: {}\n", summary.source));
    out.push_str(&format!(
        "Stack: {} frames | {}x{} px\n",
        summary.frames, summary.frame_shape.0, summary.frame_shape.1
    ));
    out.push_str(&format!(
        "Scale: {} | {}\n",
        fmt_scale(summary.um_per_px, "um/px"),
        fmt_scale(summary.ms_per_frame, "ms/frame"),
    ));
    out.push_str(&format!("Strategy: {}\n", summary.strategy));
    out.push_str(&format!(
        "Matrix: {} lags x {} q bins | B={:.6e}\n",
        summary.lags, summary.q_bins, summary.noise_floor
    ));
    out.push_str(&format!(
        "Fit: {} | fitted={} skipped={}\n",
        summary.model, summary.fitted, summary.skipped
    ));

    out
}

/// Per-q fit parameters with standard errors.
///
/// `q_axis` labels each bin (rad/µm) when the pixel size is known.
pub fn format_fit_table(batch: &BatchFit, model: ModelKind, q_axis: Option<&[f64]>) -> String {
    let mut out = String::new();
    let names = model.param_names();

    let mut header = format!("{:>5} {:>10}", "q", "q[1/um]");
    for name in names {
        header.push_str(&format!(" {:>24}", name));
    }
    header.push_str(&format!(" {:>10}", "rmse"));
    out.push_str(header.trim_end());
    out.push('\n');

    let mut rule = format!("{:-<5} {:-<10}", "", "");
    for _ in names {
        rule.push_str(&format!(" {:-<24}", ""));
    }
    rule.push_str(&format!(" {:-<10}", ""));
    out.push_str(&rule);
    out.push('\n');

    for (q, fit) in &batch.fits {
        let q_value = q_axis
            .and_then(|axis| axis.get(*q))
            .map(|v| format!("{v:.4}"))
            .unwrap_or_else(|| "-".to_string());
        let mut line = format!("{q:>5} {q_value:>10}");
        for (value, err) in fit.params.iter().zip(&fit.errors) {
            line.push_str(&format!(" {:>24}", fmt_estimate(*value, *err)));
        }
        line.push_str(&format!(" {:>10.2e}", fit.rmse));
        out.push_str(line.trim_end());
        out.push('\n');
    }

    if !batch.skipped.is_empty() {
        out.push('\n');
        out.push_str("Skipped q bins:\n");
        for (q, reason) in &batch.skipped {
            out.push_str(&format!("  q={q}: {reason}\n"));
        }
    }

    out
}

fn fmt_scale(value: Option<f64>, unit: &str) -> String {
    match value {
        Some(v) => format!("{v} {unit}"),
        None => format!("? {unit}"),
    }
}

fn fmt_estimate(value: f64, err: f64) -> String {
    format!("{value:.4} ± {err:.2e}")
}
