//! Command-line parsing for the `ddm` analysis binary.
//!
//! The goal of this module is to keep **argument parsing** separate from the
//! processing and fitting code. Execution tuning that is rarely changed per
//! run (memory budget, chunk size) comes from the environment instead; see
//! `ExecutionConfig::from_env`.

use std::path::PathBuf;

use clap::Parser;

use crate::domain::{AnalysisConfig, ExecutionConfig, ModelKind, StrategyKind};
use crate::error::Result;

pub mod progress;

pub use progress::IndicatifProgress;

/// Top-level CLI.
#[derive(Debug, Parser, Clone)]
#[command(name = "ddm", version, about = "Differential dynamic microscopy analysis of image stacks")]
pub struct Cli {
    /// Multi-page grayscale TIFF stack to analyse.
    #[arg(short = 'f', long)]
    pub file: PathBuf,

    /// Pixel size in microns per pixel.
    #[arg(long)]
    pub xscale: Option<f64>,

    /// Frame interval in milliseconds per frame.
    #[arg(long)]
    pub tscale: Option<f64>,

    /// Directory for the exported DDM matrix (JSON + CSV).
    #[arg(short = 'o', long)]
    pub out: Option<PathBuf>,

    /// ISF model (single-exponential, double-exponential, schultz).
    #[arg(short = 'm', long, default_value = "single-exponential")]
    pub model: String,

    /// Largest lag time in frames (default: half the stack).
    #[arg(long)]
    pub max_tau: Option<usize>,

    /// First q bin to fit.
    #[arg(long, default_value_t = 1)]
    pub q_min: usize,

    /// Last q bin to fit, inclusive (default: last bin).
    #[arg(long)]
    pub q_max: Option<usize>,

    /// Execution strategy (auto, in-memory, streaming, chunked); overrides DDM_STRATEGY.
    #[arg(long)]
    pub strategy: Option<String>,

    /// Worker threads; overrides DDM_THREADS.
    #[arg(long)]
    pub threads: Option<usize>,

    /// Disable the progress bar.
    #[arg(long)]
    pub no_progress: bool,
}

impl Cli {
    /// Resolve flags on top of an environment-derived execution config.
    pub fn into_config(self, mut execution: ExecutionConfig) -> Result<AnalysisConfig> {
        let model: ModelKind = self.model.parse()?;
        if let Some(strategy) = &self.strategy {
            execution.strategy = strategy.parse::<StrategyKind>()?;
        }
        if self.threads.is_some() {
            execution.threads = self.threads;
        }
        execution.validate()?;

        Ok(AnalysisConfig {
            file: self.file,
            um_per_px: self.xscale,
            ms_per_frame: self.tscale,
            max_tau: self.max_tau,
            model,
            q_min: self.q_min,
            q_max: self.q_max,
            out_dir: self.out,
            execution,
            progress: !self.no_progress,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DdmError;

    #[test]
    fn flags_map_onto_config() {
        let cli = Cli::parse_from([
            "ddm", "--file", "beads.tif", "--xscale", "0.2", "--tscale", "10", "--model", "doubleExp",
            "--max-tau", "40", "--q-max", "90", "--strategy", "streaming",
        ]);
        let config = cli.into_config(ExecutionConfig::default()).unwrap();
        assert_eq!(config.model, ModelKind::DoubleExponential);
        assert_eq!(config.um_per_px, Some(0.2));
        assert_eq!(config.ms_per_frame, Some(10.0));
        assert_eq!(config.max_tau, Some(40));
        assert_eq!(config.q_min, 1);
        assert_eq!(config.q_max, Some(90));
        assert_eq!(config.execution.strategy, StrategyKind::Streaming);
        assert!(config.progress);
    }

    #[test]
    fn unknown_model_fails_with_supported_list() {
        let cli = Cli::parse_from(["ddm", "--file", "x.tif", "--model", "foo"]);
        let err = cli.into_config(ExecutionConfig::default()).unwrap_err();
        assert!(matches!(err, DdmError::UnsupportedModel { .. }));
        assert_eq!(err.exit_code(), 2);
    }
}
