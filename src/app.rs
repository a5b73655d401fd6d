//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - parses CLI arguments and environment configuration
//! - installs the log subscriber
//! - runs the analysis pipeline
//! - prints the summary and fit table

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, IndicatifProgress};
use crate::domain::ExecutionConfig;
use crate::error::Result;

pub mod pipeline;

/// Entry point for the `ddm` binary.
pub fn run() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let config = cli.into_config(ExecutionConfig::from_env()?)?;
    let progress = if config.progress {
        IndicatifProgress::new("Building DDM matrix")
    } else {
        IndicatifProgress::hidden()
    };

    let run = pipeline::run_analysis(&config, &progress)?;

    println!("{}", crate::report::format_run_summary(&run.summary));
    println!(
        "{}",
        crate::report::format_fit_table(&run.fits, config.model, run.wavevectors.as_deref())
    );
    if let Some(paths) = &run.exported {
        println!("Matrix written to {} and {}", paths.json.display(), paths.csv.display());
    }

    Ok(())
}

/// Log to stderr; `RUST_LOG` overrides the default `info` level.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // A subscriber may already be installed when embedded; keep it.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
