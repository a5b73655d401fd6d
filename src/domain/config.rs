//! Run configuration.
//!
//! `ExecutionConfig` controls *how* the structure function is computed and is
//! resolved once per build; it never changes the numbers. `AnalysisConfig` is
//! the full run configuration assembled from CLI flags (plus defaults).

use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::ModelKind;
use crate::error::{DdmError, Result};

/// Default in-memory budget for the spectrum cube: 2 GiB.
pub const DEFAULT_MEMORY_BUDGET_BYTES: usize = 2 << 30;

/// Default number of frames per chunk for chunked accumulation.
pub const DEFAULT_CHUNK_FRAMES: usize = 64;

/// Requested execution strategy for the difference-FFT engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    /// In-memory when the stack is materialized and fits the budget, else chunked.
    #[default]
    Auto,
    /// Transform every frame once and difference spectra in memory.
    InMemory,
    /// One frame pair at a time; bounded memory.
    Streaming,
    /// Partition the frame axis and reduce chunks in parallel.
    Chunked,
}

impl StrategyKind {
    pub fn name(self) -> &'static str {
        match self {
            StrategyKind::Auto => "auto",
            StrategyKind::InMemory => "in-memory",
            StrategyKind::Streaming => "streaming",
            StrategyKind::Chunked => "chunked",
        }
    }
}

impl FromStr for StrategyKind {
    type Err = DdmError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(StrategyKind::Auto),
            "in-memory" | "memory" => Ok(StrategyKind::InMemory),
            "streaming" | "stream" => Ok(StrategyKind::Streaming),
            "chunked" | "parallel" => Ok(StrategyKind::Chunked),
            other => Err(DdmError::InvalidInput(format!(
                "Unknown execution strategy '{other}' (expected auto, in-memory, streaming or chunked)."
            ))),
        }
    }
}

/// How the structure function gets computed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionConfig {
    pub strategy: StrategyKind,
    /// Upper bound for the in-memory spectrum cube.
    pub memory_budget_bytes: usize,
    /// Frames per chunk in chunked mode.
    pub chunk_frames: usize,
    /// Worker threads; `None` uses the global rayon pool.
    pub threads: Option<usize>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::Auto,
            memory_budget_bytes: DEFAULT_MEMORY_BUDGET_BYTES,
            chunk_frames: DEFAULT_CHUNK_FRAMES,
            threads: None,
        }
    }
}

impl ExecutionConfig {
    /// Defaults overlaid with `DDM_*` variables from the environment (and `.env`).
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env` with an explicit variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(v) = lookup("DDM_STRATEGY") {
            config.strategy = v.parse()?;
        }
        if let Some(v) = lookup("DDM_MEMORY_BUDGET_MB") {
            let mb: usize = parse_env("DDM_MEMORY_BUDGET_MB", &v)?;
            config.memory_budget_bytes = mb.saturating_mul(1 << 20);
        }
        if let Some(v) = lookup("DDM_CHUNK_FRAMES") {
            config.chunk_frames = parse_env("DDM_CHUNK_FRAMES", &v)?;
        }
        if let Some(v) = lookup("DDM_THREADS") {
            config.threads = Some(parse_env("DDM_THREADS", &v)?);
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_frames == 0 {
            return Err(DdmError::InvalidInput("Chunk size must be >= 1 frame.".into()));
        }
        if self.threads == Some(0) {
            return Err(DdmError::InvalidInput("Thread count must be >= 1.".into()));
        }
        Ok(())
    }
}

fn parse_env<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| DdmError::InvalidInput(format!("Invalid value '{value}' for {key}.")))
}

/// A full run's configuration as understood by the pipeline.
///
/// This is derived from CLI flags (plus defaults).
#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    pub file: PathBuf,
    /// Pixel size override (µm/px).
    pub um_per_px: Option<f64>,
    /// Frame interval override (ms/frame).
    pub ms_per_frame: Option<f64>,
    /// Largest lag time to compute; `None` means half the stack.
    pub max_tau: Option<usize>,
    pub model: ModelKind,
    /// Inclusive q bin range to fit.
    pub q_min: usize,
    pub q_max: Option<usize>,
    pub out_dir: Option<PathBuf>,
    pub execution: ExecutionConfig,
    pub progress: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn env_overrides_defaults() {
        let config = ExecutionConfig::from_lookup(lookup(&[
            ("DDM_STRATEGY", "streaming"),
            ("DDM_MEMORY_BUDGET_MB", "16"),
            ("DDM_CHUNK_FRAMES", "8"),
            ("DDM_THREADS", "2"),
        ]))
        .unwrap();
        assert_eq!(config.strategy, StrategyKind::Streaming);
        assert_eq!(config.memory_budget_bytes, 16 << 20);
        assert_eq!(config.chunk_frames, 8);
        assert_eq!(config.threads, Some(2));
    }

    #[test]
    fn missing_env_keeps_defaults() {
        let config = ExecutionConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config, ExecutionConfig::default());
    }

    #[test]
    fn invalid_env_values_are_errors() {
        assert!(ExecutionConfig::from_lookup(lookup(&[("DDM_STRATEGY", "gpu")])).is_err());
        assert!(ExecutionConfig::from_lookup(lookup(&[("DDM_CHUNK_FRAMES", "0")])).is_err());
        assert!(ExecutionConfig::from_lookup(lookup(&[("DDM_THREADS", "many")])).is_err());
    }
}
