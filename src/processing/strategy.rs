//! Execution strategy resolution, cancellation and progress reporting.
//!
//! The strategy is resolved exactly once per engine from an `ExecutionConfig`
//! and the stack's capabilities. Hot paths never probe for capabilities.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rayon::ThreadPool;

use crate::domain::{ExecutionConfig, ImageStack, StrategyKind};
use crate::error::{DdmError, Result};

/// Bytes per complex spectrum sample (`Complex32`).
pub(crate) const SPECTRUM_SAMPLE_BYTES: usize = 8;

/// A concrete, resolved backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    InMemory,
    Streaming,
    Chunked { chunk_frames: usize },
}

impl Strategy {
    pub fn name(self) -> &'static str {
        match self {
            Strategy::InMemory => "in-memory",
            Strategy::Streaming => "streaming",
            Strategy::Chunked { .. } => "chunked",
        }
    }

    /// Whether independent lag times may be computed concurrently.
    ///
    /// Streaming keeps memory bounded, so it stays sequential across lags.
    pub fn parallel_over_lags(self) -> bool {
        !matches!(self, Strategy::Streaming)
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Strategy::Chunked { chunk_frames } => write!(f, "chunked ({chunk_frames} frames/chunk)"),
            other => f.write_str(other.name()),
        }
    }
}

/// Resolved execution plan: backend plus optional dedicated worker pool.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub strategy: Strategy,
    /// Largest spectrum cube the in-memory backend may allocate.
    pub memory_budget_bytes: usize,
    pool: Option<Arc<ThreadPool>>,
}

impl ExecutionPlan {
    pub fn resolve<S: ImageStack + ?Sized>(config: &ExecutionConfig, stack: &S) -> Result<Self> {
        config.validate()?;
        let (height, width) = stack.shape();
        let cube_bytes = stack
            .len()
            .saturating_mul(height)
            .saturating_mul(width)
            .saturating_mul(SPECTRUM_SAMPLE_BYTES);
        let materialized = stack.as_array().is_some();
        let chunked = Strategy::Chunked {
            chunk_frames: config.chunk_frames,
        };

        let strategy = match config.strategy {
            StrategyKind::Auto => {
                if materialized && cube_bytes <= config.memory_budget_bytes {
                    Strategy::InMemory
                } else {
                    chunked
                }
            }
            StrategyKind::InMemory => {
                if !materialized {
                    return Err(DdmError::TypeMismatch(
                        "in-memory strategy requires a materialized stack; this stack is read lazily".into(),
                    ));
                }
                Strategy::InMemory
            }
            StrategyKind::Streaming => Strategy::Streaming,
            StrategyKind::Chunked => chunked,
        };

        let pool = match config.threads {
            Some(threads) => Some(Arc::new(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .build()
                    .map_err(|e| DdmError::ResourceExhausted(format!("Failed to build worker pool: {e}")))?,
            )),
            None => None,
        };

        Ok(Self {
            strategy,
            memory_budget_bytes: config.memory_budget_bytes,
            pool,
        })
    }

    /// Plan with an explicit strategy on the global pool and no memory cap.
    pub fn with_strategy(strategy: Strategy) -> Self {
        Self {
            strategy,
            memory_budget_bytes: usize::MAX,
            pool: None,
        }
    }

    /// Run `op` inside the dedicated pool when one was configured.
    pub fn install<R: Send>(&self, op: impl FnOnce() -> R + Send) -> R {
        match &self.pool {
            Some(pool) => pool.install(op),
            None => op(),
        }
    }
}

/// Cooperative cancellation flag, checked between lag times.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(DdmError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Receives progress for long-running builds. Calls may come from worker threads.
pub trait ProgressSink: Sync {
    fn start(&self, _total: usize) {}
    fn advance(&self, _delta: usize) {}
    fn finish(&self) {}
}

/// Discards progress.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::InMemoryStack;
    use ndarray::{Array2, Array3};

    /// Lazily materialized wrapper around an in-memory stack.
    struct Lazy(InMemoryStack);

    impl ImageStack for Lazy {
        fn len(&self) -> usize {
            self.0.len()
        }
        fn shape(&self) -> (usize, usize) {
            self.0.shape()
        }
        fn frame(&self, index: usize) -> Result<Array2<f32>> {
            self.0.frame(index)
        }
    }

    fn stack() -> InMemoryStack {
        InMemoryStack::new(Array3::zeros((4, 8, 8))).unwrap()
    }

    #[test]
    fn auto_prefers_in_memory_within_budget() {
        let plan = ExecutionPlan::resolve(&ExecutionConfig::default(), &stack()).unwrap();
        assert_eq!(plan.strategy, Strategy::InMemory);
    }

    #[test]
    fn auto_falls_back_to_chunked_over_budget() {
        let config = ExecutionConfig {
            memory_budget_bytes: 16,
            chunk_frames: 3,
            ..ExecutionConfig::default()
        };
        let plan = ExecutionPlan::resolve(&config, &stack()).unwrap();
        assert_eq!(plan.strategy, Strategy::Chunked { chunk_frames: 3 });
    }

    #[test]
    fn auto_uses_chunked_for_lazy_stacks() {
        let plan = ExecutionPlan::resolve(&ExecutionConfig::default(), &Lazy(stack())).unwrap();
        assert!(matches!(plan.strategy, Strategy::Chunked { .. }));
    }

    #[test]
    fn explicit_in_memory_on_lazy_stack_is_type_mismatch() {
        let config = ExecutionConfig {
            strategy: StrategyKind::InMemory,
            ..ExecutionConfig::default()
        };
        let err = ExecutionPlan::resolve(&config, &Lazy(stack())).unwrap_err();
        assert!(matches!(err, DdmError::TypeMismatch(_)));
    }

    #[test]
    fn dedicated_pool_runs_work() {
        let config = ExecutionConfig {
            threads: Some(2),
            ..ExecutionConfig::default()
        };
        let plan = ExecutionPlan::resolve(&config, &stack()).unwrap();
        assert_eq!(plan.install(rayon::current_num_threads), 2);
    }

    #[test]
    fn cancel_token_is_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(token.check().is_ok());
        clone.cancel();
        assert!(matches!(token.check(), Err(DdmError::Cancelled)));
    }
}
