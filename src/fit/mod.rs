//! Curve fitting orchestration.
//!
//! Responsibilities:
//!
//! - generate τ seed grids
//! - fit one ISF curve with a bounded nonlinear solver
//! - fit every q bin of an ISF (parallel)

pub mod batch;
pub mod fitter;
pub mod tau_grid;

pub use batch::*;
pub use fitter::*;
pub use tau_grid::*;
