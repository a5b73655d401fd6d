//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - the `ImageStack` abstraction and its in-memory implementation
//! - lag-time sets, the DDM matrix, calibration and ISF containers
//! - fit outputs (`FitResult`) and model identifiers (`ModelKind`)
//! - execution and run configuration

pub mod config;
pub mod stack;
pub mod types;

pub use config::*;
pub use stack::*;
pub use types::*;
