//! `ddm-analysis` library crate.
//!
//! The binary (`ddm`) is a thin wrapper around this library so that:
//!
//! - core logic is testable without spawning processes
//! - the processing pipeline can run on frames that never touched a file
//! - code stays easy to navigate as the project grows

pub mod app;
pub mod cli;
pub mod domain;
pub mod error;
pub mod fit;
pub mod io;
pub mod math;
pub mod models;
pub mod processing;
pub mod report;
