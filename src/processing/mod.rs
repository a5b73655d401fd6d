//! Image-stack processing: the difference-FFT engine, DDM matrix assembly,
//! calibration and ISF extraction.

pub mod calibration;
pub mod engine;
pub mod isf;
pub mod matrix;
pub mod strategy;

pub use calibration::*;
pub use engine::*;
pub use isf::*;
pub use matrix::*;
pub use strategy::*;
