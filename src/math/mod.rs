//! Mathematical utilities: 2D FFT, radial averaging, and least squares.

pub mod fft;
pub mod lm;
pub mod ols;
pub mod radial;

pub use fft::*;
pub use lm::*;
pub use ols::*;
pub use radial::*;
