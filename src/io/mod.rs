//! Input/output helpers.
//!
//! - lazy multi-page TIFF stacks (`tiff_stack`)
//! - DDM matrix artifacts in JSON/CSV, with merge on rerun (`artifact`)

pub mod artifact;
pub mod tiff_stack;

pub use artifact::*;
pub use tiff_stack::*;
