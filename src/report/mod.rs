//! Reporting utilities: run summary and per-q fit tables.

pub mod format;

pub use format::*;
