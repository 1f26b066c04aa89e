//! Mathematical utilities: least squares and robust statistics.

pub mod ols;
pub mod robust;

pub use ols::*;
pub use robust::*;
