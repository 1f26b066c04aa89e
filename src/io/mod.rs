//! Input/output helpers.
//!
//! - CSV ingest + validation for light curves and basis vectors (`ingest`)
//! - corrected light curve / report exports (`export`)

pub mod export;
pub mod ingest;

pub use export::*;
pub use ingest::*;
