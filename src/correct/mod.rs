//! Correction orchestration.
//!
//! Keeping this in one place avoids duplicating the core workflow:
//! validate selection -> align -> fit -> reconstruct model -> subtract
//!
//! The CLI and library callers then only deal with inputs and outputs.

pub mod batch;
pub mod corrector;

pub use batch::*;
pub use corrector::*;
