//! Alignment of light curves onto a basis-vector cadence grid.

pub mod aligner;

pub use aligner::*;
