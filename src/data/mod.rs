//! Data sources that do not come from files.
//!
//! - `synthetic`: seeded Kepler-like light curves + basis vectors

pub mod synthetic;

pub use synthetic::*;
