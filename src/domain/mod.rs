//! Domain types used throughout the correction pipeline.
//!
//! This module defines:
//!
//! - the light curve container (`TimeSeries`)
//! - the immutable basis-vector library (`BasisVectorSet`)
//! - Kepler quality-flag bits and the default exclusion mask (`quality`)
//! - small configuration enums shared by the core and the CLI

pub mod quality;
pub mod types;

pub use quality::*;
pub use types::*;
