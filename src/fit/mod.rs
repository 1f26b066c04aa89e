//! Systematics fitting.
//!
//! Responsibilities:
//!
//! - regress basis vectors onto aligned flux (OLS / ridge / robust IRLS)
//! - validate explicit basis-vector selections
//! - select basis vectors automatically using BIC

pub mod regressor;
pub mod selection;

pub use regressor::*;
pub use selection::*;
