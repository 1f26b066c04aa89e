//! `cbv-cotrend` library crate.
//!
//! Removes instrumental systematics from light curves by fitting a linear
//! combination of cotrending basis vectors (CBVs) and subtracting it.
//!
//! The binary (`cbv`) is a thin wrapper around this library so that:
//!
//! - the core is testable without spawning processes
//! - pipelines can call `correct`/`correct_batch` directly
//! - I/O stays at the edges (`io`, `app`); the core does none
//!
//! Typical use:
//!
//! ```no_run
//! use cbv_cotrend::correct::{CorrectionOptions, correct};
//! use cbv_cotrend::fit::Selection;
//! use cbv_cotrend::io::{load_basis_vectors, load_light_curve};
//! use std::path::Path;
//!
//! let basis = load_basis_vectors(Path::new("cbv.csv")).unwrap().set;
//! let lc = load_light_curve(Path::new("kic.csv")).unwrap().series;
//! let out = correct(&lc, &basis, &Selection::Explicit(vec![1, 2, 3]), &CorrectionOptions::default()).unwrap();
//! println!("{:?}", out.fit.coefficients);
//! ```

pub mod align;
pub mod app;
pub mod cli;
pub mod correct;
pub mod data;
pub mod domain;
pub mod error;
pub mod fit;
pub mod io;
pub mod math;
pub mod report;
