//! Correct many targets against one basis-vector set.
//!
//! Targets are independent, so we fan out with rayon. The set is only read,
//! never locked.

use rayon::prelude::*;

use crate::correct::corrector::{Correction, CorrectionOptions, correct};
use crate::domain::{BasisVectorSet, TimeSeries};
use crate::error::CbvResult;
use crate::fit::Selection;

/// Correct every series in parallel; results are returned in input order.
///
/// One failing target does not affect the others.
pub fn correct_batch(
    series: &[TimeSeries],
    set: &BasisVectorSet,
    selection: &Selection,
    options: &CorrectionOptions,
) -> Vec<CbvResult<Correction>> {
    series
        .par_iter()
        .map(|s| correct(s, set, selection, options))
        .collect()
}
