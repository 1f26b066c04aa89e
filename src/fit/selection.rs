//! Basis-vector selection.
//!
//! Two modes:
//!
//! - **Explicit** (default): the caller names the IDs. We only validate them
//!   (no duplicates, all present in the set). Fully reproducible.
//! - **Automatic**: walk the set in rank order, adding one vector at a time and
//!   refitting, and keep going while BIC improves:
//!
//!   `BIC = n * ln(SSE/n) + k * ln(n)`
//!
//! Selection rules:
//! 1. Start from no basis vectors (offset only, if enabled).
//! 2. Try the next-ranked vector; accept it only if BIC drops by more than
//!    `MIN_BIC_IMPROVEMENT`.
//! 3. Stop at the first rejection, at the vector cap, when the next fit would be
//!    underdetermined, or when the next vector makes the system singular.
//!
//! Automatic mode is deterministic for fixed inputs, but which vectors it picks
//! depends on the data; prefer explicit IDs when results must be comparable
//! across targets.

use std::collections::HashSet;

use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::align::Alignment;
use crate::domain::BasisVectorSet;
use crate::error::{CbvError, CbvResult};
use crate::fit::regressor::{FitOptions, fit_weighted};

/// A BIC improvement smaller than this is not worth an extra parameter.
pub const MIN_BIC_IMPROVEMENT: f64 = 2.0;

/// Which basis vectors a correction uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// Use exactly these IDs, in this order.
    Explicit(Vec<u32>),
    /// Pick IDs by greedy BIC search over the set's rank order.
    Automatic,
}

impl Default for Selection {
    fn default() -> Self {
        Selection::Explicit(Vec::new())
    }
}

/// One step of the automatic search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionStep {
    pub ids: Vec<u32>,
    pub sse: f64,
    pub bic: f64,
    pub accepted: bool,
}

/// Result of the automatic search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoSelection {
    pub ids: Vec<u32>,
    pub steps: Vec<SelectionStep>,
}

/// Reject duplicate or unknown IDs.
pub fn validate_ids(ids: &[u32], set: &BasisVectorSet) -> CbvResult<()> {
    let mut seen = HashSet::with_capacity(ids.len());
    for &id in ids {
        if !seen.insert(id) {
            return Err(CbvError::InvalidSelection(format!(
                "basis vector {id} requested more than once in {ids:?}"
            )));
        }
    }
    if let Some(&id) = ids.iter().find(|&&id| !set.contains(id)) {
        return Err(CbvError::UnknownBasisVector {
            id,
            available: set.ids().to_vec(),
        });
    }
    Ok(())
}

/// Greedy BIC selection over the columns of `alignment` (in column order).
///
/// Trial fits are plain least squares even when `options.robust` is set, so the
/// search itself does not depend on IRLS convergence.
pub fn select_by_bic(
    alignment: &Alignment,
    weights: Option<&DVector<f64>>,
    options: &FitOptions,
    max_vectors: usize,
) -> CbvResult<AutoSelection> {
    let trial_options = FitOptions {
        robust: false,
        ..options.clone()
    };
    let n = alignment.rows();

    let mut chosen: Vec<usize> = Vec::new();
    let base = fit_weighted(
        &alignment.design.select_columns(chosen.iter()),
        &alignment.flux,
        weights,
        &trial_options,
    )?;
    let mut best_bic = base.quality.bic;
    let mut steps = vec![SelectionStep {
        ids: Vec::new(),
        sse: base.quality.sse,
        bic: best_bic,
        accepted: true,
    }];

    for (col, &id) in alignment.ids.iter().enumerate().take(max_vectors) {
        if n < trial_options.param_count(chosen.len() + 1) + 1 {
            debug!(id, rows = n, "stopping selection: next fit would be underdetermined");
            break;
        }

        let mut trial = chosen.clone();
        trial.push(col);
        let trial_ids: Vec<u32> = trial.iter().map(|&c| alignment.ids[c]).collect();

        let fit = match fit_weighted(
            &alignment.design.select_columns(trial.iter()),
            &alignment.flux,
            weights,
            &trial_options,
        ) {
            Ok(fit) => fit,
            Err(CbvError::SingularMatrix { condition_number }) => {
                debug!(id, condition_number, "stopping selection: vector is collinear with the current set");
                break;
            }
            Err(e) => return Err(e),
        };

        let accepted = fit.quality.bic < best_bic - MIN_BIC_IMPROVEMENT;
        debug!(id, bic = fit.quality.bic, best_bic, accepted, "selection step");
        steps.push(SelectionStep {
            ids: trial_ids,
            sse: fit.quality.sse,
            bic: fit.quality.bic,
            accepted,
        });

        if !accepted {
            break;
        }
        chosen = trial;
        best_bic = fit.quality.bic;
    }

    Ok(AutoSelection {
        ids: chosen.iter().map(|&c| alignment.ids[c]).collect(),
        steps,
    })
}
