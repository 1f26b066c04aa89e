//! Map a light curve's usable samples onto a basis-vector cadence index.
//!
//! Matching is done on the integer cadence number, never on floating time, so
//! small clock differences between products cannot shift rows.
//!
//! A sample is kept when:
//! - its flux is finite
//! - none of its quality bits intersect the exclusion mask
//! - its cadence exists in the basis-vector index
//! - every requested basis vector is finite at that cadence
//!
//! Everything else is dropped and counted. Partial loss is normal; only an
//! empty result is an error.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{BasisVectorSet, TimeSeries, is_excluded};
use crate::error::{CbvError, CbvResult};

/// Why samples were left out of the fit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlignmentStats {
    /// Samples in the input series.
    pub total: usize,
    /// Samples used for fitting.
    pub used: usize,
    /// Flux was NaN or infinite.
    pub masked_flux: usize,
    /// Quality flags intersected the exclusion mask.
    pub quality_excluded: usize,
    /// Cadence number absent from the basis-vector index.
    pub missing_cadence: usize,
    /// A requested basis vector was non-finite at the cadence.
    pub invalid_basis: usize,
}

/// Aligned fitting inputs.
#[derive(Debug, Clone)]
pub struct Alignment {
    /// Positions in the original series, ascending.
    pub valid_indices: Vec<usize>,
    pub flux: DVector<f64>,
    pub flux_err: DVector<f64>,
    /// Rows follow `valid_indices`; columns follow `ids`.
    pub design: DMatrix<f64>,
    pub ids: Vec<u32>,
    pub stats: AlignmentStats,
}

impl Alignment {
    pub fn rows(&self) -> usize {
        self.valid_indices.len()
    }
}

/// Align `series` with the basis vectors `ids` of `set`.
///
/// Fails with `UnknownBasisVector` if an ID is missing from `set` and with
/// `Alignment` when no sample survives the filters.
pub fn align(
    series: &TimeSeries,
    set: &BasisVectorSet,
    ids: &[u32],
    exclude_mask: u32,
) -> CbvResult<Alignment> {
    let columns: Vec<&[f64]> = ids
        .iter()
        .map(|&id| {
            set.vector(id).ok_or_else(|| CbvError::UnknownBasisVector {
                id,
                available: set.ids().to_vec(),
            })
        })
        .collect::<CbvResult<_>>()?;

    let mut stats = AlignmentStats {
        total: series.len(),
        ..AlignmentStats::default()
    };
    // (series index, basis row)
    let mut matched: Vec<(usize, usize)> = Vec::with_capacity(series.len());

    for (i, (&flux, (&cadence, &flags))) in series
        .flux()
        .iter()
        .zip(series.cadence().iter().zip(series.quality().iter()))
        .enumerate()
    {
        if !flux.is_finite() {
            stats.masked_flux += 1;
            continue;
        }
        if is_excluded(flags, exclude_mask) {
            stats.quality_excluded += 1;
            continue;
        }
        let Some(row) = set.row_of(cadence) else {
            stats.missing_cadence += 1;
            continue;
        };
        if columns.iter().any(|col| !col[row].is_finite()) {
            stats.invalid_basis += 1;
            continue;
        }
        matched.push((i, row));
    }

    stats.used = matched.len();
    debug!(
        series = series.label().unwrap_or("-"),
        used = stats.used,
        total = stats.total,
        masked = stats.masked_flux,
        excluded = stats.quality_excluded,
        missing = stats.missing_cadence,
        invalid_basis = stats.invalid_basis,
        "aligned light curve with basis vectors"
    );

    if matched.is_empty() {
        return Err(CbvError::Alignment {
            reason: format!(
                "no usable cadences overlap the basis vectors ({} samples: {} masked, {} quality-excluded, {} not in index, {} invalid basis values)",
                stats.total,
                stats.masked_flux,
                stats.quality_excluded,
                stats.missing_cadence,
                stats.invalid_basis
            ),
        });
    }

    let n = matched.len();
    let flux = DVector::from_iterator(n, matched.iter().map(|&(i, _)| series.flux()[i]));
    let flux_err = DVector::from_iterator(n, matched.iter().map(|&(i, _)| series.flux_err()[i]));
    let design = DMatrix::from_fn(n, columns.len(), |r, c| columns[c][matched[r].1]);
    let valid_indices = matched.into_iter().map(|(i, _)| i).collect();

    Ok(Alignment {
        valid_indices,
        flux,
        flux_err,
        design,
        ids: ids.to_vec(),
        stats,
    })
}
