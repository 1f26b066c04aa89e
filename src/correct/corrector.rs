//! Correct a single light curve with cotrending basis vectors.
//!
//! The systematic model is `Σ β_j · CBV_j` over the selected vectors. A fitted
//! constant offset only absorbs the flux level during the fit; it is not part of
//! the model, so the corrected light curve keeps the raw flux level.
//!
//! Samples outside the fitted region (masked, quality-excluded, or without
//! basis-vector coverage) are returned exactly as they came in.

use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::align::{Alignment, AlignmentStats, align};
use crate::domain::{BasisVectorSet, DEFAULT_EXCLUDE_MASK, Normalization, TimeSeries};
use crate::error::{CbvError, CbvResult};
use crate::fit::{AutoSelection, FitOptions, FitResult, Selection, fit_weighted, select_by_bic, validate_ids};
use crate::math::median;

/// Options for a full correction run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionOptions {
    /// Quality bits that exclude a cadence from the fit.
    pub exclude_mask: u32,
    pub fit: FitOptions,
    /// Weight rows by inverse variance from the flux uncertainties.
    pub use_uncertainties: bool,
    pub normalization: Normalization,
    /// Fail with `NonConvergence` instead of returning a non-converged robust fit.
    pub reject_non_converged: bool,
    /// Upper bound on vectors considered by automatic selection.
    pub max_auto_vectors: usize,
}

impl Default for CorrectionOptions {
    fn default() -> Self {
        Self {
            exclude_mask: DEFAULT_EXCLUDE_MASK,
            fit: FitOptions::default(),
            use_uncertainties: false,
            normalization: Normalization::None,
            reject_non_converged: false,
            max_auto_vectors: 16,
        }
    }
}

/// Output of a correction.
#[derive(Debug, Clone)]
pub struct Correction {
    /// Same time/cadence/uncertainty/quality as the input; flux replaced.
    pub corrected: TimeSeries,
    /// Systematic model in flux units, full length, zero outside `valid_indices`.
    pub model: Vec<f64>,
    pub valid_indices: Vec<usize>,
    /// Basis vectors actually used, in column order.
    pub ids: Vec<u32>,
    /// Fit in the units it was solved in (relative flux under median normalization).
    pub fit: FitResult,
    pub alignment: AlignmentStats,
    /// Search trace, when `Selection::Automatic` was used.
    pub auto_selection: Option<AutoSelection>,
    /// Factor converting fit units to flux units (the median under normalization).
    pub flux_scale: f64,
}

/// Fit and remove systematics from `series`.
///
/// `Selection::Explicit` is the reproducible mode. `Selection::Automatic`
/// searches the set in rank order (see `fit::selection`).
pub fn correct(
    series: &TimeSeries,
    set: &BasisVectorSet,
    selection: &Selection,
    options: &CorrectionOptions,
) -> CbvResult<Correction> {
    options.fit.validate()?;

    let (alignment, target, auto_selection) = match selection {
        Selection::Explicit(ids) => {
            validate_ids(ids, set)?;
            let alignment = align(series, set, ids, options.exclude_mask)?;
            let target = FitTarget::prepare(&alignment, options)?;
            (alignment, target, None)
        }
        Selection::Automatic => {
            let base = align(series, set, &[], options.exclude_mask)?;
            let candidates = covering_candidates(series, set, &base, options.max_auto_vectors);
            // Same rows as `base`, so the chosen subset needs no re-alignment.
            let alignment = align(series, set, &candidates, options.exclude_mask)?;
            let target = FitTarget::prepare(&alignment, options)?;
            let search = FitTarget::search(&alignment, &target, options)?;
            let alignment = restrict(alignment, &search.ids);
            (alignment, target, Some(search))
        }
    };

    let fit = fit_weighted(&alignment.design, &target.y, target.weights.as_ref(), &options.fit)?;
    let fit = if options.reject_non_converged {
        fit.require_converged()?
    } else {
        if !fit.converged {
            warn!(
                series = series.label().unwrap_or("-"),
                iterations = fit.iterations,
                "keeping non-converged robust fit"
            );
        }
        fit
    };

    let mut model = vec![0.0; series.len()];
    let mut corrected_flux = series.flux().to_vec();
    for (row, &idx) in alignment.valid_indices.iter().enumerate() {
        let m = fit.systematic[row] * target.scale;
        model[idx] = m;
        corrected_flux[idx] -= m;
    }
    let corrected = series.with_flux(corrected_flux)?;

    debug!(
        series = series.label().unwrap_or("-"),
        ids = ?alignment.ids,
        used = alignment.stats.used,
        total = alignment.stats.total,
        rmse = fit.quality.rmse,
        "corrected light curve"
    );

    Ok(Correction {
        corrected,
        model,
        valid_indices: alignment.valid_indices,
        ids: alignment.ids,
        fit,
        alignment: alignment.stats,
        auto_selection,
        flux_scale: target.scale,
    })
}

/// Flux vector and weights in the units the regression runs in.
struct FitTarget {
    y: DVector<f64>,
    weights: Option<DVector<f64>>,
    scale: f64,
}

impl FitTarget {
    fn prepare(alignment: &Alignment, options: &CorrectionOptions) -> CbvResult<Self> {
        let scale = match options.normalization {
            Normalization::None => 1.0,
            Normalization::Median => {
                let m = median(alignment.flux.as_slice()).unwrap_or(f64::NAN);
                if !(m.is_finite() && m != 0.0) {
                    return Err(CbvError::InvalidInput(format!(
                        "cannot normalize by median flux {m}"
                    )));
                }
                m
            }
        };

        let y = match options.normalization {
            Normalization::None => alignment.flux.clone(),
            Normalization::Median => alignment.flux.map(|f| f / scale - 1.0),
        };

        let weights = if options.use_uncertainties {
            let bad = alignment
                .flux_err
                .iter()
                .filter(|e| !(e.is_finite() && **e > 0.0))
                .count();
            if bad > 0 {
                return Err(CbvError::InvalidInput(format!(
                    "{bad} fitted cadences have non-positive or missing flux uncertainties"
                )));
            }
            Some(alignment.flux_err.map(|e| {
                let rel = e / scale.abs();
                1.0 / (rel * rel)
            }))
        } else {
            None
        };

        Ok(Self { y, weights, scale })
    }

    fn search(
        alignment: &Alignment,
        target: &FitTarget,
        options: &CorrectionOptions,
    ) -> CbvResult<AutoSelection> {
        let scaled = Alignment {
            flux: target.y.clone(),
            ..alignment.clone()
        };
        select_by_bic(&scaled, target.weights.as_ref(), &options.fit, options.max_auto_vectors)
    }
}

/// Vectors in rank order that are finite at every row of `base`, at most `limit`.
///
/// A vector with gaps over the target's usable cadences would shrink the fit for
/// every other candidate, so automatic selection passes over it.
fn covering_candidates(
    series: &TimeSeries,
    set: &BasisVectorSet,
    base: &Alignment,
    limit: usize,
) -> Vec<u32> {
    let rows: Vec<usize> = base
        .valid_indices
        .iter()
        .filter_map(|&i| set.row_of(series.cadence()[i]))
        .collect();

    let mut skipped = Vec::new();
    let candidates: Vec<u32> = set
        .ids()
        .iter()
        .copied()
        .filter(|&id| {
            let covered = set
                .vector(id)
                .is_some_and(|v| rows.iter().all(|&r| v[r].is_finite()));
            if !covered {
                skipped.push(id);
            }
            covered
        })
        .take(limit)
        .collect();

    if !skipped.is_empty() {
        debug!(
            series = series.label().unwrap_or("-"),
            skipped = ?skipped,
            "passing over vectors with gaps at usable cadences"
        );
    }
    candidates
}

/// Keep only the columns of `alignment` whose IDs are in `ids` (rows unchanged).
fn restrict(alignment: Alignment, ids: &[u32]) -> Alignment {
    let cols: Vec<usize> = ids
        .iter()
        .filter_map(|id| alignment.ids.iter().position(|c| c == id))
        .collect();
    Alignment {
        design: alignment.design.select_columns(cols.iter()),
        ids: ids.to_vec(),
        ..alignment
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SAFE_MODE;

    fn ols() -> CorrectionOptions {
        CorrectionOptions {
            fit: FitOptions {
                add_constant_offset: false,
                ..FitOptions::default()
            },
            ..CorrectionOptions::default()
        }
    }

    #[test]
    fn excluded_cadence_is_left_untouched() {
        let set = BasisVectorSet::new(vec![1, 2, 3, 4], vec![(1, vec![1.0; 4])]).unwrap();
        let series = TimeSeries::new(
            vec![0.0, 1.0, 2.0, 3.0],
            vec![1, 2, 3, 4],
            vec![2.0, 3.0, 4.0, 11.0],
            vec![0.1; 4],
            vec![0, 0, 0, SAFE_MODE],
        )
        .unwrap();

        let out = correct(&series, &set, &Selection::Explicit(vec![1]), &ols()).unwrap();
        assert!((out.fit.coefficients[0] - 3.0).abs() < 1e-12);
        assert_eq!(out.valid_indices, vec![0, 1, 2]);
        assert_eq!(out.corrected.flux()[3], 11.0);
        assert_eq!(out.model[3], 0.0);
        for (c, e) in out.corrected.flux()[..3].iter().zip([-1.0, 0.0, 1.0]) {
            assert!((c - e).abs() < 1e-12);
        }
        assert_eq!(out.alignment.quality_excluded, 1);
    }

    #[test]
    fn duplicate_selection_is_rejected_before_fitting() {
        let set = BasisVectorSet::new(vec![1, 2, 3], vec![(1, vec![0.0, 1.0, 2.0])]).unwrap();
        let series = TimeSeries::from_flux(vec![0.0, 1.0, 2.0], vec![1, 2, 3], vec![1.0; 3]).unwrap();
        let err = correct(&series, &set, &Selection::Explicit(vec![1, 1]), &ols()).unwrap_err();
        assert!(matches!(err, CbvError::InvalidSelection(_)));

        let err = correct(&series, &set, &Selection::Explicit(vec![4]), &ols()).unwrap_err();
        assert!(matches!(err, CbvError::UnknownBasisVector { id: 4, .. }));
    }

    #[test]
    fn empty_selection_is_a_no_op() {
        let set = BasisVectorSet::new(vec![1, 2, 3], vec![(1, vec![0.0, 1.0, 2.0])]).unwrap();
        let series =
            TimeSeries::from_flux(vec![0.0, 1.0, 2.0], vec![1, 2, 3], vec![5.0, f64::NAN, 7.0]).unwrap();
        let out = correct(&series, &set, &Selection::Explicit(vec![]), &CorrectionOptions::default()).unwrap();
        assert_eq!(out.corrected.flux()[0], 5.0);
        assert!(out.corrected.flux()[1].is_nan());
        assert_eq!(out.corrected.flux()[2], 7.0);
        assert!(out.model.iter().all(|m| *m == 0.0));
    }

    #[test]
    fn median_normalization_reports_model_in_flux_units() {
        let n = 50;
        let cadence: Vec<i64> = (0..n).collect();
        let bv: Vec<f64> = (0..n).map(|i| (i as f64 * 0.3).sin() * 0.01).collect();
        let set = BasisVectorSet::new(cadence.clone(), vec![(1, bv.clone())]).unwrap();
        // flux = 1e4 * (1 + 2 * bv)
        let flux: Vec<f64> = bv.iter().map(|b| 1e4 * (1.0 + 2.0 * b)).collect();
        let series = TimeSeries::from_flux((0..n).map(|i| i as f64).collect(), cadence, flux.clone()).unwrap();

        let options = CorrectionOptions {
            normalization: Normalization::Median,
            ..CorrectionOptions::default()
        };
        let out = correct(&series, &set, &Selection::Explicit(vec![1]), &options).unwrap();
        // Relative flux is taken about the median, so the coefficient is 2 / (1 + 2 * median(bv)).
        assert!((out.fit.coefficients[0] - 2.0).abs() < 2e-2);
        for i in 0..n as usize {
            assert!((out.corrected.flux()[i] + out.model[i] - flux[i]).abs() < 1e-9 * flux[i]);
        }
        // The trend is removed entirely, leaving the unmodulated level.
        let spread = out
            .corrected
            .flux()
            .iter()
            .fold(0.0_f64, |acc, f| acc.max((f - 1e4).abs()));
        assert!(spread < 1e-6, "spread {spread}");
    }

    #[test]
    fn uncertainties_must_be_positive_when_used() {
        let set = BasisVectorSet::new(vec![1, 2, 3], vec![(1, vec![0.0, 1.0, 2.0])]).unwrap();
        let series = TimeSeries::from_flux(vec![0.0, 1.0, 2.0], vec![1, 2, 3], vec![1.0; 3]).unwrap();
        let options = CorrectionOptions {
            use_uncertainties: true,
            ..ols()
        };
        let err = correct(&series, &set, &Selection::Explicit(vec![1]), &options).unwrap_err();
        assert!(matches!(err, CbvError::InvalidInput(_)));
    }

    #[test]
    fn automatic_selection_records_its_trace() {
        let n = 200;
        let cadence: Vec<i64> = (0..n).collect();
        let b1: Vec<f64> = (0..n).map(|i| (i as f64 * 0.03).sin()).collect();
        let b2: Vec<f64> = (0..n).map(|i| ((i as f64 * 7.1).sin() * 1e4).fract()).collect();
        let set = BasisVectorSet::new(cadence.clone(), vec![(1, b1.clone()), (2, b2)]).unwrap();
        let flux: Vec<f64> = (0..n as usize)
            .map(|i| 500.0 + 3.0 * b1[i] + 0.001 * ((i as f64 * 3.3).cos() * 1e4).fract())
            .collect();
        let series = TimeSeries::from_flux((0..n).map(|i| i as f64).collect(), cadence, flux).unwrap();

        let out = correct(&series, &set, &Selection::Automatic, &CorrectionOptions::default()).unwrap();
        assert_eq!(out.ids, vec![1]);
        assert_eq!(out.fit.coefficients.len(), 1);
        let trace = out.auto_selection.unwrap();
        assert_eq!(trace.ids, vec![1]);
        assert!(trace.steps.len() >= 2);
    }

    #[test]
    fn gappy_candidate_does_not_shrink_the_automatic_fit() {
        let n = 200;
        let cadence: Vec<i64> = (0..n).collect();
        let b1: Vec<f64> = (0..n).map(|i| (i as f64 * 0.03).sin()).collect();
        let b2: Vec<f64> = (0..n)
            .map(|i| if i < 100 { (i as f64 * 0.11).cos() } else { f64::NAN })
            .collect();
        let set = BasisVectorSet::new(cadence.clone(), vec![(1, b1.clone()), (2, b2)]).unwrap();
        let flux: Vec<f64> = (0..n as usize)
            .map(|i| 500.0 + 3.0 * b1[i] + 0.001 * ((i as f64 * 3.3).cos() * 1e4).fract())
            .collect();
        let series = TimeSeries::from_flux((0..n).map(|i| i as f64).collect(), cadence, flux).unwrap();

        let auto = correct(&series, &set, &Selection::Automatic, &CorrectionOptions::default()).unwrap();
        let explicit = correct(&series, &set, &Selection::Explicit(vec![1]), &CorrectionOptions::default()).unwrap();
        assert_eq!(auto.ids, vec![1]);
        assert_eq!(auto.valid_indices.len(), 200);
        assert_eq!(auto.alignment.invalid_basis, 0);
        assert!(auto.model[150] != 0.0);
        assert!((auto.model[150] - explicit.model[150]).abs() < 1e-9);
    }

    #[test]
    fn empty_candidate_vector_does_not_fail_automatic_selection() {
        let n = 120;
        let cadence: Vec<i64> = (0..n).collect();
        let b1: Vec<f64> = (0..n).map(|i| (i as f64 * 0.05).sin()).collect();
        let set = BasisVectorSet::new(
            cadence.clone(),
            vec![(1, vec![f64::NAN; n as usize]), (2, b1.clone())],
        )
        .unwrap();
        let flux: Vec<f64> = (0..n as usize)
            .map(|i| 100.0 - 2.0 * b1[i] + 0.001 * ((i as f64 * 5.7).sin() * 1e4).fract())
            .collect();
        let series = TimeSeries::from_flux((0..n).map(|i| i as f64).collect(), cadence, flux).unwrap();

        let out = correct(&series, &set, &Selection::Automatic, &CorrectionOptions::default()).unwrap();
        assert_eq!(out.ids, vec![2]);
        assert_eq!(out.valid_indices.len(), n as usize);
        assert!((out.fit.coefficients[0] + 2.0).abs() < 1e-2);
    }

    #[test]
    fn empty_selection_with_one_usable_cadence_is_a_no_op() {
        let set = BasisVectorSet::new(vec![1, 2], vec![(1, vec![0.5, 1.0])]).unwrap();
        let series = TimeSeries::from_flux(vec![0.0, 1.0], vec![1, 2], vec![5.0, f64::NAN]).unwrap();
        let out = correct(&series, &set, &Selection::Explicit(vec![]), &CorrectionOptions::default()).unwrap();
        assert_eq!(out.corrected.flux()[0], 5.0);
        assert!(out.corrected.flux()[1].is_nan());
        assert_eq!(out.model, vec![0.0, 0.0]);
        assert_eq!(out.valid_indices, vec![0]);
    }

    #[test]
    fn non_converged_fit_can_be_rejected() {
        let n = 60;
        let cadence: Vec<i64> = (0..n).collect();
        let bv: Vec<f64> = (0..n).map(|i| (i as f64 * 0.2).sin()).collect();
        let set = BasisVectorSet::new(cadence.clone(), vec![(1, bv.clone())]).unwrap();
        let mut flux: Vec<f64> = (0..n as usize)
            .map(|i| 10.0 + bv[i] + 0.05 * ((i as f64 * 1.7).sin() * 1e3).fract())
            .collect();
        flux[20] += 25.0;
        let series = TimeSeries::from_flux((0..n).map(|i| i as f64).collect(), cadence, flux).unwrap();

        let mut options = CorrectionOptions::default();
        options.fit.robust = true;
        options.fit.max_iterations = 2;
        options.fit.convergence_tolerance = 1e-15;

        let lenient = correct(&series, &set, &Selection::Explicit(vec![1]), &options).unwrap();
        assert!(!lenient.fit.converged);

        options.reject_non_converged = true;
        let err = correct(&series, &set, &Selection::Explicit(vec![1]), &options).unwrap_err();
        assert!(matches!(err, CbvError::NonConvergence { .. }));
    }
}
