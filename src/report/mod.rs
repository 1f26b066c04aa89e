//! Reporting: the JSON correction report and terminal summaries.
//!
//! The report is the machine-readable record of a correction: which vectors
//! were used, their coefficients, and enough diagnostics to judge the fit.

use serde::Serialize;

use crate::align::AlignmentStats;
use crate::correct::{Correction, CorrectionOptions};
use crate::fit::AutoSelection;

pub mod format;

pub use format::*;

/// One fitted coefficient, keyed by basis-vector ID.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CoefficientEntry {
    pub id: u32,
    pub value: f64,
}

/// How the basis vectors were chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionMode {
    Explicit,
    Automatic,
}

/// Serializable summary of one correction.
///
/// Non-finite diagnostics (a rank-deficient condition number, the BIC of an
/// exact fit) are written as `null`.
#[derive(Debug, Clone, Serialize)]
pub struct CorrectionReport {
    pub tool: String,
    pub target: String,
    pub segment: Option<String>,
    pub selection: SelectionMode,
    pub ids: Vec<u32>,
    /// Design column labels, `cbv_<id>` then `offset` when fitted.
    pub columns: Vec<String>,
    pub coefficients: Vec<CoefficientEntry>,
    pub offset: Option<f64>,
    /// Multiply coefficients by this to get flux units.
    pub flux_scale: f64,
    pub converged: bool,
    pub iterations: usize,
    pub condition_number: Option<f64>,
    pub rescaled: bool,
    pub sse: f64,
    pub rmse: f64,
    pub bic: Option<f64>,
    pub n: usize,
    pub k: usize,
    pub alignment: AlignmentStats,
    pub options: CorrectionOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_selection: Option<AutoSelection>,
}

impl CorrectionReport {
    pub fn new(
        target: impl Into<String>,
        segment: Option<&str>,
        correction: &Correction,
        options: &CorrectionOptions,
    ) -> Self {
        let fit = &correction.fit;
        let coefficients = correction
            .ids
            .iter()
            .zip(&fit.coefficients)
            .map(|(&id, &value)| CoefficientEntry { id, value })
            .collect();
        let mut columns: Vec<String> = correction.ids.iter().map(|id| format!("cbv_{id}")).collect();
        if fit.offset.is_some() {
            columns.push("offset".to_string());
        }

        Self {
            tool: "cbv".to_string(),
            target: target.into(),
            segment: segment.map(str::to_string),
            selection: if correction.auto_selection.is_some() {
                SelectionMode::Automatic
            } else {
                SelectionMode::Explicit
            },
            ids: correction.ids.clone(),
            columns,
            coefficients,
            offset: fit.offset,
            flux_scale: correction.flux_scale,
            converged: fit.converged,
            iterations: fit.iterations,
            condition_number: finite(fit.condition_number),
            rescaled: fit.rescaled,
            sse: fit.quality.sse,
            rmse: fit.quality.rmse,
            bic: finite(fit.quality.bic),
            n: fit.quality.n,
            k: fit.quality.k,
            alignment: correction.alignment,
            options: options.clone(),
            auto_selection: correction.auto_selection.clone(),
        }
    }
}

fn finite(v: f64) -> Option<f64> {
    v.is_finite().then_some(v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correct::correct;
    use crate::domain::{BasisVectorSet, TimeSeries};
    use crate::fit::Selection;

    #[test]
    fn report_pairs_ids_with_coefficients() {
        let n = 30;
        let cadence: Vec<i64> = (100..100 + n).collect();
        let b1: Vec<f64> = (0..n).map(|i| (i as f64 * 0.2).sin()).collect();
        let b2: Vec<f64> = (0..n).map(|i| (i as f64 * 0.05).cos()).collect();
        let set = BasisVectorSet::new(cadence.clone(), vec![(1, b1.clone()), (2, b2.clone())])
            .unwrap()
            .with_segment("q3");
        let flux: Vec<f64> = (0..n as usize).map(|i| 50.0 + 2.0 * b1[i] - 0.5 * b2[i]).collect();
        let series = TimeSeries::from_flux((0..n).map(|i| i as f64).collect(), cadence, flux).unwrap();

        let options = CorrectionOptions::default();
        let out = correct(&series, &set, &Selection::Explicit(vec![2, 1]), &options).unwrap();
        let report = CorrectionReport::new("star", set.segment(), &out, &options);

        assert_eq!(report.selection, SelectionMode::Explicit);
        assert_eq!(report.coefficients[0].id, 2);
        assert!((report.coefficients[0].value + 0.5).abs() < 1e-9);
        assert_eq!(report.coefficients[1].id, 1);
        assert!((report.coefficients[1].value - 2.0).abs() < 1e-9);

        // Exact fit: SSE ~ 0 so BIC may be -inf; it must still serialize.
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["target"], "star");
        assert_eq!(json["segment"], "q3");
        assert_eq!(json["selection"], "explicit");
        assert_eq!(json["columns"], serde_json::json!(["cbv_2", "cbv_1", "offset"]));
        assert_eq!(json["alignment"]["used"], 30);
        assert!(json.get("auto_selection").is_none());
    }
}
