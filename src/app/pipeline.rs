//! Shared "correction pipeline" used by `cbv correct` and `cbv demo`.
//!
//! Keeping this in one place avoids duplicating the core workflow:
//! load basis vectors -> load light curves -> batch correction -> per-target results
//!
//! The command handlers then only deal with presentation and exports.

use std::collections::HashSet;
use std::path::PathBuf;

use tracing::{info, warn};

use crate::correct::{Correction, CorrectionOptions, correct_batch};
use crate::domain::{BasisVectorSet, TimeSeries};
use crate::error::{AppError, CbvResult};
use crate::fit::Selection;
use crate::io::ingest::{RowError, load_basis_vectors, load_light_curve};

/// Configuration for one `cbv correct` run.
#[derive(Debug, Clone)]
pub struct CorrectConfig {
    pub lightcurves: Vec<PathBuf>,
    pub cbv: PathBuf,
    pub selection: Selection,
    pub options: CorrectionOptions,
    pub output_dir: Option<PathBuf>,
    pub report: Option<PathBuf>,
    pub quiet: bool,
}

/// One target's input and outcome.
#[derive(Debug, Clone)]
pub struct TargetOutput {
    pub target: String,
    pub raw: TimeSeries,
    pub result: CbvResult<Correction>,
}

/// All computed outputs of a run.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub basis: BasisVectorSet,
    pub targets: Vec<TargetOutput>,
}

impl RunOutput {
    pub fn failures(&self) -> impl Iterator<Item = &TargetOutput> {
        self.targets.iter().filter(|t| t.result.is_err())
    }
}

/// Load inputs from disk and correct every light curve.
pub fn run_correction(config: &CorrectConfig) -> Result<RunOutput, AppError> {
    let basis = load_basis_vectors(&config.cbv)?;
    report_row_errors(&config.cbv.display().to_string(), &basis.row_errors);
    info!(
        path = %config.cbv.display(),
        rows = basis.rows_read,
        vectors = basis.set.ids().len(),
        cadences = basis.set.len(),
        "loaded basis vectors"
    );

    let mut series = Vec::with_capacity(config.lightcurves.len());
    for path in &config.lightcurves {
        let ingested = load_light_curve(path)?;
        report_row_errors(&path.display().to_string(), &ingested.row_errors);
        info!(
            path = %path.display(),
            rows = ingested.rows_read,
            samples = ingested.series.len(),
            "loaded light curve"
        );
        series.push(ingested.series);
    }

    Ok(run_correction_on(basis.set, series, &config.selection, &config.options))
}

/// Correct already-loaded light curves in parallel.
///
/// Target names come from the series labels (positional for unlabeled series)
/// and are unique within the run: repeats get a `-2`, `-3`, ... suffix.
pub fn run_correction_on(
    basis: BasisVectorSet,
    series: Vec<TimeSeries>,
    selection: &Selection,
    options: &CorrectionOptions,
) -> RunOutput {
    let results = correct_batch(&series, &basis, selection, options);
    let names = unique_names(&series);

    let targets = series
        .into_iter()
        .zip(results)
        .zip(names)
        .map(|((raw, result), target)| {
            match &result {
                Ok(c) => info!(
                    lightcurve = %target,
                    ids = ?c.ids,
                    used = c.alignment.used,
                    converged = c.fit.converged,
                    "corrected"
                ),
                Err(e) => warn!(lightcurve = %target, error = %e, "correction failed"),
            }
            TargetOutput { target, raw, result }
        })
        .collect();

    RunOutput { basis, targets }
}

fn unique_names(series: &[TimeSeries]) -> Vec<String> {
    let mut taken: HashSet<String> = HashSet::new();
    series
        .iter()
        .enumerate()
        .map(|(i, s)| {
            let base = s
                .label()
                .map(str::to_string)
                .unwrap_or_else(|| format!("target-{:03}", i + 1));
            let mut name = base.clone();
            let mut copy = 1;
            while !taken.insert(name.clone()) {
                copy += 1;
                name = format!("{base}-{copy}");
            }
            if copy > 1 {
                warn!(label = %base, lightcurve = %name, "renamed repeated target label");
            }
            name
        })
        .collect()
}

fn report_row_errors(source: &str, errors: &[RowError]) {
    if errors.is_empty() {
        return;
    }
    warn!(source, skipped = errors.len(), "skipped malformed rows");
    for e in errors.iter().take(5) {
        warn!(source, line = e.line, "{}", e.message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CbvError;

    #[test]
    fn unlabeled_targets_get_positional_names() {
        let set = BasisVectorSet::new(vec![1, 2, 3], vec![(1, vec![0.0, 1.0, 2.0])]).unwrap();
        let a = TimeSeries::from_flux(vec![0.0, 1.0, 2.0], vec![1, 2, 3], vec![1.0, 2.0, 3.0])
            .unwrap()
            .with_label("kic-7");
        let b = TimeSeries::from_flux(vec![0.0], vec![99], vec![1.0]).unwrap();

        let mut options = CorrectionOptions::default();
        options.fit.add_constant_offset = false;
        let out = run_correction_on(set, vec![a, b], &Selection::Explicit(vec![1]), &options);

        assert_eq!(out.targets[0].target, "kic-7");
        assert_eq!(out.targets[1].target, "target-002");
        assert!(out.targets[0].result.is_ok());
        assert!(matches!(out.targets[1].result, Err(CbvError::Alignment { .. })));
        assert_eq!(out.failures().count(), 1);
    }

    #[test]
    fn repeated_labels_get_distinct_names() {
        let set = BasisVectorSet::new(vec![1, 2, 3], vec![(1, vec![0.0, 1.0, 2.0])]).unwrap();
        let lc = TimeSeries::from_flux(vec![0.0, 1.0, 2.0], vec![1, 2, 3], vec![1.0, 2.0, 3.0]).unwrap();
        let series = vec![
            lc.clone().with_label("kplr001"),
            lc.clone().with_label("kplr001"),
            lc.clone().with_label("kplr001-2"),
            lc.with_label("kplr001"),
        ];

        let mut options = CorrectionOptions::default();
        options.fit.add_constant_offset = false;
        let out = run_correction_on(set, series, &Selection::Explicit(vec![1]), &options);

        let names: Vec<&str> = out.targets.iter().map(|t| t.target.as_str()).collect();
        assert_eq!(names, vec!["kplr001", "kplr001-2", "kplr001-2-2", "kplr001-3"]);
    }
}
