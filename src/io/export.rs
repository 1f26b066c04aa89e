//! CSV/JSON exports.
//!
//! Corrected light curves are written one row per input sample, so the file
//! lines up with the raw light curve it came from. Masked samples keep their
//! NaN flux (written as `NaN`, which the ingest side reads back).

use std::fs::File;
use std::io::Write;
use std::path::Path;

use serde::Serialize;

use crate::correct::Correction;
use crate::domain::{BasisVectorSet, TimeSeries};
use crate::error::AppError;
use crate::report::CorrectionReport;

#[derive(Debug, Serialize)]
struct CorrectedRow {
    time: f64,
    cadenceno: i64,
    raw_flux: f64,
    corrected_flux: f64,
    model: f64,
    flux_err: f64,
    quality: u32,
    fitted: bool,
}

#[derive(Debug, Serialize)]
struct LightCurveRow {
    time: f64,
    cadenceno: i64,
    flux: f64,
    flux_err: f64,
    quality: u32,
}

/// Write a corrected light curve CSV to `path`.
pub fn write_corrected_csv(path: &Path, raw: &TimeSeries, correction: &Correction) -> Result<(), AppError> {
    let file = create(path, "corrected CSV")?;
    write_corrected(file, raw, correction)
}

/// Write a corrected light curve as CSV to any writer.
pub fn write_corrected<W: Write>(writer: W, raw: &TimeSeries, correction: &Correction) -> Result<(), AppError> {
    let mut fitted = vec![false; raw.len()];
    for &idx in &correction.valid_indices {
        fitted[idx] = true;
    }

    let mut out = csv::Writer::from_writer(writer);
    for i in 0..raw.len() {
        out.serialize(CorrectedRow {
            time: raw.time()[i],
            cadenceno: raw.cadence()[i],
            raw_flux: raw.flux()[i],
            corrected_flux: correction.corrected.flux()[i],
            model: correction.model[i],
            flux_err: raw.flux_err()[i],
            quality: raw.quality()[i],
            fitted: fitted[i],
        })
        .map_err(|e| AppError::new(2, format!("Failed to write corrected CSV row: {e}")))?;
    }
    out.flush()
        .map_err(|e| AppError::new(2, format!("Failed to flush corrected CSV: {e}")))?;
    Ok(())
}

/// Write a light curve in the ingest schema (used by `cbv demo`).
pub fn write_light_curve_csv(path: &Path, series: &TimeSeries) -> Result<(), AppError> {
    let file = create(path, "light curve CSV")?;
    write_light_curve(file, series)
}

pub fn write_light_curve<W: Write>(writer: W, series: &TimeSeries) -> Result<(), AppError> {
    let mut out = csv::Writer::from_writer(writer);
    for i in 0..series.len() {
        out.serialize(LightCurveRow {
            time: series.time()[i],
            cadenceno: series.cadence()[i],
            flux: series.flux()[i],
            flux_err: series.flux_err()[i],
            quality: series.quality()[i],
        })
        .map_err(|e| AppError::new(2, format!("Failed to write light curve row: {e}")))?;
    }
    out.flush()
        .map_err(|e| AppError::new(2, format!("Failed to flush light curve CSV: {e}")))?;
    Ok(())
}

/// Write a basis-vector set as `cadenceno,vector_<id>,...`.
pub fn write_basis_csv(path: &Path, set: &BasisVectorSet) -> Result<(), AppError> {
    let file = create(path, "basis vector CSV")?;
    write_basis(file, set)
}

pub fn write_basis<W: Write>(writer: W, set: &BasisVectorSet) -> Result<(), AppError> {
    let row_err = |e: csv::Error| AppError::new(2, format!("Failed to write basis vector row: {e}"));

    let mut out = csv::Writer::from_writer(writer);
    let mut header = vec!["cadenceno".to_string()];
    header.extend(set.ids().iter().map(|id| format!("vector_{id}")));
    out.write_record(&header).map_err(row_err)?;

    for (row, cadence) in set.cadence().iter().enumerate() {
        let mut record = Vec::with_capacity(header.len());
        record.push(cadence.to_string());
        for &id in set.ids() {
            let v = set.value(id, row).unwrap_or(f64::NAN);
            record.push(v.to_string());
        }
        out.write_record(&record).map_err(row_err)?;
    }
    out.flush()
        .map_err(|e| AppError::new(2, format!("Failed to flush basis vector CSV: {e}")))?;
    Ok(())
}

/// Write several reports as one pretty JSON array.
pub fn write_reports_json(path: &Path, reports: &[CorrectionReport]) -> Result<(), AppError> {
    let file = create(path, "report JSON")?;
    serde_json::to_writer_pretty(file, reports)
        .map_err(|e| AppError::new(2, format!("Failed to write report JSON: {e}")))?;
    Ok(())
}

fn create(path: &Path, what: &str) -> Result<File, AppError> {
    File::create(path).map_err(|e| AppError::new(2, format!("Failed to create {what} '{}': {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correct::{CorrectionOptions, correct};
    use crate::domain::SAFE_MODE;
    use crate::fit::Selection;
    use crate::io::ingest::{read_basis_vectors, read_light_curve};

    #[test]
    fn corrected_csv_has_one_row_per_sample() {
        let set = BasisVectorSet::new(vec![1, 2, 3, 4], vec![(1, vec![1.0, 2.0, 3.0, 4.0])]).unwrap();
        let series = TimeSeries::new(
            vec![0.0, 1.0, 2.0, 3.0],
            vec![1, 2, 3, 4],
            vec![12.0, f64::NAN, 16.0, 99.0],
            vec![0.5; 4],
            vec![0, 0, 0, SAFE_MODE],
        )
        .unwrap();
        let mut options = CorrectionOptions::default();
        options.fit.add_constant_offset = false;
        let out = correct(&series, &set, &Selection::Explicit(vec![1]), &options).unwrap();

        let mut buf = Vec::new();
        write_corrected(&mut buf, &series, &out).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(
            lines[0],
            "time,cadenceno,raw_flux,corrected_flux,model,flux_err,quality,fitted"
        );
        assert_eq!(lines.len(), 5);
        assert!(lines[2].contains("NaN"));
        assert!(lines[2].ends_with("false"));
        assert!(lines[4].starts_with("3.0,4,99.0,99.0,0.0"));
        assert!(lines[4].ends_with(",false"));
        assert!(lines[1].ends_with(",true"));
    }

    #[test]
    fn written_inputs_read_back() {
        let set = BasisVectorSet::new(vec![5, 6], vec![(2, vec![0.25, f64::NAN]), (7, vec![-1.0, 1.0])]).unwrap();
        let mut buf = Vec::new();
        write_basis(&mut buf, &set).unwrap();
        let back = read_basis_vectors(buf.as_slice(), "s").unwrap().set;
        assert_eq!(back.ids(), &[2, 7]);
        assert_eq!(back.vector(7).unwrap(), &[-1.0, 1.0]);
        assert!(back.vector(2).unwrap()[1].is_nan());

        let series = TimeSeries::new(vec![1.0, 2.0], vec![5, 6], vec![3.0, f64::NAN], vec![0.1, 0.2], vec![0, 32])
            .unwrap();
        let mut buf = Vec::new();
        write_light_curve(&mut buf, &series).unwrap();
        let back = read_light_curve(buf.as_slice(), "lc").unwrap();
        assert!(back.row_errors.is_empty());
        assert_eq!(back.series.quality(), &[0, 32]);
        assert!(back.series.flux()[1].is_nan());
    }
}
