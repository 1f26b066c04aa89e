//! CSV ingest for light curves and basis-vector sets.
//!
//! Design goals:
//! - **Lenient headers**: case-insensitive, BOM-tolerant, a few common aliases
//!   (`sap_flux`, `sap_quality`, ...)
//! - **Row-level validation**: skip bad rows, but report what happened
//! - **No fitting logic here**: we only build domain types
//!
//! Light curve schema: `time, cadenceno, flux[, flux_err][, quality]`.
//! An empty or `nan` flux is a masked sample, not an error.
//!
//! Basis-vector schema: `cadenceno` plus one column per vector named
//! `vector_<id>` or `cbv_<id>`. Rank order is numeric ID order.

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use csv::StringRecord;

use crate::domain::{BasisVectorSet, TimeSeries};
use crate::error::AppError;

const TIME_COLUMNS: &[&str] = &["time", "bjd", "btjd"];
const CADENCE_COLUMNS: &[&str] = &["cadenceno", "cadence", "cadence_number"];
const FLUX_COLUMNS: &[&str] = &["flux", "sap_flux"];
const FLUX_ERR_COLUMNS: &[&str] = &["flux_err", "sap_flux_err", "flux_error"];
const QUALITY_COLUMNS: &[&str] = &["quality", "sap_quality"];

/// A row-level error encountered during ingest.
#[derive(Debug, Clone, PartialEq)]
pub struct RowError {
    pub line: usize,
    pub message: String,
}

/// Ingested light curve plus what was skipped.
#[derive(Debug, Clone)]
pub struct IngestedLightCurve {
    pub series: TimeSeries,
    pub row_errors: Vec<RowError>,
    pub rows_read: usize,
}

/// Ingested basis vectors plus what was skipped.
#[derive(Debug, Clone)]
pub struct IngestedBasis {
    pub set: BasisVectorSet,
    pub row_errors: Vec<RowError>,
    pub rows_read: usize,
}

/// Load a light curve CSV from disk; the file stem becomes the series label.
pub fn load_light_curve(path: &Path) -> Result<IngestedLightCurve, AppError> {
    let file = File::open(path).map_err(|e| {
        AppError::new(2, format!("Failed to open light curve '{}': {e}", path.display()))
    })?;
    let label = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    read_light_curve(file, &label)
}

/// Parse a light curve CSV from any reader.
pub fn read_light_curve<R: Read>(reader: R, label: &str) -> Result<IngestedLightCurve, AppError> {
    let mut reader = csv_reader(reader);
    let headers = reader
        .headers()
        .map_err(|e| AppError::new(2, format!("Failed to read light curve headers: {e}")))?
        .clone();
    let header_map = build_header_map(&headers);

    let time_col = require_column(&header_map, TIME_COLUMNS)?;
    let cadence_col = require_column(&header_map, CADENCE_COLUMNS)?;
    let flux_col = require_column(&header_map, FLUX_COLUMNS)?;
    let flux_err_col = find_column(&header_map, FLUX_ERR_COLUMNS);
    let quality_col = find_column(&header_map, QUALITY_COLUMNS);

    let mut time = Vec::new();
    let mut cadence = Vec::new();
    let mut flux = Vec::new();
    let mut flux_err = Vec::new();
    let mut quality = Vec::new();
    let mut row_errors = Vec::new();
    let mut rows_read = 0usize;

    for (idx, result) in reader.records().enumerate() {
        // +2: header is line 1, records are 1-based.
        let line = idx + 2;
        rows_read += 1;

        let record = match result {
            Ok(r) => r,
            Err(e) => {
                row_errors.push(RowError {
                    line,
                    message: format!("CSV parse error: {e}"),
                });
                continue;
            }
        };

        let parsed = (|| -> Result<(f64, i64, f64, f64, u32), String> {
            let t = parse_required_f64(&record, time_col, "time")?;
            let c = parse_cadence(&record, cadence_col)?;
            let f = parse_optional_f64(&record, Some(flux_col), "flux")?.unwrap_or(f64::NAN);
            let e = parse_optional_f64(&record, flux_err_col, "flux_err")?.unwrap_or(f64::NAN);
            let q = parse_quality(&record, quality_col)?;
            Ok((t, c, f, e, q))
        })();

        match parsed {
            Ok((t, c, f, e, q)) => {
                time.push(t);
                cadence.push(c);
                flux.push(f);
                flux_err.push(e);
                quality.push(q);
            }
            Err(message) => row_errors.push(RowError { line, message }),
        }
    }

    if time.is_empty() {
        return Err(AppError::new(3, format!("Light curve '{label}' has no valid rows.")));
    }

    let series = TimeSeries::new(time, cadence, flux, flux_err, quality)
        .map_err(|e| AppError::new(3, format!("Light curve '{label}': {e}")))?
        .with_label(label);

    Ok(IngestedLightCurve {
        series,
        row_errors,
        rows_read,
    })
}

/// Load a basis-vector CSV from disk; the file stem becomes the segment label.
pub fn load_basis_vectors(path: &Path) -> Result<IngestedBasis, AppError> {
    let file = File::open(path).map_err(|e| {
        AppError::new(2, format!("Failed to open basis vectors '{}': {e}", path.display()))
    })?;
    let segment = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    read_basis_vectors(file, &segment)
}

/// Parse a basis-vector CSV from any reader.
pub fn read_basis_vectors<R: Read>(reader: R, segment: &str) -> Result<IngestedBasis, AppError> {
    let mut reader = csv_reader(reader);
    let headers = reader
        .headers()
        .map_err(|e| AppError::new(2, format!("Failed to read basis vector headers: {e}")))?
        .clone();
    let header_map = build_header_map(&headers);
    let cadence_col = require_column(&header_map, CADENCE_COLUMNS)?;

    // (id, column) sorted by id = rank order.
    let mut vector_cols: Vec<(u32, usize)> = header_map
        .iter()
        .filter_map(|(name, &col)| parse_vector_id(name).map(|id| (id, col)))
        .collect();
    vector_cols.sort_unstable();
    if vector_cols.is_empty() {
        return Err(AppError::new(
            2,
            "Basis vector CSV has no `vector_<id>` / `cbv_<id>` columns.",
        ));
    }
    if let Some(w) = vector_cols.windows(2).find(|w| w[0].0 == w[1].0) {
        return Err(AppError::new(
            2,
            format!("Basis vector CSV defines vector {} twice.", w[0].0),
        ));
    }

    let mut cadence = Vec::new();
    let mut columns: Vec<Vec<f64>> = vec![Vec::new(); vector_cols.len()];
    let mut row_errors = Vec::new();
    let mut rows_read = 0usize;

    for (idx, result) in reader.records().enumerate() {
        let line = idx + 2;
        rows_read += 1;

        let record = match result {
            Ok(r) => r,
            Err(e) => {
                row_errors.push(RowError {
                    line,
                    message: format!("CSV parse error: {e}"),
                });
                continue;
            }
        };

        let parsed = parse_cadence(&record, cadence_col).and_then(|c| {
            let values = vector_cols
                .iter()
                .map(|&(id, col)| {
                    parse_optional_f64(&record, Some(col), &format!("vector_{id}"))
                        .map(|v| v.unwrap_or(f64::NAN))
                })
                .collect::<Result<Vec<f64>, String>>()?;
            Ok((c, values))
        });

        match parsed {
            Ok((c, values)) => {
                cadence.push(c);
                for (column, v) in columns.iter_mut().zip(values) {
                    column.push(v);
                }
            }
            Err(message) => row_errors.push(RowError { line, message }),
        }
    }

    if cadence.is_empty() {
        return Err(AppError::new(3, format!("Basis vectors '{segment}' have no valid rows.")));
    }

    let vectors = vector_cols.iter().map(|&(id, _)| id).zip(columns).collect();
    let set = BasisVectorSet::new(cadence, vectors)
        .map_err(|e| AppError::new(3, format!("Basis vectors '{segment}': {e}")))?
        .with_segment(segment);

    Ok(IngestedBasis {
        set,
        row_errors,
        rows_read,
    })
}

fn csv_reader<R: Read>(reader: R) -> csv::Reader<R> {
    csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .comment(Some(b'#'))
        .from_reader(reader)
}

fn build_header_map(headers: &StringRecord) -> HashMap<String, usize> {
    headers
        .iter()
        .enumerate()
        .map(|(idx, name)| (normalize_header_name(name), idx))
        .collect()
}

fn normalize_header_name(name: &str) -> String {
    // Spreadsheet exports sometimes prefix the first header with a UTF-8 BOM.
    name.trim().trim_start_matches('\u{feff}').to_ascii_lowercase()
}

fn find_column(header_map: &HashMap<String, usize>, aliases: &[&str]) -> Option<usize> {
    aliases.iter().find_map(|a| header_map.get(*a).copied())
}

fn require_column(header_map: &HashMap<String, usize>, aliases: &[&str]) -> Result<usize, AppError> {
    find_column(header_map, aliases).ok_or_else(|| {
        AppError::new(
            2,
            format!("Missing required column (expected one of: {}).", aliases.join(", ")),
        )
    })
}

/// `vector_3` / `cbv_3` / `cbv3` -> `3`.
fn parse_vector_id(name: &str) -> Option<u32> {
    let rest = name
        .strip_prefix("vector")
        .or_else(|| name.strip_prefix("cbv"))?;
    rest.trim_start_matches('_').parse().ok()
}

fn field<'a>(record: &'a StringRecord, col: usize) -> &'a str {
    record.get(col).unwrap_or("")
}

fn parse_required_f64(record: &StringRecord, col: usize, name: &str) -> Result<f64, String> {
    match parse_optional_f64(record, Some(col), name)? {
        Some(v) if v.is_finite() => Ok(v),
        Some(v) => Err(format!("{name} must be finite, got {v}")),
        None => Err(format!("missing {name}")),
    }
}

fn parse_optional_f64(record: &StringRecord, col: Option<usize>, name: &str) -> Result<Option<f64>, String> {
    let Some(col) = col else {
        return Ok(None);
    };
    let raw = field(record, col);
    if raw.is_empty() {
        return Ok(None);
    }
    raw.parse::<f64>()
        .map(Some)
        .map_err(|_| format!("invalid {name} '{raw}'"))
}

fn parse_cadence(record: &StringRecord, col: usize) -> Result<i64, String> {
    let raw = field(record, col);
    if raw.is_empty() {
        return Err("missing cadence number".to_string());
    }
    raw.parse::<i64>()
        .map_err(|_| format!("invalid cadence number '{raw}'"))
}

fn parse_quality(record: &StringRecord, col: Option<usize>) -> Result<u32, String> {
    let Some(col) = col else {
        return Ok(0);
    };
    let raw = field(record, col);
    if raw.is_empty() {
        return Ok(0);
    }
    raw.parse::<u32>()
        .map_err(|_| format!("invalid quality flags '{raw}'"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_light_curve_with_masked_flux_and_bad_rows() {
        let csv = "\u{feff}TIME,CADENCENO,SAP_FLUX,SAP_FLUX_ERR,SAP_QUALITY\n\
                   100.0,1,10.5,0.1,0\n\
                   100.1,2,,,4\n\
                   100.2,x,11.0,0.1,0\n\
                   100.3,4,nan,0.1,0\n";
        let ingested = read_light_curve(csv.as_bytes(), "kic").unwrap();
        let s = &ingested.series;

        assert_eq!(ingested.rows_read, 4);
        assert_eq!(ingested.row_errors.len(), 1);
        assert_eq!(ingested.row_errors[0].line, 4);
        assert_eq!(s.len(), 3);
        assert_eq!(s.cadence(), &[1, 2, 4]);
        assert_eq!(s.flux()[0], 10.5);
        assert!(s.flux()[1].is_nan());
        assert!(s.flux()[2].is_nan());
        assert_eq!(s.quality(), &[0, 4, 0]);
        assert_eq!(s.label(), Some("kic"));
    }

    #[test]
    fn light_curve_requires_core_columns() {
        let err = read_light_curve("time,flux\n1,2\n".as_bytes(), "x").unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert!(err.to_string().contains("cadenceno"));
    }

    #[test]
    fn reads_basis_vectors_in_id_order() {
        let csv = "cadenceno,cbv_2,vector_1,notes\n\
                   10,0.5,-0.1,a\n\
                   11,,0.1,b\n";
        let ingested = read_basis_vectors(csv.as_bytes(), "q2").unwrap();
        let set = &ingested.set;
        assert_eq!(set.ids(), &[1, 2]);
        assert_eq!(set.cadence(), &[10, 11]);
        assert_eq!(set.vector(1).unwrap(), &[-0.1, 0.1]);
        assert!(set.vector(2).unwrap()[1].is_nan());
        assert_eq!(set.segment(), Some("q2"));
    }

    #[test]
    fn basis_vectors_need_vector_columns() {
        let err = read_basis_vectors("cadenceno,other\n1,2\n".as_bytes(), "q").unwrap_err();
        assert!(err.to_string().contains("vector_<id>"));
    }

    #[test]
    fn vector_ids_parse_from_common_names() {
        assert_eq!(parse_vector_id("vector_12"), Some(12));
        assert_eq!(parse_vector_id("cbv_3"), Some(3));
        assert_eq!(parse_vector_id("cbv3"), Some(3));
        assert_eq!(parse_vector_id("cadenceno"), None);
        assert_eq!(parse_vector_id("vector"), None);
    }
}
