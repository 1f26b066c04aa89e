//! Shared domain types.
//!
//! `TimeSeries` and `BasisVectorSet` are plain owned containers validated at
//! construction. Neither exposes a mutation API: correction always produces a
//! new `TimeSeries`, and a `BasisVectorSet` is shared read-only across targets.

use std::collections::HashMap;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::{CbvError, CbvResult};

/// A single target's light curve.
///
/// All columns are index-aligned. Flux may be NaN (masked); such samples are
/// skipped by the fit but keep their position in every output.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeries {
    label: Option<String>,
    time: Vec<f64>,
    cadence: Vec<i64>,
    flux: Vec<f64>,
    flux_err: Vec<f64>,
    quality: Vec<u32>,
}

impl TimeSeries {
    /// Build a series, validating lengths, time ordering and uncertainties.
    pub fn new(
        time: Vec<f64>,
        cadence: Vec<i64>,
        flux: Vec<f64>,
        flux_err: Vec<f64>,
        quality: Vec<u32>,
    ) -> CbvResult<Self> {
        let n = time.len();
        for (name, len) in [
            ("cadence", cadence.len()),
            ("flux", flux.len()),
            ("flux_err", flux_err.len()),
            ("quality", quality.len()),
        ] {
            if len != n {
                return Err(CbvError::InvalidInput(format!(
                    "{name} has {len} samples but time has {n}"
                )));
            }
        }

        if let Some(i) = time.windows(2).position(|w| w[1] < w[0]) {
            return Err(CbvError::InvalidInput(format!(
                "timestamps decrease at index {} ({} -> {})",
                i + 1,
                time[i],
                time[i + 1]
            )));
        }

        // NaN uncertainties are allowed (they travel with masked flux); negative ones are not.
        if let Some(i) = flux_err.iter().position(|e| *e < 0.0) {
            return Err(CbvError::InvalidInput(format!(
                "negative flux uncertainty {} at index {i}",
                flux_err[i]
            )));
        }

        Ok(Self {
            label: None,
            time,
            cadence,
            flux,
            flux_err,
            quality,
        })
    }

    /// Convenience constructor for series without uncertainties or flags.
    pub fn from_flux(time: Vec<f64>, cadence: Vec<i64>, flux: Vec<f64>) -> CbvResult<Self> {
        let n = time.len();
        Self::new(time, cadence, flux, vec![0.0; n], vec![0; n])
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// A copy of this series with the flux column replaced.
    ///
    /// Time, cadence, uncertainty and quality columns are carried over unchanged.
    pub fn with_flux(&self, flux: Vec<f64>) -> CbvResult<Self> {
        if flux.len() != self.len() {
            return Err(CbvError::InvalidInput(format!(
                "replacement flux has {} samples, series has {}",
                flux.len(),
                self.len()
            )));
        }
        Ok(Self {
            flux,
            ..self.clone()
        })
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    pub fn time(&self) -> &[f64] {
        &self.time
    }

    pub fn cadence(&self) -> &[i64] {
        &self.cadence
    }

    pub fn flux(&self) -> &[f64] {
        &self.flux
    }

    pub fn flux_err(&self) -> &[f64] {
        &self.flux_err
    }

    pub fn quality(&self) -> &[u32] {
        &self.quality
    }
}

/// Cotrending basis vectors for one observing segment.
///
/// Vectors are stored in rank order (the order IDs were supplied), which is the
/// order automatic selection walks them.
#[derive(Debug, Clone)]
pub struct BasisVectorSet {
    segment: Option<String>,
    cadence: Vec<i64>,
    ids: Vec<u32>,
    vectors: Vec<Vec<f64>>,
    row_by_cadence: HashMap<i64, usize>,
    column_by_id: HashMap<u32, usize>,
}

impl BasisVectorSet {
    /// Build a set from a cadence index and `(id, vector)` pairs in rank order.
    pub fn new(cadence: Vec<i64>, vectors: Vec<(u32, Vec<f64>)>) -> CbvResult<Self> {
        let mut row_by_cadence = HashMap::with_capacity(cadence.len());
        for (row, &c) in cadence.iter().enumerate() {
            if row_by_cadence.insert(c, row).is_some() {
                return Err(CbvError::InvalidInput(format!(
                    "duplicate cadence number {c} in basis vector index"
                )));
            }
        }

        let mut ids = Vec::with_capacity(vectors.len());
        let mut columns = Vec::with_capacity(vectors.len());
        let mut column_by_id = HashMap::with_capacity(vectors.len());
        for (id, values) in vectors {
            if values.len() != cadence.len() {
                return Err(CbvError::InvalidInput(format!(
                    "basis vector {id} has {} values but the cadence index has {}",
                    values.len(),
                    cadence.len()
                )));
            }
            if column_by_id.insert(id, columns.len()).is_some() {
                return Err(CbvError::InvalidInput(format!("duplicate basis vector id {id}")));
            }
            ids.push(id);
            columns.push(values);
        }

        Ok(Self {
            segment: None,
            cadence,
            ids,
            vectors: columns,
            row_by_cadence,
            column_by_id,
        })
    }

    pub fn with_segment(mut self, segment: impl Into<String>) -> Self {
        self.segment = Some(segment.into());
        self
    }

    pub fn segment(&self) -> Option<&str> {
        self.segment.as_deref()
    }

    /// Number of cadences in the index.
    pub fn len(&self) -> usize {
        self.cadence.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cadence.is_empty()
    }

    pub fn cadence(&self) -> &[i64] {
        &self.cadence
    }

    /// Basis-vector IDs in rank order.
    pub fn ids(&self) -> &[u32] {
        &self.ids
    }

    pub fn contains(&self, id: u32) -> bool {
        self.column_by_id.contains_key(&id)
    }

    pub fn vector(&self, id: u32) -> Option<&[f64]> {
        self.column_by_id.get(&id).map(|&col| self.vectors[col].as_slice())
    }

    /// Row of the cadence index holding `cadence`, if present.
    pub fn row_of(&self, cadence: i64) -> Option<usize> {
        self.row_by_cadence.get(&cadence).copied()
    }

    /// Value of vector `id` at index row `row`.
    pub fn value(&self, id: u32, row: usize) -> Option<f64> {
        self.vector(id).and_then(|v| v.get(row).copied())
    }
}

/// How flux is scaled before fitting.
///
/// `Median` fits relative flux (`flux / median - 1`) and converts the model back
/// to flux units afterwards, which is how the Kepler cotrending tools work with
/// unit-normalized basis vectors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Normalization {
    #[default]
    None,
    Median,
}
