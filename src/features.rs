//! Feature extraction contract
//!
//! A feature extractor compresses every series of a collection into a
//! fixed-length vector. Series that cannot be summarized (all missing, too
//! short, or yielding non-finite statistics) stay in the matrix as explicitly
//! excluded rows so that row `i` always refers to series `i`.

use crate::error::{OddError, Result};
use crate::series::TimeSeriesCollection;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// N × D feature matrix aligned with the series of a collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureMatrix {
    names: Vec<String>,
    /// Row-major values; excluded rows hold NaN
    values: Vec<f64>,
    rows: usize,
    excluded: BTreeSet<usize>,
}

impl FeatureMatrix {
    /// Build from one optional row per series; `None` or any non-finite
    /// value marks the series as excluded
    pub fn from_rows(names: Vec<String>, rows: Vec<Option<Vec<f64>>>) -> Result<Self> {
        let dim = names.len();
        if dim == 0 {
            return Err(OddError::InvalidInput("feature set is empty".into()));
        }

        let n = rows.len();
        let mut values = Vec::with_capacity(n * dim);
        let mut excluded = BTreeSet::new();

        for (i, row) in rows.into_iter().enumerate() {
            match row {
                Some(r) if r.len() != dim => {
                    return Err(OddError::InvalidInput(format!(
                        "series {} has {} features, expected {}",
                        i,
                        r.len(),
                        dim
                    )));
                }
                Some(r) if r.iter().all(|v| v.is_finite()) => values.extend(r),
                _ => {
                    excluded.insert(i);
                    values.extend(std::iter::repeat_n(f64::NAN, dim));
                }
            }
        }

        Ok(Self {
            names,
            values,
            rows: n,
            excluded,
        })
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Number of series (N)
    pub fn num_series(&self) -> usize {
        self.rows
    }

    /// Number of features (D)
    pub fn dim(&self) -> usize {
        self.names.len()
    }

    pub fn row(&self, i: usize) -> &[f64] {
        let d = self.dim();
        &self.values[i * d..(i + 1) * d]
    }

    pub fn is_excluded(&self, i: usize) -> bool {
        self.excluded.contains(&i)
    }

    pub fn excluded(&self) -> &BTreeSet<usize> {
        &self.excluded
    }

    /// Indices of usable series, ascending
    pub fn included(&self) -> Vec<usize> {
        (0..self.rows).filter(|i| !self.excluded.contains(i)).collect()
    }

    pub fn included_count(&self) -> usize {
        self.rows - self.excluded.len()
    }

    /// Dense matrix of the given rows (in the given order)
    pub fn to_matrix(&self, series: &[usize]) -> DMatrix<f64> {
        let d = self.dim();
        DMatrix::from_fn(series.len(), d, |r, c| self.values[series[r] * d + c])
    }

    /// Sub-matrix of the given series, re-indexed from 0
    pub fn select(&self, series: &[usize]) -> Self {
        let d = self.dim();
        let mut values = Vec::with_capacity(series.len() * d);
        let mut excluded = BTreeSet::new();
        for (new_idx, &i) in series.iter().enumerate() {
            values.extend_from_slice(self.row(i));
            if self.is_excluded(i) {
                excluded.insert(new_idx);
            }
        }
        Self {
            names: self.names.clone(),
            values,
            rows: series.len(),
            excluded,
        }
    }
}

/// Per-series feature extractor
///
/// Implementations must be deterministic for fixed input and parameters and
/// must report unusable series as excluded rows rather than failing.
pub trait FeatureExtractor: Send + Sync {
    /// Feature names, one per column (the length fixes D)
    fn names(&self) -> Vec<String>;

    fn extract(&self, collection: &TimeSeriesCollection) -> Result<FeatureMatrix>;

    fn dim(&self) -> usize {
        self.names().len()
    }
}
