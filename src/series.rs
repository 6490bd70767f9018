//! Time-series collections and stream windowing
//!
//! A collection is a T × N matrix: T time steps (rows) of N concurrently
//! observed series (columns). Missing values are marked either by NaN or by
//! a caller-chosen sentinel.

use crate::error::{OddError, Result};
use serde::{Deserialize, Serialize};

/// How missing observations are encoded
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub enum MissingMarker {
    /// Any non-finite value is missing
    #[default]
    NaN,
    /// A specific value is missing (non-finite values are missing as well)
    Sentinel(f64),
}

impl MissingMarker {
    #[inline]
    pub fn is_missing(&self, value: f64) -> bool {
        match self {
            Self::NaN => !value.is_finite(),
            Self::Sentinel(s) => !value.is_finite() || value == *s,
        }
    }
}

/// Immutable T × N matrix stored row-major
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesCollection {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
    missing: MissingMarker,
}

impl TimeSeriesCollection {
    /// Build from row-major data of length `rows * cols`
    pub fn new(rows: usize, cols: usize, data: Vec<f64>) -> Result<Self> {
        if cols == 0 {
            return Err(OddError::InvalidInput("collection has no series".into()));
        }
        if data.len() != rows * cols {
            return Err(OddError::InvalidInput(format!(
                "expected {} values for {}x{}, got {}",
                rows * cols,
                rows,
                cols,
                data.len()
            )));
        }
        Ok(Self {
            rows,
            cols,
            data,
            missing: MissingMarker::NaN,
        })
    }

    /// Build from a list of time steps, each holding one value per series
    pub fn from_rows(rows: Vec<Vec<f64>>) -> Result<Self> {
        let cols = rows.first().map(|r| r.len()).unwrap_or(0);
        if let Some((t, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != cols) {
            return Err(OddError::InvalidInput(format!(
                "row {} has {} values, expected {}",
                t,
                row.len(),
                cols
            )));
        }
        let n = rows.len();
        Self::new(n, cols, rows.into_iter().flatten().collect())
    }

    /// Like `from_rows`, with `None` as the missing marker
    pub fn from_optional_rows(rows: Vec<Vec<Option<f64>>>) -> Result<Self> {
        Self::from_rows(
            rows.into_iter()
                .map(|r| r.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect())
                .collect(),
        )
    }

    /// Build from one vector per series (all of equal length)
    pub fn from_columns(columns: &[Vec<f64>]) -> Result<Self> {
        let rows = columns.first().map(|c| c.len()).unwrap_or(0);
        if columns.iter().any(|c| c.len() != rows) {
            return Err(OddError::InvalidInput("series have unequal lengths".into()));
        }
        let cols = columns.len();
        let mut data = Vec::with_capacity(rows * cols);
        for t in 0..rows {
            data.extend(columns.iter().map(|c| c[t]));
        }
        Self::new(rows, cols, data)
    }

    pub fn with_missing(mut self, missing: MissingMarker) -> Self {
        self.missing = missing;
        self
    }

    /// Number of time steps (T)
    pub fn len(&self) -> usize {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    /// Number of series (N)
    pub fn num_series(&self) -> usize {
        self.cols
    }

    pub fn missing_marker(&self) -> MissingMarker {
        self.missing
    }

    /// Observation at time `t` for series `i`, `None` when missing
    pub fn value(&self, t: usize, i: usize) -> Option<f64> {
        let v = self.data[t * self.cols + i];
        if self.missing.is_missing(v) { None } else { Some(v) }
    }

    /// Observed (non-missing) values of series `i`, in time order
    pub fn observed(&self, i: usize) -> Vec<f64> {
        (0..self.rows).filter_map(|t| self.value(t, i)).collect()
    }

    /// Copy with every value replaced by `f(t, i, value)`
    pub fn map_values<F: Fn(usize, usize, f64) -> f64>(&self, f: F) -> Self {
        let data = self
            .data
            .iter()
            .enumerate()
            .map(|(idx, &v)| f(idx / self.cols, idx % self.cols, v))
            .collect();
        Self {
            rows: self.rows,
            cols: self.cols,
            data,
            missing: self.missing,
        }
    }

    /// Copy of rows `[start, end)`; keeps the missing marker
    pub fn slice_rows(&self, start: usize, end: usize) -> Result<Self> {
        if start > end || end > self.rows {
            return Err(OddError::InvalidInput(format!(
                "row range {}..{} outside 0..{}",
                start, end, self.rows
            )));
        }
        Ok(Self {
            rows: end - start,
            cols: self.cols,
            data: self.data[start * self.cols..end * self.cols].to_vec(),
            missing: self.missing,
        })
    }
}

/// A contiguous `[start, end)` row range of the stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub index: usize,
    pub start: usize,
    pub end: usize,
}

impl Window {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }
}

/// Number of full windows of `length` rows, advancing by `skip`, over `total` rows
pub fn window_count(total: usize, length: usize, skip: usize) -> usize {
    if length == 0 || skip == 0 || total < length {
        0
    } else {
        (total - length) / skip + 1
    }
}

/// Iterator over full windows; a trailing partial window is never produced
#[derive(Debug, Clone)]
pub struct WindowPlan {
    total: usize,
    length: usize,
    skip: usize,
    next_index: usize,
}

impl WindowPlan {
    pub fn new(total: usize, length: usize, skip: usize) -> Self {
        Self {
            total,
            length,
            skip,
            next_index: 0,
        }
    }

    pub fn total_windows(&self) -> usize {
        window_count(self.total, self.length, self.skip)
    }
}

impl Iterator for WindowPlan {
    type Item = Window;

    fn next(&mut self) -> Option<Window> {
        if self.length == 0 || self.skip == 0 {
            return None;
        }
        let start = self.next_index.checked_mul(self.skip)?;
        let end = start.checked_add(self.length)?;
        if end > self.total {
            return None;
        }
        let window = Window {
            index: self.next_index,
            start,
            end,
        };
        self.next_index += 1;
        Some(window)
    }
}
