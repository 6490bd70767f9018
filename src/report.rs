//! Per-window output records
//!
//! Every full window of the stream yields exactly one `OutlierReport`,
//! including windows whose evaluation only partly succeeded. Windows where
//! drift adaptation replaced the model additionally yield a
//! `DriftDiagnostic`.

use crate::error::{OddError, Result};
use crate::series::Window;
use serde::{Deserialize, Serialize};

/// Whether a window's outlier set can be trusted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum WindowStatus {
    #[default]
    Ok,
    /// Best-effort result; the reason names the failed step
    Unreliable(String),
}

impl WindowStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutlierReport {
    pub window_index: usize,
    /// First row of the window (inclusive)
    pub window_start: usize,
    /// End row of the window (exclusive)
    pub window_end: usize,
    /// Series whose density fell below the threshold, ascending
    pub outlier_series: Vec<usize>,
    /// Series the feature extractor could not summarize, ascending
    pub excluded_series: Vec<usize>,
    pub status: WindowStatus,
    /// Model generation used to evaluate this window
    pub generation: u64,
    /// Threshold in force for this window
    pub threshold: f64,
}

impl OutlierReport {
    pub fn new(window: &Window, generation: u64, threshold: f64) -> Self {
        Self {
            window_index: window.index,
            window_start: window.start,
            window_end: window.end,
            outlier_series: Vec::new(),
            excluded_series: Vec::new(),
            status: WindowStatus::Ok,
            generation,
            threshold,
        }
    }

    pub fn mark_unreliable(&mut self, reason: impl Into<String>) {
        self.status = WindowStatus::Unreliable(reason.into());
    }

    pub fn has_outliers(&self) -> bool {
        !self.outlier_series.is_empty()
    }

    /// One compact JSON object, no trailing newline
    pub fn to_json_line(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| OddError::InvalidInput(e.to_string()))
    }
}

/// Record of a model replacement triggered by drift
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DriftDiagnostic {
    pub window_index: usize,
    /// p-value of the two-sample test that triggered the refit
    pub p_value: f64,
    /// Threshold of the replacement model
    pub updated_threshold: f64,
    /// Generation of the replacement model
    pub generation: u64,
}
