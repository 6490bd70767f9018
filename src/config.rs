//! Detector configuration
//!
//! All knobs are validated once, when the evaluator initializes. Window
//! length and stride default to values derived from the data, so they are
//! optional here and resolved against the training/stream lengths.

use crate::error::{OddError, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Target false-positive rate for the density threshold, in (0, 1)
    pub p_rate: f64,
    /// Monte-Carlo trials used to calibrate the threshold
    pub trials: usize,
    /// Rows per window (defaults to the training length)
    pub window_length: Option<usize>,
    /// Stride between window starts (defaults to `window_length`)
    pub window_skip: Option<usize>,
    /// Re-fit the model when the stream distribution drifts
    pub concept_drift: bool,
    /// Significance level of the drift test, in (0, 1)
    pub cd_alpha: f64,
    /// Use robust location/scale and covariance when fitting the projection
    pub robust: bool,
    /// Number of projected dimensions
    pub k: usize,
    /// Base seed for all Monte-Carlo draws
    pub seed: u64,
    /// Width of the rolling/tiled statistics in the default feature set
    pub feature_width: usize,
    /// Outlier fraction at or above which the whole window is used for the
    /// drift test (a large outlier share suggests a stale reference)
    pub majority_fraction: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            p_rate: 0.001,
            trials: 500,
            window_length: None,
            window_skip: None,
            concept_drift: false,
            cd_alpha: 0.05,
            robust: true,
            k: 2,
            seed: 0,
            feature_width: 10,
            majority_fraction: 0.5,
        }
    }
}

impl DetectorConfig {
    pub fn with_drift(mut self, cd_alpha: f64) -> Self {
        self.concept_drift = true;
        self.cd_alpha = cd_alpha;
        self
    }

    pub fn with_windows(mut self, length: usize, skip: usize) -> Self {
        self.window_length = Some(length);
        self.window_skip = Some(skip);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Parse a JSON config; missing fields take their defaults
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)
            .map_err(|e| OddError::InvalidConfig(format!("malformed config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check every parameter that does not depend on the data
    pub fn validate(&self) -> Result<()> {
        if !(self.p_rate > 0.0 && self.p_rate < 1.0) {
            return Err(OddError::InvalidConfig(format!(
                "p_rate must lie in (0, 1), got {}",
                self.p_rate
            )));
        }
        if self.trials == 0 {
            return Err(OddError::InvalidConfig("trials must be positive".into()));
        }
        if !(self.cd_alpha > 0.0 && self.cd_alpha < 1.0) {
            return Err(OddError::InvalidConfig(format!(
                "cd_alpha must lie in (0, 1), got {}",
                self.cd_alpha
            )));
        }
        if self.k < 2 {
            return Err(OddError::InvalidConfig(format!(
                "k must be at least 2, got {}",
                self.k
            )));
        }
        if self.window_length == Some(0) {
            return Err(OddError::InvalidConfig("window_length must be positive".into()));
        }
        if self.window_skip == Some(0) {
            return Err(OddError::InvalidConfig("window_skip must be positive".into()));
        }
        if self.feature_width < 2 {
            return Err(OddError::InvalidConfig(
                "feature_width must be at least 2".into(),
            ));
        }
        if !(self.majority_fraction > 0.0 && self.majority_fraction <= 1.0) {
            return Err(OddError::InvalidConfig(format!(
                "majority_fraction must lie in (0, 1], got {}",
                self.majority_fraction
            )));
        }
        Ok(())
    }

    /// Window length and stride resolved against the data lengths
    pub fn resolve_windows(&self, training_len: usize, stream_len: usize) -> Result<(usize, usize)> {
        let length = self.window_length.unwrap_or(training_len);
        let skip = self.window_skip.unwrap_or(length);
        if length == 0 || skip == 0 {
            return Err(OddError::InvalidConfig(
                "window length and stride must be positive".into(),
            ));
        }
        if length > stream_len {
            return Err(OddError::InvalidConfig(format!(
                "window_length {} exceeds stream length {}",
                length, stream_len
            )));
        }
        Ok((length, skip))
    }
}
