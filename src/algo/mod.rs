//! Estimation building blocks
//!
//! - stats: descriptive helpers
//! - ts_features: default per-series feature set
//! - projection: PCA-like coordinate transform (classical/robust)
//! - kde: multivariate Gaussian KDE and bandwidth selectors
//! - threshold: extreme-value density cutoff
//! - drift_detector: two-sample KDE equality test

pub mod drift_detector;
pub mod kde;
pub mod projection;
pub mod stats;
pub mod threshold;
pub mod ts_features;

pub use drift_detector::{DriftTestResult, kde_two_sample_test};
pub use kde::{DensityGrid, KernelDensity};
pub use projection::{Projected, ProjectionModel};
pub use threshold::{Execution, ThresholdCalibrator, ThresholdModel};
pub use ts_features::{FEATURE_NAMES, NUM_FEATURES, TsFeatures};
