//! odd-streams: outlier detection for large collections of data streams
//!
//! Flags series that behave unlike a typical training sample, window by
//! window, without labeled anomalies.
//!
//! ```text
//!  training ──► FeatureExtractor ──► ProjectionModel::fit ──► ThresholdCalibrator
//!                                          │                        │
//!                                          └──── ModelState (Arc) ◄─┘
//!                                                     │
//!  stream ──► window ──► features ──► project ──► density < threshold ──► OutlierReport
//!                                                     │
//!                                   (concept drift) two-sample test ──► refit ──► DriftDiagnostic
//! ```
//!
//! - `series`: collections and window plans
//! - `features`: extractor contract and feature matrices
//! - `algo`: projection, KDE, threshold calibration, drift test
//! - `engine`: the streaming evaluator
//! - `fleet`: independent streams on worker threads
//! - `checkpoint`: model snapshots
//! - `simulation`: seeded synthetic scenarios

pub mod algo;
pub mod checkpoint;
pub mod config;
pub mod engine;
pub mod error;
pub mod features;
pub mod fleet;
pub mod report;
pub mod series;
pub mod simulation;

pub use checkpoint::{ModelSnapshot, SNAPSHOT_VERSION};
pub use config::DetectorConfig;
pub use engine::{ModelState, Phase, StopSignal, StreamRun, StreamingEvaluator, WindowOutcome};
pub use error::{ErrorKind, OddError, Result};
pub use features::{FeatureExtractor, FeatureMatrix};
pub use fleet::{FleetEvent, FleetHandle, StreamFleet, StreamJob};
pub use report::{DriftDiagnostic, OutlierReport, WindowStatus};
pub use series::{MissingMarker, TimeSeriesCollection, Window, WindowPlan};
