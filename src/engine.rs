//! Streaming Evaluator
//!
//! Windowed outlier detection over a live stream:
//! 1. Initializing: features of the training collection → projection fit →
//!    threshold calibration, producing generation 0 of the model
//! 2. Streaming: every full window is summarized, projected with the current
//!    model and scored against the reference density
//! 3. Adapting (optional): a two-sample test compares the window with the
//!    reference; on rejection the model is refit on the window and replaced
//!
//! The model is held in an `Arc<ModelState>` that is swapped between windows,
//! so a window is always scored by one consistent projection/threshold pair.

use crate::algo::drift_detector::kde_two_sample_test;
use crate::algo::projection::{Projected, ProjectionModel};
use crate::algo::threshold::{ThresholdCalibrator, ThresholdModel, trial_seed};
use crate::algo::ts_features::TsFeatures;
use crate::checkpoint::ModelSnapshot;
use crate::config::DetectorConfig;
use crate::error::{OddError, Result};
use crate::features::{FeatureExtractor, FeatureMatrix};
use crate::report::{DriftDiagnostic, OutlierReport, WindowStatus};
use crate::series::{TimeSeriesCollection, Window, WindowPlan};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

// ============================================================================
// MODEL STATE
// ============================================================================

/// Projection and threshold fitted on the same reference set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelState {
    pub projection: ProjectionModel,
    pub threshold: ThresholdModel,
    /// 0 for the training fit, incremented by every drift refit
    pub generation: u64,
}

impl ModelState {
    /// Fit both stages on the usable rows of `features`
    pub fn fit(
        features: &FeatureMatrix,
        config: &DetectorConfig,
        seed: u64,
        generation: u64,
    ) -> Result<Self> {
        let projection = ProjectionModel::fit(features, config.robust, config.k)?;
        let threshold = ThresholdCalibrator::new(config.p_rate, config.trials, seed)
            .calibrate(&projection.reference_coords)?;
        Ok(Self {
            projection,
            threshold,
            generation,
        })
    }

    /// Seed used to calibrate a given generation
    pub fn generation_seed(base: u64, generation: u64) -> u64 {
        if generation == 0 {
            base
        } else {
            trial_seed(base, u64::MAX - generation)
        }
    }
}

/// Lifecycle of an evaluator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Initializing,
    Streaming,
    Adapting,
    Done,
    /// Stopped on request; emitted reports remain valid
    Cancelled,
}

/// Cooperative cancellation flag, checked before every window
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Everything a run produced, in window order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamRun {
    pub reports: Vec<OutlierReport>,
    /// One entry per report; `Some` where drift replaced the model
    pub diagnostics: Vec<Option<DriftDiagnostic>>,
    pub cancelled: bool,
}

impl StreamRun {
    pub fn adaptations(&self) -> usize {
        self.diagnostics.iter().filter(|d| d.is_some()).count()
    }
}

/// Result of advancing the evaluator by one window
#[derive(Debug, Clone)]
pub struct WindowOutcome {
    pub report: OutlierReport,
    pub diagnostic: Option<DriftDiagnostic>,
}

/// Intermediate products of scoring a window, reused by adaptation
struct WindowScores {
    features: FeatureMatrix,
    projected: Projected,
    /// Positions (rows of `projected`) flagged as outliers
    outliers: Vec<usize>,
}

// ============================================================================
// EVALUATOR
// ============================================================================

pub struct StreamingEvaluator<E: FeatureExtractor = TsFeatures> {
    config: DetectorConfig,
    extractor: E,
    num_series: usize,
    training_len: usize,
    state: Arc<ModelState>,
    phase: Phase,
}

impl StreamingEvaluator<TsFeatures> {
    /// Initialize with the default feature set
    pub fn new(training: &TimeSeriesCollection, config: DetectorConfig) -> Result<Self> {
        let extractor = TsFeatures::new(config.feature_width);
        Self::with_extractor(training, config, extractor)
    }
}

impl<E: FeatureExtractor> StreamingEvaluator<E> {
    /// Initialize with a caller-supplied feature extractor; every failure is fatal
    pub fn with_extractor(
        training: &TimeSeriesCollection,
        config: DetectorConfig,
        extractor: E,
    ) -> Result<Self> {
        debug!(phase = ?Phase::Initializing, "Evaluator initializing.");
        config.validate()?;
        if training.is_empty() {
            return Err(OddError::InvalidInput("training collection is empty".into()));
        }
        if config.k > extractor.dim() {
            return Err(OddError::InvalidConfig(format!(
                "k = {} exceeds the feature dimension {}",
                config.k,
                extractor.dim()
            )));
        }

        let features = extractor.extract(training)?;
        let state = ModelState::fit(&features, &config, config.seed, 0)?;

        info!(
            series = training.num_series(),
            usable = features.included_count(),
            features = features.dim(),
            k = config.k,
            threshold = state.threshold.threshold,
            "Evaluator initialized."
        );

        Ok(Self {
            num_series: training.num_series(),
            training_len: training.len(),
            config,
            extractor,
            state: Arc::new(state),
            phase: Phase::Streaming,
        })
    }

    /// Continue from a saved model instead of fitting on training data
    pub fn resume(snapshot: ModelSnapshot, config: DetectorConfig, extractor: E) -> Result<Self> {
        config.validate()?;
        let state = snapshot.state;
        if state.projection.dim() != extractor.dim() {
            return Err(OddError::InvalidConfig(format!(
                "snapshot expects {} features, extractor yields {}",
                state.projection.dim(),
                extractor.dim()
            )));
        }
        if state.projection.k() != config.k {
            return Err(OddError::InvalidConfig(format!(
                "snapshot projects to k = {}, config asks for {}",
                state.projection.k(),
                config.k
            )));
        }
        info!(
            generation = state.generation,
            series = snapshot.num_series,
            "Evaluator resumed from snapshot."
        );
        Ok(Self {
            num_series: snapshot.num_series,
            training_len: snapshot.training_len,
            config,
            extractor,
            state: Arc::new(state),
            phase: Phase::Streaming,
        })
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Current model; cheap to clone and safe to keep across windows
    pub fn state(&self) -> Arc<ModelState> {
        Arc::clone(&self.state)
    }

    pub fn num_series(&self) -> usize {
        self.num_series
    }

    pub fn snapshot(&self) -> ModelSnapshot {
        ModelSnapshot::new(self.num_series, self.training_len, (*self.state).clone())
    }

    /// Evaluate every full window of `stream`
    pub fn run(&mut self, stream: &TimeSeriesCollection) -> Result<StreamRun> {
        self.run_with(stream, None, |_, _| {})
    }

    /// Evaluate every full window, handing each report to `sink` as soon as
    /// it exists and stopping early when `stop` is raised
    pub fn run_with<F>(
        &mut self,
        stream: &TimeSeriesCollection,
        stop: Option<&StopSignal>,
        mut sink: F,
    ) -> Result<StreamRun>
    where
        F: FnMut(&OutlierReport, Option<&DriftDiagnostic>),
    {
        if stream.num_series() != self.num_series {
            return Err(OddError::ColumnMismatch {
                training: self.num_series,
                stream: stream.num_series(),
            });
        }
        let (length, skip) = self.config.resolve_windows(self.training_len, stream.len())?;
        let plan = WindowPlan::new(stream.len(), length, skip);
        info!(
            rows = stream.len(),
            window_length = length,
            window_skip = skip,
            windows = plan.total_windows(),
            "Streaming started."
        );

        self.phase = Phase::Streaming;
        let mut run = StreamRun::default();
        for window in plan {
            if stop.is_some_and(StopSignal::is_cancelled) {
                self.phase = Phase::Cancelled;
                run.cancelled = true;
                info!(window = window.index, "Streaming cancelled.");
                break;
            }
            let outcome = self.advance(stream, &window);
            sink(&outcome.report, outcome.diagnostic.as_ref());
            run.reports.push(outcome.report);
            run.diagnostics.push(outcome.diagnostic);
        }

        if !run.cancelled {
            self.phase = Phase::Done;
        }
        info!(
            windows = run.reports.len(),
            adaptations = run.adaptations(),
            generation = self.state.generation,
            "Streaming finished."
        );
        Ok(run)
    }

    /// Score one window and, with drift adaptation enabled, possibly replace
    /// the model before the next window
    pub fn advance(&mut self, stream: &TimeSeriesCollection, window: &Window) -> WindowOutcome {
        let current = Arc::clone(&self.state);
        let mut report =
            OutlierReport::new(window, current.generation, current.threshold.threshold);

        let scores = match stream.slice_rows(window.start, window.end) {
            Ok(rows) => self.evaluate(&current, &rows, &mut report),
            Err(e) => {
                report.mark_unreliable(e.to_string());
                None
            }
        };

        let mut diagnostic = None;
        if let (true, Some(scores)) = (self.config.concept_drift, scores) {
            self.phase = Phase::Adapting;
            if let Some((next, diag)) = self.adapt(&current, &scores, window, &mut report) {
                self.state = next;
                diagnostic = Some(diag);
            }
            self.phase = Phase::Streaming;
        }

        if let WindowStatus::Unreliable(reason) = &report.status {
            warn!(window = window.index, reason = %reason, "Window unreliable.");
        } else {
            debug!(
                window = window.index,
                outliers = report.outlier_series.len(),
                excluded = report.excluded_series.len(),
                "Window evaluated."
            );
        }
        WindowOutcome { report, diagnostic }
    }

    fn evaluate(
        &self,
        state: &ModelState,
        rows: &TimeSeriesCollection,
        report: &mut OutlierReport,
    ) -> Option<WindowScores> {
        let features = match self.extractor.extract(rows) {
            Ok(f) => f,
            Err(e) => {
                report.mark_unreliable(format!("feature extraction: {}", e));
                return None;
            }
        };
        report.excluded_series = features.excluded().iter().copied().collect();
        if features.included_count() == 0 {
            report.mark_unreliable("every series in the window is excluded");
            return None;
        }

        let projected = match state.projection.project(&features) {
            Ok(p) => p,
            Err(e) => {
                report.mark_unreliable(format!("projection: {}", e));
                return None;
            }
        };

        let mut outliers = Vec::new();
        let mut non_finite = 0;
        let scored = state.threshold.score(&projected.coords);
        for (pos, (density, below)) in scored.into_iter().enumerate() {
            if !density.is_finite() {
                non_finite += 1;
            } else if below {
                outliers.push(pos);
            }
        }
        report.outlier_series = outliers.iter().map(|&p| projected.series[p]).collect();
        if non_finite > 0 {
            report.mark_unreliable(format!("non-finite density for {} series", non_finite));
            return None;
        }

        Some(WindowScores {
            features,
            projected,
            outliers,
        })
    }

    fn adapt(
        &self,
        current: &ModelState,
        scores: &WindowScores,
        window: &Window,
        report: &mut OutlierReport,
    ) -> Option<(Arc<ModelState>, DriftDiagnostic)> {
        let positions = drift_sample(
            scores.projected.len(),
            &scores.outliers,
            self.config.majority_fraction,
        );
        let test_points = scores.projected.rows(&positions);
        let reference = &current.projection.reference_coords;
        let result = match kde_two_sample_test(reference, &test_points) {
            Ok(r) => r,
            Err(e) => {
                debug!(window = window.index, error = %e, "Drift test skipped.");
                return None;
            }
        };
        if !result.rejects(self.config.cd_alpha) {
            return None;
        }

        let series: Vec<usize> = positions.iter().map(|&p| scores.projected.series[p]).collect();
        let generation = current.generation + 1;
        let seed = ModelState::generation_seed(self.config.seed, generation);
        let refit_features = scores.features.select(&series);
        let next = match ModelState::fit(&refit_features, &self.config, seed, generation) {
            Ok(state) => state,
            Err(e) => {
                report.mark_unreliable(format!("drift refit: {}", e));
                return None;
            }
        };

        let diagnostic = DriftDiagnostic {
            window_index: window.index,
            p_value: result.p_value,
            updated_threshold: next.threshold.threshold,
            generation,
        };
        info!(
            window = window.index,
            p_value = result.p_value,
            threshold = next.threshold.threshold,
            generation,
            "Concept drift detected, model replaced."
        );
        Some((Arc::new(next), diagnostic))
    }
}

/// Window rows (positions among the evaluated series) that enter the drift
/// test and any refit. A minority of outliers is left out; a majority means
/// the reference itself is stale, so the whole window is used. `outliers`
/// must be sorted.
fn drift_sample(evaluated: usize, outliers: &[usize], majority_fraction: f64) -> Vec<usize> {
    let flagged = outliers.len();
    if flagged > 0 && (flagged as f64) < majority_fraction * evaluated as f64 {
        (0..evaluated)
            .filter(|p| outliers.binary_search(p).is_err())
            .collect()
    } else {
        (0..evaluated).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::GaussianScenario;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use rand_distr::{Distribution, StandardNormal};

    const LEADING: usize = 4;

    /// Uses the first few observations of each series as its features
    struct LeadingValues;

    impl FeatureExtractor for LeadingValues {
        fn names(&self) -> Vec<String> {
            (0..LEADING).map(|i| format!("x{}", i)).collect()
        }

        fn extract(&self, collection: &TimeSeriesCollection) -> Result<FeatureMatrix> {
            let rows = (0..collection.num_series())
                .map(|i| {
                    let observed = collection.observed(i);
                    (observed.len() >= LEADING).then(|| observed[..LEADING].to_vec())
                })
                .collect();
            FeatureMatrix::from_rows(self.names(), rows)
        }
    }

    /// `series` columns of `LEADING` rows; column i is `f(i, noise)`
    fn leading_collection<F>(series: usize, seed: u64, f: F) -> TimeSeriesCollection
    where
        F: Fn(usize, f64) -> f64,
    {
        let mut rng = StdRng::seed_from_u64(seed);
        let columns: Vec<Vec<f64>> = (0..series)
            .map(|i| {
                (0..LEADING)
                    .map(|_| f(i, StandardNormal.sample(&mut rng)))
                    .collect()
            })
            .collect();
        TimeSeriesCollection::from_columns(&columns).unwrap()
    }

    fn leading_evaluator(scale: f64) -> StreamingEvaluator<LeadingValues> {
        let training = leading_collection(60, 21, |_, z| scale * z);
        let config = small_config().with_drift(0.05);
        StreamingEvaluator::with_extractor(&training, config, LeadingValues).unwrap()
    }

    fn small_config() -> DetectorConfig {
        DetectorConfig {
            trials: 60,
            ..DetectorConfig::default()
        }
    }

    fn training() -> TimeSeriesCollection {
        GaussianScenario::new(120, 60, 10.0, 3.0).generate(1).unwrap()
    }

    #[test]
    fn test_initialization_builds_generation_zero() {
        let eval = StreamingEvaluator::new(&training(), small_config()).unwrap();
        let state = eval.state();
        assert_eq!(state.generation, 0);
        assert_eq!(state.projection.k(), 2);
        assert!(state.threshold.threshold > 0.0);
        assert_eq!(eval.phase(), Phase::Streaming);
    }

    #[test]
    fn test_invalid_config_is_fatal() {
        let config = DetectorConfig {
            p_rate: 1.5,
            ..small_config()
        };
        assert!(matches!(
            StreamingEvaluator::new(&training(), config),
            Err(OddError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_too_few_training_series() {
        let tiny = GaussianScenario::new(80, 10, 10.0, 3.0).generate(2).unwrap();
        assert!(matches!(
            StreamingEvaluator::new(&tiny, small_config()),
            Err(OddError::TrainingTooSmall { .. })
        ));
    }

    #[test]
    fn test_all_missing_training() {
        let empty = TimeSeriesCollection::new(40, 20, vec![f64::NAN; 800]).unwrap();
        assert!(matches!(
            StreamingEvaluator::new(&empty, small_config()),
            Err(OddError::AllSeriesExcluded(20))
        ));
    }

    #[test]
    fn test_column_mismatch() {
        let mut eval = StreamingEvaluator::new(&training(), small_config()).unwrap();
        let stream = GaussianScenario::new(120, 61, 10.0, 3.0).generate(3).unwrap();
        assert!(matches!(
            eval.run(&stream),
            Err(OddError::ColumnMismatch {
                training: 60,
                stream: 61
            })
        ));
    }

    #[test]
    fn test_missing_window_series_are_reported_as_excluded() {
        let config = small_config().with_windows(40, 40);
        let mut eval = StreamingEvaluator::new(&training(), config).unwrap();
        let mut columns: Vec<Vec<f64>> = (0..60)
            .map(|seed| {
                let single = GaussianScenario::new(80, 1, 10.0, 3.0);
                single.generate(100 + seed).unwrap().observed(0)
            })
            .collect();
        columns[4] = vec![f64::NAN; 80];
        let stream = TimeSeriesCollection::from_columns(&columns).unwrap();

        let run = eval.run(&stream).unwrap();
        assert_eq!(run.reports.len(), 2);
        for report in &run.reports {
            assert_eq!(report.excluded_series, vec![4]);
            assert!(!report.outlier_series.contains(&4));
        }
    }

    #[test]
    fn test_all_excluded_window_is_unreliable() {
        let config = small_config().with_windows(40, 40);
        let mut eval = StreamingEvaluator::new(&training(), config).unwrap();
        let stream = TimeSeriesCollection::new(40, 60, vec![f64::NAN; 2400]).unwrap();
        let run = eval.run(&stream).unwrap();
        assert_eq!(run.reports.len(), 1);
        assert!(!run.reports[0].status.is_ok());
        assert_eq!(run.reports[0].excluded_series.len(), 60);
    }

    #[test]
    fn test_stop_signal_before_first_window() {
        let mut eval = StreamingEvaluator::new(&training(), small_config()).unwrap();
        let stop = StopSignal::new();
        stop.cancel();
        let stream = GaussianScenario::new(240, 60, 10.0, 3.0).generate(4).unwrap();
        let run = eval.run_with(&stream, Some(&stop), |_, _| {}).unwrap();
        assert!(run.cancelled);
        assert!(run.reports.is_empty());
        assert_eq!(eval.phase(), Phase::Cancelled);
    }

    #[test]
    fn test_drift_sample_excludes_minority_only() {
        assert_eq!(drift_sample(5, &[], 0.5), vec![0, 1, 2, 3, 4]);
        assert_eq!(drift_sample(5, &[1, 3], 0.5), vec![0, 2, 4]);
        // 3 of 5 is a majority: the reference is stale, keep everything
        assert_eq!(drift_sample(5, &[0, 1, 2], 0.5), vec![0, 1, 2, 3, 4]);
        // Exactly at the cutoff counts as a majority
        assert_eq!(drift_sample(4, &[0, 1], 0.5), vec![0, 1, 2, 3]);
        assert_eq!(drift_sample(4, &[0, 1], 0.75), vec![2, 3]);
    }

    #[test]
    fn test_minority_outliers_left_out_of_refit() {
        let mut eval = leading_evaluator(1.0);
        let far = [5, 20, 41];
        // A narrower window drifts away from the reference; three series
        // sit far outside it
        let stream = leading_collection(60, 22, |i, z| match far.iter().position(|&f| f == i) {
            Some(0) => 40.0,
            Some(1) => -40.0,
            Some(_) => 40.0 * if z > 0.0 { 1.0 } else { -1.0 },
            None => 0.2 * z,
        });

        let run = eval.run(&stream).unwrap();
        assert_eq!(run.reports.len(), 1);
        assert!(run.reports[0].status.is_ok());
        assert_eq!(run.reports[0].outlier_series, far.to_vec());

        let diagnostic = run.diagnostics[0].expect("narrowed window should drift");
        assert_eq!(diagnostic.generation, 1);
        let state = eval.state();
        assert_eq!(state.generation, 1);
        assert_eq!(state.projection.reference_len(), 60 - far.len());
    }

    #[test]
    fn test_refit_failure_keeps_model() {
        let mut eval = leading_evaluator(1.0);
        let before = eval.state();
        // Every series shifts, and the first feature no longer varies, so
        // the window cannot support a projection of its own
        let stream = leading_collection(60, 23, |_, z| 50.0 + z);
        let stream = stream.map_values(|t, _, v| if t == 0 { 0.0 } else { v });

        let run = eval.run(&stream).unwrap();
        let report = &run.reports[0];
        assert_eq!(report.outlier_series.len(), 60);
        match &report.status {
            WindowStatus::Unreliable(reason) => assert!(reason.starts_with("drift refit")),
            WindowStatus::Ok => panic!("refit failure must mark the window"),
        }
        assert_eq!(run.diagnostics, vec![None]);
        assert!(Arc::ptr_eq(&before, &eval.state()));
        assert_eq!(eval.phase(), Phase::Done);
    }

    #[test]
    fn test_non_finite_density_skips_adaptation() {
        let mut eval = leading_evaluator(0.1);
        let before = eval.state();
        let stream = leading_collection(60, 24, |i, z| if i == 9 { f64::MAX } else { 0.1 * z });

        let run = eval.run(&stream).unwrap();
        let report = &run.reports[0];
        match &report.status {
            WindowStatus::Unreliable(reason) => assert!(reason.contains("non-finite")),
            WindowStatus::Ok => panic!("overflowing features must mark the window"),
        }
        assert!(!report.outlier_series.contains(&9));
        assert_eq!(run.diagnostics, vec![None]);
        assert!(Arc::ptr_eq(&before, &eval.state()));
    }

    #[test]
    fn test_generation_seed() {
        assert_eq!(ModelState::generation_seed(42, 0), 42);
        assert_ne!(ModelState::generation_seed(42, 1), ModelState::generation_seed(42, 2));
    }
}
