use odd_streams::algo::{ProjectionModel, TsFeatures};
use odd_streams::simulation::{GaussianScenario, detection_scenario, level_shift};
use odd_streams::{
    DetectorConfig, FeatureExtractor, ModelSnapshot, StopSignal, StreamingEvaluator,
    TimeSeriesCollection,
};
use std::sync::Arc;

fn config(trials: usize) -> DetectorConfig {
    DetectorConfig {
        trials,
        ..DetectorConfig::default()
    }
}

fn gaussian(rows: usize, series: usize, seed: u64) -> TimeSeriesCollection {
    GaussianScenario::new(rows, series, 10.0, 3.0)
        .generate(seed)
        .unwrap()
}

#[test]
fn test_classical_initialization_is_deterministic() {
    let training = gaussian(200, 80, 1);
    let cfg = DetectorConfig {
        robust: false,
        seed: 17,
        ..config(100)
    };
    let a = StreamingEvaluator::new(&training, cfg.clone()).unwrap();
    let b = StreamingEvaluator::new(&training, cfg).unwrap();
    assert_eq!(*a.state(), *b.state());
    assert_eq!(
        a.state().threshold.threshold.to_bits(),
        b.state().threshold.threshold.to_bits()
    );
}

#[test]
fn test_training_projection_round_trip() {
    let training = gaussian(200, 80, 2);
    let features = TsFeatures::default().extract(&training).unwrap();
    for robust in [false, true] {
        let model = ProjectionModel::fit(&features, robust, 2).unwrap();
        let projected = model.project(&features).unwrap();
        assert_eq!(projected.coords, model.reference_coords);
    }
}

#[test]
fn test_lower_rate_never_raises_threshold() {
    let training = gaussian(200, 80, 3);
    let loose = DetectorConfig {
        p_rate: 0.01,
        ..config(100)
    };
    let strict = DetectorConfig {
        p_rate: 0.001,
        ..config(100)
    };
    let t_loose = StreamingEvaluator::new(&training, loose).unwrap().state();
    let t_strict = StreamingEvaluator::new(&training, strict).unwrap().state();
    assert!(t_strict.threshold.threshold <= t_loose.threshold.threshold);
}

#[test]
fn test_window_coverage() {
    let training = gaussian(100, 60, 4);
    for &(total, length, skip) in &[(530, 100, 70), (500, 100, 100), (100, 100, 30)] {
        let mut eval =
            StreamingEvaluator::new(&training, config(40).with_windows(length, skip)).unwrap();
        let run = eval.run(&gaussian(total, 60, 5)).unwrap();

        assert_eq!(run.reports.len(), (total - length) / skip + 1);
        assert_eq!(run.diagnostics.len(), run.reports.len());
        for (i, report) in run.reports.iter().enumerate() {
            assert_eq!(report.window_index, i);
            assert_eq!(report.window_start, i * skip);
            assert!(report.window_end <= total);
        }
    }
}

#[test]
fn test_partial_window_dropped() {
    let training = gaussian(100, 60, 6);
    let mut eval = StreamingEvaluator::new(&training, config(40).with_windows(50, 50)).unwrap();
    let run = eval.run(&gaussian(260, 60, 7)).unwrap();
    assert_eq!(run.reports.len(), 5);
    assert_eq!(run.reports.last().unwrap().window_end, 250);
    assert!(!run.cancelled);
}

#[test]
fn test_window_longer_than_stream_rejected() {
    let training = gaussian(100, 60, 8);
    let mut eval = StreamingEvaluator::new(&training, config(40)).unwrap();
    assert!(eval.run(&gaussian(99, 60, 9)).is_err());
}

#[test]
fn test_model_frozen_without_drift_adaptation() {
    let training = gaussian(100, 60, 10);
    let mut eval = StreamingEvaluator::new(&training, config(40).with_windows(50, 25)).unwrap();
    let before = eval.state();
    // Even a shifted stream must not touch the model
    let stream = level_shift(&gaussian(300, 60, 11), 150, 20.0).unwrap();
    let run = eval.run(&stream).unwrap();

    assert!(Arc::ptr_eq(&before, &eval.state()));
    assert!(run.reports.iter().all(|r| r.generation == 0));
    assert!(run.diagnostics.iter().all(Option::is_none));
}

#[test]
fn test_detection_scenario_flags_scaled_series() {
    let scenario = detection_scenario(42).unwrap();
    let mut eval = StreamingEvaluator::new(&scenario.training, DetectorConfig::default()).unwrap();
    let run = eval.run(&scenario.stream).unwrap();

    assert_eq!(run.reports.len(), 1);
    let report = &run.reports[0];
    assert!(report.status.is_ok());
    for series in &scenario.anomalous {
        assert!(
            report.outlier_series.contains(series),
            "series {} missed, flagged {:?}",
            series,
            report.outlier_series
        );
    }
}

/// Windows with a non-empty outlier set, and windows evaluated, over
/// independent training/stream pairs drawn from one distribution
fn typical_window_counts(p_rate: f64) -> (usize, usize) {
    let mut nonempty = 0;
    let mut windows = 0;
    for seed in 0..10 {
        let training = gaussian(250, 100, 2000 + seed);
        let cfg = DetectorConfig {
            p_rate,
            ..DetectorConfig::default()
        }
        .with_seed(seed);
        let mut eval = StreamingEvaluator::new(&training, cfg).unwrap();
        let run = eval.run(&gaussian(2500, 100, 3000 + seed)).unwrap();
        for report in &run.reports {
            assert!(report.status.is_ok());
            windows += 1;
            if report.has_outliers() {
                nonempty += 1;
            }
        }
    }
    (nonempty, windows)
}

#[test]
fn test_typical_windows_are_mostly_empty() {
    // With m = 100 reference series the empty-window rate stays below the
    // asymptotic 1 - p_rate; see DESIGN.md for the measured rate
    let (nonempty, windows) = typical_window_counts(0.001);
    assert_eq!(windows, 100);
    assert!(nonempty <= 20, "{} of {} windows flagged", nonempty, windows);
}

#[test]
fn test_stricter_rate_flags_subset_per_window() {
    let training = gaussian(250, 100, 12);
    let stream = gaussian(250 * 4, 100, 1012);
    let reports = |p_rate: f64| {
        let cfg = DetectorConfig {
            p_rate,
            ..config(200)
        };
        let mut eval = StreamingEvaluator::new(&training, cfg).unwrap();
        eval.run(&stream).unwrap().reports
    };
    let loose = reports(0.05);
    let strict = reports(0.0001);
    assert_eq!(loose.len(), strict.len());
    for (l, s) in loose.iter().zip(&strict) {
        assert!(
            s.outlier_series.iter().all(|i| l.outlier_series.contains(i)),
            "window {}: {:?} not within {:?}",
            s.window_index,
            s.outlier_series,
            l.outlier_series
        );
    }
}

#[test]
fn test_drift_replaces_model() {
    let training = gaussian(100, 80, 13);
    let cfg = config(60).with_windows(100, 100).with_drift(0.05);
    let mut eval = StreamingEvaluator::new(&training, cfg).unwrap();
    let stream = level_shift(&gaussian(300, 80, 14), 0, 25.0).unwrap();
    let run = eval.run(&stream).unwrap();

    let first = run.diagnostics[0].expect("shifted window should trigger adaptation");
    assert!(first.p_value < 0.05);
    assert!(first.updated_threshold > 0.0);
    assert_eq!(first.generation, 1);
    assert_eq!(run.reports[0].generation, 0);
    assert!(run.reports[1].generation >= 1);
    assert!(eval.state().generation >= 1);
}

#[test]
fn test_cancellation_keeps_emitted_reports() {
    let training = gaussian(100, 60, 15);
    let mut eval = StreamingEvaluator::new(&training, config(40).with_windows(50, 50)).unwrap();
    let stop = StopSignal::new();
    let mut seen = 0;
    let run = eval
        .run_with(&gaussian(500, 60, 16), Some(&stop), |_, _| {
            seen += 1;
            if seen == 2 {
                stop.cancel();
            }
        })
        .unwrap();

    assert!(run.cancelled);
    assert_eq!(run.reports.len(), 2);
    assert_eq!(run.reports[1].window_end, 100);
}

#[test]
fn test_json_snapshot_resume_reproduces_reports() {
    let training = gaussian(100, 60, 19);
    let cfg = config(40).with_windows(50, 50);
    let stream = gaussian(200, 60, 20);

    let mut first = StreamingEvaluator::new(&training, cfg.clone()).unwrap();
    let json = first.snapshot().to_json().unwrap();
    let expected = first.run(&stream).unwrap();

    let snapshot = ModelSnapshot::from_json(&json).unwrap();
    let refit = StreamingEvaluator::new(&training, cfg.clone()).unwrap();
    assert_eq!(snapshot.state, *refit.state());
    let mut resumed = StreamingEvaluator::resume(snapshot, cfg, TsFeatures::default()).unwrap();
    assert_eq!(resumed.run(&stream).unwrap(), expected);
}

#[test]
fn test_snapshot_resume_reproduces_reports() {
    let training = gaussian(100, 60, 17);
    let cfg = config(40).with_windows(50, 50);
    let stream = gaussian(200, 60, 18);

    let mut first = StreamingEvaluator::new(&training, cfg.clone()).unwrap();
    let bytes = first.snapshot().to_bytes().unwrap();
    let expected = first.run(&stream).unwrap();

    let snapshot = ModelSnapshot::from_bytes(&bytes).unwrap();
    let mut resumed = StreamingEvaluator::resume(snapshot, cfg, TsFeatures::default()).unwrap();
    assert_eq!(resumed.run(&stream).unwrap(), expected);
}
