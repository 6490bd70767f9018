//! Synthetic stream scenarios
//!
//! Seeded generators for exercising the pipeline end to end:
//! - Gaussian typical behavior: T × N i.i.d. Normal(mean, sd)
//! - Injections: multiplicative or additive perturbation of chosen series
//!   over a row range
//! - Level-shifted drift streams

use crate::error::{OddError, Result};
use crate::series::TimeSeriesCollection;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};

/// i.i.d. Gaussian collection
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GaussianScenario {
    pub rows: usize,
    pub series: usize,
    pub mean: f64,
    pub sd: f64,
}

impl GaussianScenario {
    pub fn new(rows: usize, series: usize, mean: f64, sd: f64) -> Self {
        Self {
            rows,
            series,
            mean,
            sd,
        }
    }

    pub fn generate(&self, seed: u64) -> Result<TimeSeriesCollection> {
        if !(self.sd.is_finite() && self.sd >= 0.0) {
            return Err(OddError::InvalidInput(format!(
                "standard deviation must be finite and non-negative, got {}",
                self.sd
            )));
        }
        let mut rng = StdRng::seed_from_u64(seed);
        let data = (0..self.rows * self.series)
            .map(|_| {
                let z: f64 = StandardNormal.sample(&mut rng);
                self.mean + self.sd * z
            })
            .collect();
        TimeSeriesCollection::new(self.rows, self.series, data)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum InjectionKind {
    /// Multiply values by a factor
    Scale(f64),
    /// Add a constant
    Shift(f64),
}

/// Perturbation of selected series over rows `[start, end)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Injection {
    pub series: Vec<usize>,
    pub start: usize,
    pub end: usize,
    pub kind: InjectionKind,
}

impl Injection {
    /// Scale the given series over every row
    pub fn scale(series: Vec<usize>, factor: f64) -> Self {
        Self {
            series,
            start: 0,
            end: usize::MAX,
            kind: InjectionKind::Scale(factor),
        }
    }

    /// Shift the given series over every row
    pub fn shift(series: Vec<usize>, delta: f64) -> Self {
        Self {
            series,
            start: 0,
            end: usize::MAX,
            kind: InjectionKind::Shift(delta),
        }
    }

    pub fn over_rows(mut self, start: usize, end: usize) -> Self {
        self.start = start;
        self.end = end;
        self
    }

    fn applies(&self, t: usize, i: usize) -> bool {
        t >= self.start && t < self.end && self.series.contains(&i)
    }
}

/// Apply injections in order; missing values stay missing
pub fn inject(
    collection: &TimeSeriesCollection,
    injections: &[Injection],
) -> Result<TimeSeriesCollection> {
    let n = collection.num_series();
    if let Some(bad) = injections
        .iter()
        .flat_map(|inj| inj.series.iter())
        .find(|&&i| i >= n)
    {
        return Err(OddError::InvalidInput(format!(
            "injection targets series {} of {}",
            bad, n
        )));
    }

    let marker = collection.missing_marker();
    Ok(collection.map_values(|t, i, v| {
        if marker.is_missing(v) {
            return v;
        }
        injections
            .iter()
            .filter(|inj| inj.applies(t, i))
            .fold(v, |acc, inj| match inj.kind {
                InjectionKind::Scale(f) => acc * f,
                InjectionKind::Shift(d) => acc + d,
            })
    }))
}

/// Every series shifted by `delta` from row `from` onward
pub fn level_shift(
    collection: &TimeSeriesCollection,
    from: usize,
    delta: f64,
) -> Result<TimeSeriesCollection> {
    let all: Vec<usize> = (0..collection.num_series()).collect();
    inject(
        collection,
        &[Injection::shift(all, delta).over_rows(from, collection.len())],
    )
}

/// Training set, one test window with a few scaled series, and the scaled indices
#[derive(Debug, Clone)]
pub struct DetectionScenario {
    pub training: TimeSeriesCollection,
    pub stream: TimeSeriesCollection,
    pub anomalous: Vec<usize>,
}

/// 100 series of 250 points ~ Normal(10, 3); in the test window series
/// 0..5 are doubled
pub fn detection_scenario(seed: u64) -> Result<DetectionScenario> {
    let base = GaussianScenario::new(250, 100, 10.0, 3.0);
    let training = base.generate(seed)?;
    let anomalous: Vec<usize> = (0..5).collect();
    let clean = base.generate(seed.wrapping_add(1))?;
    let stream = inject(&clean, &[Injection::scale(anomalous.clone(), 2.0)])?;
    Ok(DetectionScenario {
        training,
        stream,
        anomalous,
    })
}
