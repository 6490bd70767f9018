//! Extreme-value density threshold
//!
//! Calibrates the density level below which a projected series counts as
//! an outlier. The reference density is an SCV-bandwidth KDE; the cutoff
//! comes from the distribution of the smallest density in bootstrap
//! replicates of the reference set:
//!
//! 1. Each trial resamples the m reference points with replacement,
//!    jitters every draw by N(0, H) and keeps the minimum KDE value
//! 2. Minima are mapped through `ψ(x) = sqrt(−2 ln x − 2 ln 2π)`
//!    (zero when `x ≥ 1/2π`); `p` is the share of non-zero ψ
//! 3. The Gumbel quantile `y = −ln(−ln(1 − p_rate·p))` is placed on the
//!    Fisher–Tippett scale of m samples and mapped back to a density
//!
//! Trials are seeded individually from the base seed and the trial index,
//! so sequential and parallel runs produce identical thresholds.

use crate::algo::kde::KernelDensity;
use crate::error::{OddError, Result};
use nalgebra::{Cholesky, DMatrix, DVector};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use tracing::debug;

const GOLDEN_GAMMA: u64 = 0x9E37_79B9_7F4A_7C15;

/// Calibrated reference density and its outlier cutoff
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdModel {
    /// KDE over the reference coordinates
    pub density: KernelDensity,
    /// Density cutoff, strictly positive
    pub threshold: f64,
    /// Share of trials whose transformed minimum was non-zero (`p`)
    pub extreme_fraction: f64,
    pub trials: usize,
    pub seed: u64,
}

impl ThresholdModel {
    pub fn bandwidth(&self) -> &DMatrix<f64> {
        self.density.bandwidth()
    }

    /// Density of every row of `coords` and whether it falls below the cutoff
    pub fn score(&self, coords: &DMatrix<f64>) -> Vec<(f64, bool)> {
        self.density
            .evaluate_rows(coords)
            .into_iter()
            .map(|f| (f, f < self.threshold))
            .collect()
    }
}

/// How Monte-Carlo trials are scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Execution {
    Sequential,
    #[default]
    Parallel,
}

#[derive(Debug, Clone)]
pub struct ThresholdCalibrator {
    p_rate: f64,
    trials: usize,
    seed: u64,
    execution: Execution,
}

impl ThresholdCalibrator {
    pub fn new(p_rate: f64, trials: usize, seed: u64) -> Self {
        Self {
            p_rate,
            trials,
            seed,
            execution: Execution::default(),
        }
    }

    pub fn with_execution(mut self, execution: Execution) -> Self {
        self.execution = execution;
        self
    }

    /// Fit the reference density on `reference` (m × k) and calibrate the cutoff
    pub fn calibrate(&self, reference: &DMatrix<f64>) -> Result<ThresholdModel> {
        let m = reference.nrows();
        if m < 3 {
            return Err(OddError::numeric(format!(
                "threshold calibration needs at least 3 reference points, got {}",
                m
            )));
        }
        if self.trials == 0 {
            return Err(OddError::InvalidConfig("trials must be positive".into()));
        }

        let density = KernelDensity::fit_scv(reference.clone())?;
        let jitter = Cholesky::new(density.bandwidth().clone())
            .ok_or_else(|| OddError::numeric("bandwidth matrix is not positive definite"))?
            .l();

        let run = |trial: usize| self.trial_minimum(&density, &jitter, trial);
        let minima: Vec<f64> = match self.execution {
            Execution::Sequential => (0..self.trials).map(run).collect(),
            Execution::Parallel => (0..self.trials).into_par_iter().map(run).collect(),
        };

        let extreme = minima.iter().filter(|&&x| psi_transform(x) != 0.0).count();
        let p = extreme as f64 / self.trials as f64;
        let threshold = extreme_value_threshold(self.p_rate, p, m)?;

        debug!(
            reference = m,
            trials = self.trials,
            p,
            threshold,
            "Threshold calibrated."
        );

        Ok(ThresholdModel {
            density,
            threshold,
            extreme_fraction: p,
            trials: self.trials,
            seed: self.seed,
        })
    }

    fn trial_minimum(&self, density: &KernelDensity, jitter: &DMatrix<f64>, trial: usize) -> f64 {
        let mut rng = StdRng::seed_from_u64(trial_seed(self.seed, trial as u64));
        let points = density.points();
        let (m, k) = points.shape();

        let mut minimum = f64::INFINITY;
        for _ in 0..m {
            let idx = rng.random_range(0..m);
            let z = DVector::from_fn(k, |_, _| rng.sample::<f64, _>(StandardNormal));
            let x = points.row(idx).transpose() + jitter * z;
            minimum = minimum.min(density.evaluate(x.as_slice()));
        }
        minimum
    }
}

/// Independent stream seed for a trial (splitmix64 finalizer)
pub fn trial_seed(seed: u64, trial: u64) -> u64 {
    let mut z = seed.wrapping_add(GOLDEN_GAMMA.wrapping_mul(trial.wrapping_add(1)));
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// `sqrt(−2 ln x − 2 ln 2π)` below `1/2π`, zero otherwise; infinite at zero
pub fn psi_transform(x: f64) -> f64 {
    if x < 1.0 / (2.0 * PI) {
        (-2.0 * x.ln() - 2.0 * (2.0 * PI).ln()).sqrt()
    } else {
        0.0
    }
}

/// Density cutoff from the Gumbel approximation of m-sample extremes
pub fn extreme_value_threshold(p_rate: f64, p: f64, m: usize) -> Result<f64> {
    if !(p > 0.0) {
        return Err(OddError::numeric(
            "no trial produced a transformed minimum above zero",
        ));
    }
    if m < 3 {
        return Err(OddError::numeric("extreme-value scale needs m >= 3"));
    }

    let ln_m = (m as f64).ln();
    let root = (2.0 * ln_m).sqrt();
    let cm = root - (ln_m.ln() + (4.0 * PI).ln()) / (2.0 * root);
    let dm = 1.0 / root;

    let y = -(-(1.0 - p_rate * p).ln()).ln();
    let t = cm + y * dm;
    let threshold = (-(t * t + 2.0 * (2.0 * PI).ln()) / 2.0).exp();

    if !(threshold.is_finite() && threshold > 0.0) {
        return Err(OddError::numeric(format!(
            "threshold {} is not a positive density",
            threshold
        )));
    }
    Ok(threshold)
}
