//! Penalized least squares by coordinate descent
//!
//! Minimizes
//!
//! ```text
//! (1 / 2n) ||y - Xβ||² + α Σⱼ sⱼ (ρ |βⱼ| + (1 - ρ) / 2 βⱼ²)
//! ```
//!
//! where `ρ` is the L1 ratio and `sⱼ` a per-column penalty weight. A weight of
//! zero leaves the column unpenalized. No intercept is fitted; callers demean
//! their data first.

use crate::error::{Result, StatsError};
use crate::regression::ols;
use ndarray::{Array1, Array2, Axis};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

/// Solver settings shared by single fits and cross-validation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ElasticNetConfig {
    /// Mix between L1 and L2 (1.0 = lasso)
    pub l1_ratio: f64,
    /// Maximum number of coordinate sweeps
    pub max_iter: usize,
    /// Convergence tolerance on the largest coefficient change, relative to
    /// the largest coefficient
    pub tol: f64,
}

impl Default for ElasticNetConfig {
    fn default() -> Self {
        Self {
            l1_ratio: 1.0,
            max_iter: 10_000,
            tol: 1e-4,
        }
    }
}

/// Result of a penalized fit.
#[derive(Debug, Clone)]
pub struct PenalizedFit {
    /// Coefficients, one per column
    pub coefficients: Array1<f64>,
    /// Penalty used
    pub alpha: f64,
    /// Sweeps performed
    pub iterations: usize,
    /// Whether the tolerance was reached
    pub converged: bool,
}

impl PenalizedFit {
    /// Indices of nonzero coefficients
    pub fn selected(&self) -> Vec<usize> {
        self.coefficients
            .iter()
            .enumerate()
            .filter(|(_, b)| **b != 0.0)
            .map(|(j, _)| j)
            .collect()
    }
}

/// Elastic net at a fixed penalty.
#[derive(Debug, Clone, Copy)]
pub struct ElasticNet {
    /// Overall penalty strength
    pub alpha: f64,
    /// Solver settings
    pub config: ElasticNetConfig,
}

fn soft_threshold(z: f64, gamma: f64) -> f64 {
    if z > gamma {
        z - gamma
    } else if z < -gamma {
        z + gamma
    } else {
        0.0
    }
}

fn check_inputs(x: &Array2<f64>, y: &Array1<f64>, weights: &[f64]) -> Result<()> {
    if y.len() != x.nrows() {
        return Err(StatsError::DimensionMismatch {
            expected: x.nrows(),
            actual: y.len(),
        });
    }
    if weights.len() != x.ncols() {
        return Err(StatsError::DimensionMismatch {
            expected: x.ncols(),
            actual: weights.len(),
        });
    }
    if x.nrows() == 0 {
        return Err(StatsError::InsufficientData {
            required: 1,
            actual: 0,
        });
    }
    if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
        return Err(StatsError::InvalidParameter(
            "penalty weights must be finite and non-negative".to_string(),
        ));
    }
    Ok(())
}

impl ElasticNet {
    /// Create an estimator with the default solver settings
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha,
            config: ElasticNetConfig::default(),
        }
    }

    /// Use the given solver settings
    pub fn with_config(mut self, config: ElasticNetConfig) -> Self {
        self.config = config;
        self
    }

    /// Fit from a zero start.
    pub fn fit(&self, x: &Array2<f64>, y: &Array1<f64>, weights: &[f64]) -> Result<PenalizedFit> {
        self.fit_from(x, y, weights, None)
    }

    /// Fit starting from `start` (warm start along a penalty path).
    ///
    /// # Errors
    /// Dimension mismatches, negative weights or a negative penalty.
    pub fn fit_from(
        &self,
        x: &Array2<f64>,
        y: &Array1<f64>,
        weights: &[f64],
        start: Option<&Array1<f64>>,
    ) -> Result<PenalizedFit> {
        check_inputs(x, y, weights)?;
        if !(self.alpha.is_finite() && self.alpha >= 0.0) {
            return Err(StatsError::InvalidParameter(format!(
                "penalty must be non-negative, got {}",
                self.alpha
            )));
        }

        let (n, p) = x.dim();
        let n_f = n as f64;
        let l1 = self.config.l1_ratio;

        let mut beta = match start {
            Some(b) if b.len() == p => b.clone(),
            _ => Array1::<f64>::zeros(p),
        };
        let mut residual = y - &x.dot(&beta);
        let col_sq: Vec<f64> = x
            .axis_iter(Axis(1))
            .map(|c| c.dot(&c) / n_f)
            .collect();

        let mut iterations = 0;
        let mut converged = false;
        while iterations < self.config.max_iter {
            iterations += 1;
            let mut max_change = 0.0_f64;
            let mut max_coef = 0.0_f64;

            for j in 0..p {
                if col_sq[j] == 0.0 {
                    beta[j] = 0.0;
                    continue;
                }
                let col = x.column(j);
                let old = beta[j];
                let rho = col.dot(&residual) / n_f + col_sq[j] * old;
                let penalty = self.alpha * weights[j];
                let new = soft_threshold(rho, penalty * l1) / (col_sq[j] + penalty * (1.0 - l1));

                let delta = new - old;
                if delta != 0.0 {
                    residual.scaled_add(-delta, &col);
                    beta[j] = new;
                }
                max_change = max_change.max(delta.abs());
                max_coef = max_coef.max(new.abs());
            }

            if max_change == 0.0 || max_change <= self.config.tol * max_coef {
                converged = true;
                break;
            }
        }

        if !converged {
            log::debug!(
                "coordinate descent stopped after {} sweeps at alpha {:.3e}",
                iterations,
                self.alpha
            );
        }

        Ok(PenalizedFit {
            coefficients: beta,
            alpha: self.alpha,
            iterations,
            converged,
        })
    }
}

/// Smallest penalty at which every penalized coefficient is zero.
///
/// Unpenalized columns are partialled out first, so the answer is
/// `max |xⱼᵀ r| / (n ρ sⱼ)` over penalized columns, with `r` the residual of
/// `y` on the unpenalized columns.
pub fn alpha_max(x: &Array2<f64>, y: &Array1<f64>, weights: &[f64], l1_ratio: f64) -> Result<f64> {
    check_inputs(x, y, weights)?;
    if l1_ratio <= 0.0 {
        return Err(StatsError::InvalidParameter(
            "automatic penalty grid requires a positive L1 ratio".to_string(),
        ));
    }

    let free: Vec<usize> = (0..weights.len()).filter(|&j| weights[j] == 0.0).collect();
    let residual = if free.is_empty() {
        y.clone()
    } else {
        let xf = x.select(Axis(1), &free);
        ols(&xf, y, "unpenalized columns")?.residuals
    };

    let n = x.nrows() as f64;
    let max = (0..weights.len())
        .filter(|&j| weights[j] > 0.0)
        .map(|j| x.column(j).dot(&residual).abs() / (n * l1_ratio * weights[j]))
        .fold(0.0_f64, f64::max);
    Ok(max)
}

/// Log-spaced penalty grid from `alpha_max` down to `alpha_max * eps`.
pub fn alpha_grid(alpha_max: f64, n_alphas: usize, eps: f64) -> Vec<f64> {
    let top = if alpha_max > 0.0 { alpha_max } else { f64::EPSILON };
    if n_alphas <= 1 {
        return vec![top];
    }
    let log_top = top.log10();
    let log_bottom = (top * eps).log10();
    (0..n_alphas)
        .map(|i| {
            let t = i as f64 / (n_alphas - 1) as f64;
            10f64.powf(log_top + t * (log_bottom - log_top))
        })
        .collect()
}

/// Repeated K-fold splitter with a reproducible shuffle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepeatedKFold {
    /// Folds per repetition
    pub n_splits: usize,
    /// Number of repetitions
    pub n_repeats: usize,
    /// Shuffle seed
    pub seed: u64,
}

impl Default for RepeatedKFold {
    fn default() -> Self {
        Self {
            n_splits: 5,
            n_repeats: 10,
            seed: 123,
        }
    }
}

impl RepeatedKFold {
    /// `(train, test)` index sets for every fold of every repetition.
    ///
    /// The first `n % n_splits` folds of each repetition get one extra row.
    pub fn splits(&self, n: usize) -> Result<Vec<(Vec<usize>, Vec<usize>)>> {
        if self.n_splits < 2 || self.n_repeats == 0 {
            return Err(StatsError::InvalidParameter(format!(
                "need at least 2 folds and 1 repeat, got {} and {}",
                self.n_splits, self.n_repeats
            )));
        }
        if n < self.n_splits {
            return Err(StatsError::InsufficientData {
                required: self.n_splits,
                actual: n,
            });
        }

        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut out = Vec::with_capacity(self.n_splits * self.n_repeats);
        for _ in 0..self.n_repeats {
            let mut order: Vec<usize> = (0..n).collect();
            order.shuffle(&mut rng);

            let base = n / self.n_splits;
            let extra = n % self.n_splits;
            let mut start = 0;
            for fold in 0..self.n_splits {
                let size = base + usize::from(fold < extra);
                let test: Vec<usize> = order[start..start + size].to_vec();
                let train: Vec<usize> = order[..start]
                    .iter()
                    .chain(&order[start + size..])
                    .copied()
                    .collect();
                out.push((train, test));
                start += size;
            }
        }
        Ok(out)
    }
}

/// Cross-validated penalty selection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ElasticNetCv {
    /// Solver settings
    pub config: ElasticNetConfig,
    /// Penalties on the grid
    pub n_alphas: usize,
    /// Ratio of the smallest to the largest penalty
    pub eps: f64,
    /// Fold generator
    pub folds: RepeatedKFold,
}

impl Default for ElasticNetCv {
    fn default() -> Self {
        Self {
            config: ElasticNetConfig::default(),
            n_alphas: 100,
            eps: 1e-3,
            folds: RepeatedKFold::default(),
        }
    }
}

/// Outcome of cross-validation.
#[derive(Debug, Clone)]
pub struct CvFit {
    /// Penalty with the lowest mean held-out error
    pub best_alpha: f64,
    /// Penalty grid, decreasing
    pub alphas: Vec<f64>,
    /// Mean held-out squared error per penalty
    pub mean_mse: Vec<f64>,
    /// Refit on the full data at `best_alpha`
    pub fit: PenalizedFit,
}

impl ElasticNetCv {
    /// Choose the penalty by repeated K-fold CV and refit on all rows.
    pub fn fit(&self, x: &Array2<f64>, y: &Array1<f64>, weights: &[f64]) -> Result<CvFit> {
        let top = alpha_max(x, y, weights, self.config.l1_ratio)?;
        let alphas = alpha_grid(top, self.n_alphas, self.eps);
        let splits = self.folds.splits(x.nrows())?;

        let mut total_mse = vec![0.0; alphas.len()];
        for (train, test) in &splits {
            let x_train = x.select(Axis(0), train);
            let y_train = y.select(Axis(0), train);
            let x_test = x.select(Axis(0), test);
            let y_test = y.select(Axis(0), test);

            let mut warm: Option<Array1<f64>> = None;
            for (k, &alpha) in alphas.iter().enumerate() {
                let fit = ElasticNet { alpha, config: self.config }.fit_from(
                    &x_train,
                    &y_train,
                    weights,
                    warm.as_ref(),
                )?;
                let err = &y_test - &x_test.dot(&fit.coefficients);
                total_mse[k] += err.dot(&err) / test.len() as f64;
                warm = Some(fit.coefficients);
            }
        }

        let mean_mse: Vec<f64> = total_mse.iter().map(|t| t / splits.len() as f64).collect();
        let best = mean_mse
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.total_cmp(b.1))
            .map(|(k, _)| k)
            .unwrap_or(0);
        let best_alpha = alphas[best];

        log::debug!(
            "cross-validation picked alpha {:.4e} ({} of {} on the grid)",
            best_alpha,
            best + 1,
            alphas.len()
        );

        let fit = ElasticNet {
            alpha: best_alpha,
            config: self.config,
        }
        .fit(x, y, weights)?;

        Ok(CvFit {
            best_alpha,
            alphas,
            mean_mse,
            fit,
        })
    }
}
