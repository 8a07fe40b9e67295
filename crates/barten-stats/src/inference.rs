//! Sample moments, Wald tests and bootstrap summaries.

use crate::error::{Result, StatsError};
use crate::linalg::gauss_solve;
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ChiSquared, ContinuousCDF};

/// Sample standard deviation with divisor `n - 1`.
///
/// Non-finite values are skipped. Returns `None` with fewer than two finite
/// values: a spread computed from one draw is undefined, not zero.
pub fn sample_std(values: &[f64]) -> Option<f64> {
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    let n = finite.len();
    if n < 2 {
        return None;
    }
    let mean = finite.iter().sum::<f64>() / n as f64;
    let ss = finite.iter().map(|v| (v - mean).powi(2)).sum::<f64>();
    Some((ss / (n - 1) as f64).sqrt())
}

/// Sample covariance of the columns of `x` (rows are observations), divisor
/// `n - 1`.
pub fn sample_covariance(x: &Array2<f64>) -> Result<Array2<f64>> {
    let n = x.nrows();
    if n < 2 {
        return Err(StatsError::InsufficientData {
            required: 2,
            actual: n,
        });
    }
    let mean = x.mean_axis(Axis(0)).ok_or(StatsError::InsufficientData {
        required: 2,
        actual: n,
    })?;
    let centered = x - &mean;
    Ok(centered.t().dot(&centered) / (n - 1) as f64)
}

/// Outcome of a Wald test.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WaldTest {
    /// `dᵀ V⁻¹ d`
    pub statistic: f64,
    /// Number of restrictions
    pub df: usize,
    /// Upper-tail χ² probability
    pub p_value: f64,
}

impl WaldTest {
    /// Whether the null is rejected at level `alpha`
    pub fn rejects(&self, alpha: f64) -> bool {
        self.p_value < alpha
    }
}

/// Wald test of `d = 0` given the covariance `V` of `d`.
///
/// # Errors
/// `SingularMatrix` when `V` is not invertible or the quadratic form is
/// negative.
pub fn wald_test(diff: &Array1<f64>, cov: &Array2<f64>) -> Result<WaldTest> {
    let df = diff.len();
    if df == 0 {
        return Err(StatsError::InvalidParameter(
            "Wald test with no restrictions".to_string(),
        ));
    }
    if cov.dim() != (df, df) {
        return Err(StatsError::DimensionMismatch {
            expected: df,
            actual: cov.nrows(),
        });
    }
    if diff.iter().chain(cov.iter()).any(|v| !v.is_finite()) {
        return Err(StatsError::NonFinite("Wald test inputs".to_string()));
    }

    let solved = gauss_solve(cov, diff, "Wald covariance")?;
    let statistic = diff.dot(&solved);
    if statistic < 0.0 {
        return Err(StatsError::SingularMatrix {
            context: "Wald covariance (not positive definite)".to_string(),
        });
    }

    let chi = ChiSquared::new(df as f64).map_err(|e| StatsError::InvalidParameter(e.to_string()))?;
    Ok(WaldTest {
        statistic,
        df,
        p_value: chi.sf(statistic),
    })
}

/// Component-wise bootstrap standard errors.
///
/// Each replicate is one vector of statistics; all must have the same length.
/// The standard error of a component is the sample standard deviation across
/// replicates, `None` when fewer than two replicates carry a finite value.
pub fn bootstrap_standard_errors(replicates: &[Array1<f64>]) -> Result<Vec<Option<f64>>> {
    let Some(first) = replicates.first() else {
        return Ok(Vec::new());
    };
    let k = first.len();
    if let Some(bad) = replicates.iter().find(|r| r.len() != k) {
        return Err(StatsError::DimensionMismatch {
            expected: k,
            actual: bad.len(),
        });
    }

    Ok((0..k)
        .map(|j| {
            let column: Vec<f64> = replicates.iter().map(|r| r[j]).collect();
            sample_std(&column)
        })
        .collect())
}
