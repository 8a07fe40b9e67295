//! Least squares and seemingly-unrelated regression
//!
//! SUR is estimated by two-step feasible GLS: equation-by-equation OLS gives
//! residuals `E`, the residual covariance is `Σ = EᵀE / n` (no degrees of
//! freedom correction), and the stacked system is re-estimated with weight
//! `Σ⁻¹ ⊗ I`. The coefficient covariance is the inverse of the stacked normal
//! matrix, i.e. the unadjusted GLS covariance.
//!
//! When every equation has the same regressors GLS collapses to OLS, and the
//! coefficient covariance is `Σ ⊗ (XᵀX)⁻¹`. That path never inverts `Σ`, so it
//! also works when the residual covariance is singular.

use crate::error::{Result, StatsError};
use crate::linalg::{cholesky, cholesky_inverse, cholesky_solve, spd_inverse};
use ndarray::{Array1, Array2, ArrayView1, s};
use serde::{Deserialize, Serialize};

/// Result of an OLS regression.
#[derive(Debug, Clone)]
pub struct OlsFit {
    /// Estimated coefficients
    pub coefficients: Array1<f64>,
    /// Residuals `y - Xβ`
    pub residuals: Array1<f64>,
    /// `(XᵀX)⁻¹`
    pub xtx_inv: Array2<f64>,
}

/// Ordinary least squares without intercept.
///
/// # Errors
/// `InsufficientData` when there are fewer rows than regressors,
/// `SingularMatrix` (labelled with `context`) when `XᵀX` is rank-deficient.
pub fn ols(x: &Array2<f64>, y: &Array1<f64>, context: &str) -> Result<OlsFit> {
    let (n, k) = x.dim();
    if y.len() != n {
        return Err(StatsError::DimensionMismatch {
            expected: n,
            actual: y.len(),
        });
    }
    if n < k {
        return Err(StatsError::InsufficientData {
            required: k,
            actual: n,
        });
    }

    let xtx = x.t().dot(x);
    let xty = x.t().dot(y);
    let l = cholesky(&xtx, context)?;
    let coefficients = cholesky_solve(&l, &xty)?;
    let residuals = y - &x.dot(&coefficients);
    let xtx_inv = cholesky_inverse(&l)?;

    Ok(OlsFit {
        coefficients,
        residuals,
        xtx_inv,
    })
}

/// One equation of a SUR system.
#[derive(Debug, Clone)]
pub struct SurEquation {
    /// Equation label
    pub name: String,
    /// Dependent variable
    pub y: Array1<f64>,
    /// Regressors (n x k)
    pub x: Array2<f64>,
    /// Regressor names, one per column of `x`
    pub regressors: Vec<String>,
}

impl SurEquation {
    /// Create a new equation
    pub fn new(name: impl Into<String>, y: Array1<f64>, x: Array2<f64>, regressors: Vec<String>) -> Self {
        Self {
            name: name.into(),
            y,
            x,
            regressors,
        }
    }
}

/// Estimation method actually used for a SUR system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SurMethod {
    /// Equation-by-equation OLS (identical regressors or a single equation)
    Ols,
    /// Two-step feasible GLS
    Gls,
}

/// Fitted coefficients of one equation.
#[derive(Debug, Clone)]
pub struct SurEquationFit {
    /// Equation label
    pub name: String,
    /// Regressor names
    pub regressors: Vec<String>,
    /// Coefficients, one per regressor
    pub coefficients: Array1<f64>,
    /// Position of the first coefficient in the stacked parameter vector
    pub offset: usize,
}

impl SurEquationFit {
    /// Coefficient on a named regressor
    pub fn coefficient(&self, regressor: &str) -> Option<f64> {
        self.regressors
            .iter()
            .position(|r| r == regressor)
            .map(|i| self.coefficients[i])
    }
}

/// Fitted SUR system.
#[derive(Debug, Clone)]
pub struct SurFit {
    /// Per-equation results, in input order
    pub equations: Vec<SurEquationFit>,
    /// Covariance of the stacked coefficient vector
    pub coefficient_cov: Array2<f64>,
    /// Residual covariance across equations (first-step OLS residuals)
    pub residual_cov: Array2<f64>,
    /// Final residuals (n x number of equations)
    pub residuals: Array2<f64>,
    /// Method used
    pub method: SurMethod,
}

impl SurFit {
    /// Total number of coefficients
    pub fn n_params(&self) -> usize {
        self.equations.iter().map(|e| e.coefficients.len()).sum()
    }

    /// Coefficients of equation `eq`
    pub fn coefficients(&self, eq: usize) -> ArrayView1<'_, f64> {
        self.equations[eq].coefficients.view()
    }

    /// Index of a named coefficient in the stacked parameter vector
    pub fn param_index(&self, eq: usize, regressor: &str) -> Option<usize> {
        let fit = self.equations.get(eq)?;
        fit.regressors
            .iter()
            .position(|r| r == regressor)
            .map(|i| fit.offset + i)
    }

    /// Sub-matrix of the coefficient covariance for the given stacked indices
    pub fn covariance_block(&self, indices: &[usize]) -> Array2<f64> {
        let m = indices.len();
        let mut block = Array2::<f64>::zeros((m, m));
        for (a, &i) in indices.iter().enumerate() {
            for (b, &j) in indices.iter().enumerate() {
                block[[a, b]] = self.coefficient_cov[[i, j]];
            }
        }
        block
    }
}

/// Estimate a SUR system
///
/// # Errors
/// Dimension mismatches, `InsufficientData` when an equation has more
/// regressors than observations, `SingularMatrix` for a rank-deficient
/// design, residual covariance or stacked normal matrix.
pub fn fit_sur(equations: &[SurEquation]) -> Result<SurFit> {
    let Some(first) = equations.first() else {
        return Err(StatsError::InvalidParameter(
            "SUR system has no equations".to_string(),
        ));
    };
    let n = first.y.len();

    for eq in equations {
        if eq.y.len() != n {
            return Err(StatsError::DimensionMismatch {
                expected: n,
                actual: eq.y.len(),
            });
        }
        if eq.x.nrows() != n {
            return Err(StatsError::DimensionMismatch {
                expected: n,
                actual: eq.x.nrows(),
            });
        }
        if eq.regressors.len() != eq.x.ncols() {
            return Err(StatsError::DimensionMismatch {
                expected: eq.x.ncols(),
                actual: eq.regressors.len(),
            });
        }
    }

    // Step 1: equation-by-equation OLS
    let ols_fits = equations
        .iter()
        .map(|eq| ols(&eq.x, &eq.y, &format!("design of equation {}", eq.name)))
        .collect::<Result<Vec<_>>>()?;

    let n_eq = equations.len();
    let mut residuals = Array2::<f64>::zeros((n, n_eq));
    for (i, fit) in ols_fits.iter().enumerate() {
        residuals.column_mut(i).assign(&fit.residuals);
    }
    let residual_cov = residuals.t().dot(&residuals) / n as f64;

    let mut offsets = Vec::with_capacity(n_eq);
    let mut total = 0;
    for eq in equations {
        offsets.push(total);
        total += eq.x.ncols();
    }

    let identical = equations.iter().all(|eq| eq.x == first.x);

    if n_eq == 1 || identical {
        let xtx_inv = &ols_fits[0].xtx_inv;
        let k = first.x.ncols();
        let mut coefficient_cov = Array2::<f64>::zeros((total, total));
        for i in 0..n_eq {
            for j in 0..n_eq {
                let block = xtx_inv * residual_cov[[i, j]];
                coefficient_cov
                    .slice_mut(s![offsets[i]..offsets[i] + k, offsets[j]..offsets[j] + k])
                    .assign(&block);
            }
        }

        let fits = equations
            .iter()
            .zip(ols_fits)
            .zip(&offsets)
            .map(|((eq, fit), &offset)| SurEquationFit {
                name: eq.name.clone(),
                regressors: eq.regressors.clone(),
                coefficients: fit.coefficients,
                offset,
            })
            .collect();

        return Ok(SurFit {
            equations: fits,
            coefficient_cov,
            residual_cov,
            residuals,
            method: SurMethod::Ols,
        });
    }

    // Step 2: GLS on the stacked system with weight Σ⁻¹ ⊗ I
    let sigma_inv = spd_inverse(&residual_cov, "residual covariance of SUR system")?;

    let mut normal = Array2::<f64>::zeros((total, total));
    let mut rhs = Array1::<f64>::zeros(total);
    for i in 0..n_eq {
        let xi = &equations[i].x;
        let ki = xi.ncols();
        for j in i..n_eq {
            let xj = &equations[j].x;
            let kj = xj.ncols();
            let cross = xi.t().dot(xj) * sigma_inv[[i, j]];
            normal
                .slice_mut(s![offsets[i]..offsets[i] + ki, offsets[j]..offsets[j] + kj])
                .assign(&cross);
            if i != j {
                normal
                    .slice_mut(s![offsets[j]..offsets[j] + kj, offsets[i]..offsets[i] + ki])
                    .assign(&cross.t());
            }
        }
        let mut b = Array1::<f64>::zeros(ki);
        for j in 0..n_eq {
            b = b + xi.t().dot(&equations[j].y) * sigma_inv[[i, j]];
        }
        rhs.slice_mut(s![offsets[i]..offsets[i] + ki]).assign(&b);
    }

    let l = cholesky(&normal, "stacked GLS normal matrix")?;
    let beta = cholesky_solve(&l, &rhs)?;
    let coefficient_cov = cholesky_inverse(&l)?;

    let mut fits = Vec::with_capacity(n_eq);
    for (i, eq) in equations.iter().enumerate() {
        let k = eq.x.ncols();
        let coefficients = beta.slice(s![offsets[i]..offsets[i] + k]).to_owned();
        let resid = &eq.y - &eq.x.dot(&coefficients);
        residuals.column_mut(i).assign(&resid);
        fits.push(SurEquationFit {
            name: eq.name.clone(),
            regressors: eq.regressors.clone(),
            coefficients,
            offset: offsets[i],
        });
    }

    Ok(SurFit {
        equations: fits,
        coefficient_cov,
        residual_cov,
        residuals,
        method: SurMethod::Gls,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array, array};

    fn pseudo_noise(n: usize, phase: f64) -> Array1<f64> {
        Array::from_iter((0..n).map(|i| ((i as f64) * 1.7 + phase).sin() * 0.01))
    }

    #[test]
    fn test_ols_simple_regression() {
        // y = 1 + 2x
        let x = array![[1.0, 0.0], [1.0, 1.0], [1.0, 2.0], [1.0, 3.0], [1.0, 4.0]];
        let y = array![1.0, 3.0, 5.0, 7.0, 9.0];

        let fit = ols(&x, &y, "simple").unwrap();
        assert_abs_diff_eq!(fit.coefficients[0], 1.0, epsilon = 1e-10);
        assert_abs_diff_eq!(fit.coefficients[1], 2.0, epsilon = 1e-10);
        assert!(fit.residuals.iter().all(|r| r.abs() < 1e-10));
    }

    #[test]
    fn test_ols_singular_design() {
        // Column 2 is 2 * column 1
        let x = array![[1.0, 2.0], [1.0, 2.0], [1.0, 2.0]];
        let y = array![1.0, 2.0, 3.0];

        let err = ols(&x, &y, "collinear").unwrap_err();
        assert!(matches!(err, StatsError::SingularMatrix { .. }));
    }

    #[test]
    fn test_ols_insufficient_rows() {
        let x = array![[1.0, 2.0, 3.0]];
        let y = array![1.0];
        assert!(matches!(
            ols(&x, &y, "short"),
            Err(StatsError::InsufficientData { required: 3, actual: 1 })
        ));
    }

    #[test]
    fn test_sur_identical_regressors_is_ols() {
        let n = 40;
        let x = Array2::from_shape_fn((n, 2), |(i, j)| if j == 0 { 1.0 } else { i as f64 / 10.0 });
        let y1 = x.column(1).mapv(|v| 0.5 + 1.5 * v) + pseudo_noise(n, 0.0);
        let y2 = x.column(1).mapv(|v| -0.2 + 0.7 * v) + pseudo_noise(n, 1.3);
        let names = vec!["const".to_string(), "slope".to_string()];

        let system = vec![
            SurEquation::new("eq1", y1.clone(), x.clone(), names.clone()),
            SurEquation::new("eq2", y2.clone(), x.clone(), names),
        ];
        let fit = fit_sur(&system).unwrap();
        assert_eq!(fit.method, SurMethod::Ols);

        let ols1 = ols(&x, &y1, "eq1").unwrap();
        let ols2 = ols(&x, &y2, "eq2").unwrap();
        for j in 0..2 {
            assert_abs_diff_eq!(fit.equations[0].coefficients[j], ols1.coefficients[j], epsilon = 1e-12);
            assert_abs_diff_eq!(fit.equations[1].coefficients[j], ols2.coefficients[j], epsilon = 1e-12);
        }

        // Cross-equation block is σ12 (X'X)^-1
        let i = fit.param_index(0, "slope").unwrap();
        let j = fit.param_index(1, "slope").unwrap();
        assert_eq!((i, j), (1, 3));
        assert_abs_diff_eq!(
            fit.coefficient_cov[[i, j]],
            fit.residual_cov[[0, 1]] * ols1.xtx_inv[[1, 1]],
            epsilon = 1e-15
        );
        assert_eq!(fit.equations[1].coefficient("const"), Some(fit.equations[1].coefficients[0]));
    }

    #[test]
    fn test_sur_gls_recovers_coefficients() {
        let n = 60;
        let x1 = Array2::from_shape_fn((n, 1), |(i, _)| (i as f64 * 0.37).cos() + 2.0);
        let x2 = Array2::from_shape_fn((n, 2), |(i, j)| {
            if j == 0 { 1.0 } else { (i as f64 * 0.11).sin() }
        });
        let shared = pseudo_noise(n, 0.4);
        let y1 = x1.column(0).mapv(|v| 2.0 * v) + &shared + pseudo_noise(n, 2.0) * 0.5;
        let y2 = x2.column(1).mapv(|v| 1.0 - v) + &shared;

        let system = vec![
            SurEquation::new("eq1", y1, x1, vec!["a".to_string()]),
            SurEquation::new("eq2", y2, x2, vec!["c".to_string(), "b".to_string()]),
        ];
        let fit = fit_sur(&system).unwrap();

        assert_eq!(fit.method, SurMethod::Gls);
        assert_eq!(fit.n_params(), 3);
        assert_abs_diff_eq!(fit.equations[0].coefficients[0], 2.0, epsilon = 1e-2);
        assert_abs_diff_eq!(fit.equations[1].coefficients[0], 1.0, epsilon = 1e-2);
        assert_abs_diff_eq!(fit.equations[1].coefficients[1], -1.0, epsilon = 2e-2);

        // Covariance is symmetric and has a positive diagonal
        for i in 0..3 {
            assert!(fit.coefficient_cov[[i, i]] > 0.0);
            for j in 0..3 {
                assert_abs_diff_eq!(fit.coefficient_cov[[i, j]], fit.coefficient_cov[[j, i]], epsilon = 1e-18);
            }
        }
    }

    #[test]
    fn test_sur_rejects_mismatched_rows() {
        let system = vec![
            SurEquation::new("eq1", array![1.0, 2.0], array![[1.0], [2.0]], vec!["a".to_string()]),
            SurEquation::new("eq2", array![1.0], array![[1.0]], vec!["a".to_string()]),
        ];
        assert!(matches!(fit_sur(&system), Err(StatsError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_sur_empty_system() {
        assert!(fit_sur(&[]).is_err());
    }
}
