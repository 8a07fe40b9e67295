//! Nearest positive-semidefinite projection
//!
//! Estimated covariance matrices (delta-method covariances, covariances of
//! random Barten scales recovered from regressions) need not be positive
//! semidefinite. This module projects a symmetric matrix onto the PSD cone in
//! the Frobenius norm: eigendecompose the symmetric part, clip the eigenvalues
//! from below, and reconstruct. The size of the adjustment is reported so
//! callers can flag estimates that needed a large correction.

use crate::error::{Result, StatsError};
use crate::linalg::{frobenius_norm, symmetrize};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

/// Configuration for the nearest-PSD projection
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProjectionConfig {
    /// Lower bound imposed on the eigenvalues (default: 0.0, i.e. PSD)
    pub min_eigenvalue: f64,
    /// Maximum number of Jacobi sweeps (default: 100)
    pub max_sweeps: usize,
    /// Convergence tolerance, relative to the Frobenius norm (default: 1e-12)
    pub tolerance: f64,
    /// Relative adjustment above which the estimate is flagged as unstable
    /// (default: 0.05)
    pub instability_threshold: f64,
}

impl Default for ProjectionConfig {
    fn default() -> Self {
        Self {
            min_eigenvalue: 0.0,
            max_sweeps: 100,
            tolerance: 1e-12,
            instability_threshold: 0.05,
        }
    }
}

/// Result of eigenvalue decomposition
#[derive(Debug, Clone)]
pub struct EigenDecomposition {
    /// Eigenvalues (sorted in descending order)
    pub eigenvalues: Array1<f64>,
    /// Eigenvectors (columns are eigenvectors)
    pub eigenvectors: Array2<f64>,
}

/// How far the projection moved the input.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProjectionDiagnostic {
    /// Frobenius norm of `projected - input`
    pub adjustment: f64,
    /// `adjustment / ||input||_F` (zero for a zero input)
    pub relative_adjustment: f64,
    /// Smallest eigenvalue of the symmetric part of the input
    pub min_eigenvalue: f64,
    /// Number of eigenvalues that were raised to the lower bound
    pub clipped_eigenvalues: usize,
    /// Ratio of the largest to the smallest eigenvalue of the output, `None`
    /// when the output is singular
    pub condition_number: Option<f64>,
    /// Whether the relative adjustment exceeded the instability threshold
    pub unstable: bool,
}

/// A projected matrix together with its diagnostic.
#[derive(Debug, Clone)]
pub struct Projection {
    /// Symmetric positive-semidefinite matrix
    pub matrix: Array2<f64>,
    /// Size of the adjustment
    pub diagnostic: ProjectionDiagnostic,
}

/// Project a matrix onto the nearest positive-semidefinite matrix
///
/// The input is symmetrised first. Eigenvalues below
/// `config.min_eigenvalue` (by more than the convergence tolerance) are raised
/// to it. With `min_eigenvalue = 0` this is the Frobenius-nearest PSD
/// matrix. A matrix that already satisfies the bound is returned unchanged
/// (after symmetrisation), so the projection is idempotent.
///
/// # Errors
/// Non-square or non-finite input, or a Jacobi iteration that fails to
/// converge.
pub fn nearest_psd(matrix: &Array2<f64>, config: &ProjectionConfig) -> Result<Projection> {
    let n = matrix.nrows();
    if n != matrix.ncols() {
        return Err(StatsError::DimensionMismatch {
            expected: n,
            actual: matrix.ncols(),
        });
    }
    if matrix.iter().any(|v| !v.is_finite()) {
        return Err(StatsError::NonFinite("matrix to project".to_string()));
    }

    let sym = symmetrize(matrix);
    let decomp = jacobi_eigendecomp(&sym, config.max_sweeps, config.tolerance)?;

    let min_eigenvalue = decomp
        .eigenvalues
        .iter()
        .copied()
        .fold(f64::INFINITY, f64::min);
    let slack = config.tolerance * frobenius_norm(&sym);

    let mut clipped = decomp.eigenvalues.clone();
    let mut clipped_eigenvalues = 0;
    for val in clipped.iter_mut() {
        if *val < config.min_eigenvalue - slack {
            *val = config.min_eigenvalue;
            clipped_eigenvalues += 1;
        }
    }

    let projected = if clipped_eigenvalues == 0 {
        sym
    } else {
        symmetrize(&reconstruct_from_eigen(&clipped, &decomp.eigenvectors)?)
    };

    let max_out = clipped.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let min_out = clipped.iter().copied().fold(f64::INFINITY, f64::min);
    let condition_number = (n > 0 && min_out > 0.0).then(|| max_out / min_out);

    let input_norm = frobenius_norm(matrix);
    let adjustment = frobenius_norm(&(&projected - matrix));
    let relative_adjustment = if input_norm > 0.0 {
        adjustment / input_norm
    } else {
        0.0
    };

    Ok(Projection {
        matrix: projected,
        diagnostic: ProjectionDiagnostic {
            adjustment,
            relative_adjustment,
            min_eigenvalue: if n == 0 { 0.0 } else { min_eigenvalue },
            clipped_eigenvalues,
            condition_number,
            unstable: relative_adjustment > config.instability_threshold,
        },
    })
}

/// Check whether a symmetric matrix is positive semidefinite
///
/// Eigenvalues down to `-tolerance * ||m||_F` are accepted.
pub fn is_positive_semidefinite(m: &Array2<f64>, tolerance: f64) -> bool {
    if m.nrows() != m.ncols() {
        return false;
    }

    let floor = -tolerance * frobenius_norm(m);
    match jacobi_eigendecomp(m, 100, 1e-14) {
        Ok(decomp) => decomp.eigenvalues.iter().all(|&v| v >= floor),
        Err(_) => false,
    }
}

/// Convert a covariance matrix to a correlation matrix
///
/// # Errors
/// `DegenerateVariance` if a diagonal element is not strictly positive.
pub fn cov_to_cor(cov: &Array2<f64>) -> Result<Array2<f64>> {
    let n = cov.nrows();
    if n != cov.ncols() {
        return Err(StatsError::DimensionMismatch {
            expected: n,
            actual: cov.ncols(),
        });
    }

    let mut std_devs = Array1::<f64>::zeros(n);
    for i in 0..n {
        let var = cov[[i, i]];
        if var.is_nan() || var <= 0.0 {
            return Err(StatsError::DegenerateVariance(i));
        }
        std_devs[i] = var.sqrt();
    }

    let mut cor = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        for j in 0..n {
            cor[[i, j]] = cov[[i, j]] / (std_devs[i] * std_devs[j]);
        }
    }
    Ok(cor)
}

/// Eigenvalues (descending) and eigenvectors of a symmetric matrix.
///
/// Classical Jacobi: each rotation zeroes the off-diagonal entry of largest
/// magnitude. The budget is `max_sweeps` times `n(n-1)/2` rotations, and the
/// matrix counts as diagonal once no off-diagonal entry exceeds
/// `tolerance * ||matrix||_F`.
///
/// # Errors
/// `DimensionMismatch` for a non-square matrix, `NotConverged` when the
/// rotation budget runs out.
pub fn jacobi_eigendecomp(
    matrix: &Array2<f64>,
    max_sweeps: usize,
    tolerance: f64,
) -> Result<EigenDecomposition> {
    let n = matrix.nrows();
    if n != matrix.ncols() {
        return Err(StatsError::DimensionMismatch {
            expected: n,
            actual: matrix.ncols(),
        });
    }

    let mut a = matrix.clone();
    let mut v = Array2::<f64>::eye(n);

    let threshold = tolerance * frobenius_norm(matrix);
    let max_rotations = max_sweeps.max(1) * (n * n.saturating_sub(1) / 2).max(1);
    let mut converged = n < 2;

    for _ in 0..max_rotations {
        if n < 2 {
            break;
        }

        let (p, q, max_val) = largest_off_diagonal(&a);
        if max_val.abs() <= threshold {
            converged = true;
            break;
        }

        let (c, s) = rotation(a[[p, p]], a[[q, q]], a[[p, q]]);
        rotate(&mut a, &mut v, p, q, c, s);
    }

    if !converged {
        let (_, _, max_val) = largest_off_diagonal(&a);
        if max_val.abs() > threshold {
            return Err(StatsError::NotConverged {
                routine: "Jacobi eigendecomposition",
                iterations: max_rotations,
            });
        }
    }

    let eigenvalues: Array1<f64> = a.diag().to_owned();
    let mut indices: Vec<usize> = (0..n).collect();
    indices.sort_by(|&i, &j| eigenvalues[j].total_cmp(&eigenvalues[i]));

    let sorted_eigenvalues = indices.iter().map(|&i| eigenvalues[i]).collect();
    let mut sorted_eigenvectors = Array2::<f64>::zeros((n, n));
    for (new_idx, &old_idx) in indices.iter().enumerate() {
        sorted_eigenvectors
            .column_mut(new_idx)
            .assign(&v.column(old_idx));
    }

    Ok(EigenDecomposition {
        eigenvalues: sorted_eigenvalues,
        eigenvectors: sorted_eigenvectors,
    })
}

/// Position and value of the off-diagonal entry of largest magnitude.
fn largest_off_diagonal(matrix: &Array2<f64>) -> (usize, usize, f64) {
    let n = matrix.nrows();
    let mut max_val = 0.0;
    let mut p = 0;
    let mut q = 1.min(n.saturating_sub(1));

    for i in 0..n {
        for j in (i + 1)..n {
            let val = matrix[[i, j]].abs();
            if val > max_val {
                max_val = val;
                p = i;
                q = j;
            }
        }
    }

    (p, q, matrix[[p, q]])
}

/// `(c, s)` of the plane rotation that zeroes `a_pq`.
fn rotation(app: f64, aqq: f64, apq: f64) -> (f64, f64) {
    if apq.abs() < 1e-300 {
        return (1.0, 0.0);
    }

    let tau = (aqq - app) / (2.0 * apq);
    let t = if tau >= 0.0 {
        1.0 / (tau + (1.0 + tau * tau).sqrt())
    } else {
        -1.0 / (-tau + (1.0 + tau * tau).sqrt())
    };

    let c = 1.0 / (1.0 + t * t).sqrt();
    let s = t * c;

    (c, s)
}

/// Rotate `a` in the `(p, q)` plane and accumulate the rotation into `v`.
fn rotate(a: &mut Array2<f64>, v: &mut Array2<f64>, p: usize, q: usize, c: f64, s: f64) {
    let n = a.nrows();

    let app = a[[p, p]];
    let aqq = a[[q, q]];
    let apq = a[[p, q]];

    a[[p, p]] = c * c * app - 2.0 * c * s * apq + s * s * aqq;
    a[[q, q]] = s * s * app + 2.0 * c * s * apq + c * c * aqq;
    a[[p, q]] = 0.0;
    a[[q, p]] = 0.0;

    // a stays symmetric, so each row update mirrors into the column
    for i in 0..n {
        if i != p && i != q {
            let aip = a[[i, p]];
            let aiq = a[[i, q]];

            a[[i, p]] = c * aip - s * aiq;
            a[[p, i]] = a[[i, p]];

            a[[i, q]] = s * aip + c * aiq;
            a[[q, i]] = a[[i, q]];
        }
    }

    for i in 0..n {
        let vip = v[[i, p]];
        let viq = v[[i, q]];

        v[[i, p]] = c * vip - s * viq;
        v[[i, q]] = s * vip + c * viq;
    }
}

/// `V Λ Vᵀ`
fn reconstruct_from_eigen(
    eigenvalues: &Array1<f64>,
    eigenvectors: &Array2<f64>,
) -> Result<Array2<f64>> {
    let n = eigenvalues.len();
    if eigenvectors.nrows() != n || eigenvectors.ncols() != n {
        return Err(StatsError::DimensionMismatch {
            expected: n,
            actual: eigenvectors.nrows(),
        });
    }

    let mut v_lambda = eigenvectors.clone();
    for (j, &lambda) in eigenvalues.iter().enumerate() {
        v_lambda.column_mut(j).mapv_inplace(|x| x * lambda);
    }

    Ok(v_lambda.dot(&eigenvectors.t()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use rstest::rstest;

    fn assert_matrix_eq(a: &Array2<f64>, b: &Array2<f64>, epsilon: f64) {
        assert_eq!(a.dim(), b.dim());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_abs_diff_eq!(*x, *y, epsilon = epsilon);
        }
    }

    /// Seeded symmetric matrices of varying definiteness
    fn symmetric_fixture(seed: u64, n: usize) -> Array2<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut m = Array2::<f64>::zeros((n, n));
        for i in 0..n {
            for j in i..n {
                let v = rng.gen_range(-1.0..1.0);
                m[[i, j]] = v;
                m[[j, i]] = v;
            }
        }
        m
    }

    #[test]
    fn test_jacobi_eigendecomp_diagonal() {
        let matrix = array![[4.0, 0.0, 0.0], [0.0, 2.0, 0.0], [0.0, 0.0, 1.0]];
        let decomp = jacobi_eigendecomp(&matrix, 100, 1e-12).unwrap();

        assert_abs_diff_eq!(decomp.eigenvalues[0], 4.0, epsilon = 1e-10);
        assert_abs_diff_eq!(decomp.eigenvalues[1], 2.0, epsilon = 1e-10);
        assert_abs_diff_eq!(decomp.eigenvalues[2], 1.0, epsilon = 1e-10);
    }

    #[test]
    fn test_jacobi_eigendecomp_reconstructs() {
        let matrix = array![[2.0, 1.0, 1.0], [1.0, 2.0, 1.0], [1.0, 1.0, 2.0]];
        let decomp = jacobi_eigendecomp(&matrix, 100, 1e-14).unwrap();
        let rebuilt = reconstruct_from_eigen(&decomp.eigenvalues, &decomp.eigenvectors).unwrap();

        assert_matrix_eq(&rebuilt, &matrix, 1e-10);
        assert_abs_diff_eq!(decomp.eigenvalues[0], 4.0, epsilon = 1e-10);
    }

    #[test]
    fn test_nearest_psd_known_solution() {
        // [[1, 2], [2, 1]] has eigenvalues 3 and -1; clipping leaves 3 * vv'
        let matrix = array![[1.0, 2.0], [2.0, 1.0]];
        let projection = nearest_psd(&matrix, &ProjectionConfig::default()).unwrap();

        let expected = array![[1.5, 1.5], [1.5, 1.5]];
        assert_matrix_eq(&projection.matrix, &expected, 1e-10);
        assert_abs_diff_eq!(projection.diagnostic.adjustment, 1.0, epsilon = 1e-10);
        assert_abs_diff_eq!(projection.diagnostic.min_eigenvalue, -1.0, epsilon = 1e-10);
        assert_eq!(projection.diagnostic.clipped_eigenvalues, 1);
        assert_eq!(projection.diagnostic.condition_number, None);
        assert!(projection.diagnostic.unstable);
    }

    #[test]
    fn test_nearest_psd_is_closest_among_candidates() {
        let matrix = array![[1.0, 2.0], [2.0, 1.0]];
        let projection = nearest_psd(&matrix, &ProjectionConfig::default()).unwrap();
        let best = frobenius_norm(&(&projection.matrix - &matrix));

        // Other PSD matrices are never closer
        let candidates = [
            array![[1.0, 1.0], [1.0, 1.0]],
            array![[2.0, 2.0], [2.0, 2.0]],
            array![[1.6, 1.4], [1.4, 1.6]],
            array![[1.0, 0.0], [0.0, 1.0]],
            array![[1.5, 1.5], [1.5, 1.6]],
        ];
        for candidate in &candidates {
            assert!(is_positive_semidefinite(candidate, 1e-12));
            assert!(frobenius_norm(&(candidate - &matrix)) >= best - 1e-12);
        }
    }

    #[rstest]
    #[case(1, 3)]
    #[case(2, 4)]
    #[case(3, 5)]
    #[case(4, 5)]
    #[case(5, 6)]
    fn test_nearest_psd_matches_reference_clipping(#[case] seed: u64, #[case] n: usize) {
        let matrix = symmetric_fixture(seed, n);
        let projection = nearest_psd(&matrix, &ProjectionConfig::default()).unwrap();

        // Reference: clip every negative eigenvalue at zero
        let decomp = jacobi_eigendecomp(&matrix, 100, 1e-14).unwrap();
        let reference = reconstruct_from_eigen(
            &decomp.eigenvalues.mapv(|v| v.max(0.0)),
            &decomp.eigenvectors,
        )
        .unwrap();

        assert_matrix_eq(&projection.matrix, &reference, 1e-9);
        assert_matrix_eq(&projection.matrix, &projection.matrix.t().to_owned(), 1e-14);
        assert!(is_positive_semidefinite(&projection.matrix, 1e-9));
    }

    #[rstest]
    #[case(7, 3)]
    #[case(8, 5)]
    #[case(9, 6)]
    fn test_nearest_psd_idempotent(#[case] seed: u64, #[case] n: usize) {
        let config = ProjectionConfig::default();
        let once = nearest_psd(&symmetric_fixture(seed, n), &config).unwrap();
        let twice = nearest_psd(&once.matrix, &config).unwrap();

        assert_matrix_eq(&twice.matrix, &once.matrix, 1e-10);
        assert!(twice.diagnostic.adjustment < 1e-9);
        assert!(!twice.diagnostic.unstable);
    }

    #[test]
    fn test_nearest_psd_leaves_pd_matrix_alone() {
        let matrix = array![[2.0, 0.3], [0.3, 1.0]];
        let projection = nearest_psd(&matrix, &ProjectionConfig::default()).unwrap();

        assert_eq!(projection.matrix, matrix);
        assert_eq!(projection.diagnostic.clipped_eigenvalues, 0);
        assert_eq!(projection.diagnostic.adjustment, 0.0);
        assert!(projection.diagnostic.condition_number.is_some_and(|c| c > 1.0));
    }

    #[test]
    fn test_nearest_psd_rejects_non_finite() {
        let matrix = array![[1.0, f64::NAN], [f64::NAN, 1.0]];
        let err = nearest_psd(&matrix, &ProjectionConfig::default()).unwrap_err();
        assert!(matches!(err, StatsError::NonFinite(_)));
    }

    #[test]
    fn test_small_adjustment_is_not_flagged() {
        // Eigenvalues 1.001 and -0.001: a tiny correction
        let matrix = array![[0.5, 0.501], [0.501, 0.5]];
        let projection = nearest_psd(&matrix, &ProjectionConfig::default()).unwrap();

        assert_eq!(projection.diagnostic.clipped_eigenvalues, 1);
        assert!(projection.diagnostic.relative_adjustment < 0.01);
        assert!(!projection.diagnostic.unstable);
    }

    #[test]
    fn test_cov_to_cor() {
        let cov = array![[4.0, 1.0], [1.0, 9.0]];
        let cor = cov_to_cor(&cov).unwrap();

        assert_abs_diff_eq!(cor[[0, 0]], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(cor[[1, 1]], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(cor[[0, 1]], 1.0 / 6.0, epsilon = 1e-12);
    }

    #[test]
    fn test_cov_to_cor_zero_variance() {
        let cov = array![[1.0, 0.0], [0.0, 0.0]];
        assert!(matches!(
            cov_to_cor(&cov),
            Err(StatsError::DegenerateVariance(1))
        ));
    }
}
