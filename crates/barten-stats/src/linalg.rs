//! Dense linear algebra kernels.
//!
//! Everything here works on small-to-moderate symmetric systems (normal
//! equations, coefficient covariances), so a plain Cholesky factorisation is
//! enough. Rank deficiency is detected relative to each column's own scale:
//! a pivot is rejected when less than [`SINGULAR_TOLERANCE`] of the diagonal
//! survives elimination, i.e. when the column is (numerically) a linear
//! combination of the previous ones. Symmetric but indefinite systems go
//! through [`gauss_solve`] instead.

use crate::error::{Result, StatsError};
use ndarray::{Array1, Array2};

/// Relative pivot tolerance used to declare a matrix singular.
pub const SINGULAR_TOLERANCE: f64 = 1e-10;

/// Lower-triangular Cholesky factor `L` with `A = L Lᵀ`.
///
/// # Arguments
/// * `a` - Symmetric positive definite matrix
/// * `context` - Label used in the error if `a` is singular
pub fn cholesky(a: &Array2<f64>, context: &str) -> Result<Array2<f64>> {
    let n = a.nrows();
    if n != a.ncols() {
        return Err(StatsError::DimensionMismatch {
            expected: n,
            actual: a.ncols(),
        });
    }

    let mut l = Array2::<f64>::zeros((n, n));
    for j in 0..n {
        let diag = a[[j, j]];
        let mut sum = diag;
        for k in 0..j {
            sum -= l[[j, k]] * l[[j, k]];
        }

        if !sum.is_finite() || diag <= 0.0 || sum <= SINGULAR_TOLERANCE * diag {
            return Err(StatsError::SingularMatrix {
                context: context.to_string(),
            });
        }

        let pivot = sum.sqrt();
        l[[j, j]] = pivot;

        for i in (j + 1)..n {
            let mut s = a[[i, j]];
            for k in 0..j {
                s -= l[[i, k]] * l[[j, k]];
            }
            l[[i, j]] = s / pivot;
        }
    }

    Ok(l)
}

/// Solve `L Lᵀ x = b` given the Cholesky factor `L`.
pub fn cholesky_solve(l: &Array2<f64>, b: &Array1<f64>) -> Result<Array1<f64>> {
    let n = l.nrows();
    if b.len() != n {
        return Err(StatsError::DimensionMismatch {
            expected: n,
            actual: b.len(),
        });
    }

    // Forward substitution: L z = b
    let mut z = Array1::<f64>::zeros(n);
    for i in 0..n {
        let mut sum = b[i];
        for k in 0..i {
            sum -= l[[i, k]] * z[k];
        }
        z[i] = sum / l[[i, i]];
    }

    // Back substitution: Lᵀ x = z
    let mut x = Array1::<f64>::zeros(n);
    for i in (0..n).rev() {
        let mut sum = z[i];
        for k in (i + 1)..n {
            sum -= l[[k, i]] * x[k];
        }
        x[i] = sum / l[[i, i]];
    }

    Ok(x)
}

/// Solve the SPD system `A x = b`.
pub fn spd_solve(a: &Array2<f64>, b: &Array1<f64>, context: &str) -> Result<Array1<f64>> {
    let l = cholesky(a, context)?;
    cholesky_solve(&l, b)
}

/// Solve a general square system `A x = b` by Gaussian elimination with
/// partial pivoting.
///
/// A pivot smaller than [`SINGULAR_TOLERANCE`] times the largest absolute
/// entry of `A` marks the system as singular.
pub fn gauss_solve(a: &Array2<f64>, b: &Array1<f64>, context: &str) -> Result<Array1<f64>> {
    let n = a.nrows();
    if a.ncols() != n {
        return Err(StatsError::DimensionMismatch {
            expected: n,
            actual: a.ncols(),
        });
    }
    if b.len() != n {
        return Err(StatsError::DimensionMismatch {
            expected: n,
            actual: b.len(),
        });
    }

    let scale = a.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
    let singular = || StatsError::SingularMatrix {
        context: context.to_string(),
    };
    if !scale.is_finite() || (n > 0 && scale == 0.0) {
        return Err(singular());
    }

    // Augmented matrix [A | b]
    let mut aug = Array2::<f64>::zeros((n, n + 1));
    aug.slice_mut(ndarray::s![.., ..n]).assign(a);
    aug.column_mut(n).assign(b);

    for col in 0..n {
        let mut pivot_row = col;
        let mut pivot = aug[[col, col]].abs();
        for row in (col + 1)..n {
            if aug[[row, col]].abs() > pivot {
                pivot = aug[[row, col]].abs();
                pivot_row = row;
            }
        }
        if pivot <= SINGULAR_TOLERANCE * scale {
            return Err(singular());
        }

        if pivot_row != col {
            for j in 0..=n {
                aug.swap([col, j], [pivot_row, j]);
            }
        }

        for row in (col + 1)..n {
            let factor = aug[[row, col]] / aug[[col, col]];
            for j in col..=n {
                aug[[row, j]] -= factor * aug[[col, j]];
            }
        }
    }

    let mut x = Array1::<f64>::zeros(n);
    for i in (0..n).rev() {
        let mut sum = aug[[i, n]];
        for j in (i + 1)..n {
            sum -= aug[[i, j]] * x[j];
        }
        x[i] = sum / aug[[i, i]];
    }

    Ok(x)
}

/// Inverse of a symmetric positive definite matrix.
pub fn spd_inverse(a: &Array2<f64>, context: &str) -> Result<Array2<f64>> {
    let l = cholesky(a, context)?;
    cholesky_inverse(&l)
}

/// Inverse of `L Lᵀ` given the Cholesky factor `L`.
pub fn cholesky_inverse(l: &Array2<f64>) -> Result<Array2<f64>> {
    let n = l.nrows();
    let mut inv = Array2::<f64>::zeros((n, n));
    let mut unit = Array1::<f64>::zeros(n);
    for j in 0..n {
        unit[j] = 1.0;
        let column = cholesky_solve(l, &unit)?;
        inv.column_mut(j).assign(&column);
        unit[j] = 0.0;
    }

    Ok(symmetrize(&inv))
}

/// Return `(M + Mᵀ) / 2`.
pub fn symmetrize(m: &Array2<f64>) -> Array2<f64> {
    (m + &m.t()) / 2.0
}

/// Frobenius norm of a matrix.
pub fn frobenius_norm(m: &Array2<f64>) -> f64 {
    m.iter().map(|&v| v * v).sum::<f64>().sqrt()
}

/// Number of entries in the upper triangle (diagonal included) of an `n x n` matrix.
pub const fn triangle_len(n: usize) -> usize {
    n * (n + 1) / 2
}

/// Pack the upper triangle of a square matrix, row by row.
///
/// The order is `(0,0), (0,1), ..., (0,n-1), (1,1), ...`, which is also the
/// order in which pairwise quantities are generated elsewhere.
pub fn upper_triangle(m: &Array2<f64>) -> Array1<f64> {
    let n = m.nrows();
    let mut packed = Vec::with_capacity(triangle_len(n));
    for i in 0..n {
        for j in i..n {
            packed.push(m[[i, j]]);
        }
    }
    Array1::from_vec(packed)
}

/// Rebuild a symmetric matrix from its packed upper triangle.
pub fn from_upper_triangle(packed: &[f64], n: usize) -> Result<Array2<f64>> {
    if packed.len() != triangle_len(n) {
        return Err(StatsError::DimensionMismatch {
            expected: triangle_len(n),
            actual: packed.len(),
        });
    }

    let mut m = Array2::<f64>::zeros((n, n));
    let mut idx = 0;
    for i in 0..n {
        for j in i..n {
            m[[i, j]] = packed[idx];
            m[[j, i]] = packed[idx];
            idx += 1;
        }
    }
    Ok(m)
}

/// Pairs `(i, j)` with `i <= j`, in packed upper-triangle order.
pub fn triangle_pairs(n: usize) -> Vec<(usize, usize)> {
    (0..n).flat_map(|i| (i..n).map(move |j| (i, j))).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_cholesky_reconstructs_matrix() {
        let a = array![[4.0, 2.0, 0.4], [2.0, 3.0, 0.5], [0.4, 0.5, 2.0]];
        let l = cholesky(&a, "test").unwrap();
        let rebuilt = l.dot(&l.t());

        for i in 0..3 {
            for j in 0..3 {
                assert_abs_diff_eq!(rebuilt[[i, j]], a[[i, j]], epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_spd_solve() {
        let a = array![[4.0, 1.0], [1.0, 3.0]];
        let b = array![1.0, 2.0];
        let x = spd_solve(&a, &b, "test").unwrap();

        // 4x + y = 1, x + 3y = 2 -> x = 1/11, y = 7/11
        assert_abs_diff_eq!(x[0], 1.0 / 11.0, epsilon = 1e-12);
        assert_abs_diff_eq!(x[1], 7.0 / 11.0, epsilon = 1e-12);
    }

    #[test]
    fn test_spd_inverse() {
        let a = array![[2.0, 0.5, 0.0], [0.5, 1.0, 0.2], [0.0, 0.2, 3.0]];
        let inv = spd_inverse(&a, "test").unwrap();
        let identity = a.dot(&inv);

        for i in 0..3 {
            for j in 0..3 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert_abs_diff_eq!(identity[[i, j]], expected, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_gauss_solve_needs_pivoting() {
        // Zero in the leading position
        let a = array![[0.0, 2.0, 1.0], [1.0, 1.0, 0.0], [3.0, 0.0, 1.0]];
        let expected = array![1.0, -1.0, 2.0];
        let b = a.dot(&expected);
        let x = gauss_solve(&a, &b, "test").unwrap();

        for i in 0..3 {
            assert_abs_diff_eq!(x[i], expected[i], epsilon = 1e-12);
        }
    }

    #[test]
    fn test_gauss_solve_indefinite_symmetric() {
        let a = array![[1.0, 2.0], [2.0, 1.0]];
        let x = gauss_solve(&a, &array![3.0, 3.0], "test").unwrap();
        assert_abs_diff_eq!(x[0], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(x[1], 1.0, epsilon = 1e-12);
        assert!(cholesky(&a, "test").is_err());
    }

    #[test]
    fn test_gauss_solve_singular() {
        let a = array![[1.0, 2.0], [0.5, 1.0]];
        let err = gauss_solve(&a, &array![1.0, 1.0], "rank one").unwrap_err();
        assert!(matches!(err, StatsError::SingularMatrix { .. }));
    }

    #[test]
    fn test_cholesky_detects_collinearity() {
        // Second column is twice the first: X'X is rank one
        let a = array![[1.0, 2.0], [2.0, 4.0]];
        let err = cholesky(&a, "collinear").unwrap_err();
        assert!(matches!(err, StatsError::SingularMatrix { ref context } if context == "collinear"));
    }

    #[test]
    fn test_cholesky_rejects_zero_column() {
        let a = array![[1.0, 0.0], [0.0, 0.0]];
        assert!(cholesky(&a, "zero").is_err());
    }

    #[test]
    fn test_upper_triangle_roundtrip_order() {
        let m = array![[1.0, 2.0, 3.0], [2.0, 4.0, 5.0], [3.0, 5.0, 6.0]];
        let packed = upper_triangle(&m);
        assert_eq!(packed.to_vec(), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);

        let rebuilt = from_upper_triangle(packed.as_slice().unwrap(), 3).unwrap();
        assert_eq!(rebuilt, m);
        assert_eq!(triangle_pairs(3), vec![(0, 0), (0, 1), (0, 2), (1, 1), (1, 2), (2, 2)]);
    }

    #[test]
    fn test_from_upper_triangle_length_check() {
        assert!(from_upper_triangle(&[1.0, 2.0], 2).is_err());
    }
}
