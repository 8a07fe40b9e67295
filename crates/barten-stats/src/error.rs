//! Error types for numerical routines.

use thiserror::Error;

/// Result type for numerical routines.
pub type Result<T> = std::result::Result<T, StatsError>;

/// Errors that can occur in the numerical kernels.
#[derive(Debug, Error)]
pub enum StatsError {
    /// Dimension mismatch
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Expected dimension
        expected: usize,
        /// Actual dimension
        actual: usize,
    },

    /// Matrix is singular (or numerically rank-deficient)
    #[error("Singular matrix in {context}")]
    SingularMatrix {
        /// Where the singular matrix was encountered
        context: String,
    },

    /// Insufficient data for estimation
    #[error("Insufficient data: need at least {required} observations, got {actual}")]
    InsufficientData {
        /// Required number of observations
        required: usize,
        /// Actual number of observations
        actual: usize,
    },

    /// NaN or infinite values in an input
    #[error("Non-finite values in {0}")]
    NonFinite(String),

    /// Iterative routine did not converge
    #[error("{routine} did not converge after {iterations} iterations")]
    NotConverged {
        /// Name of the routine
        routine: &'static str,
        /// Iterations performed
        iterations: usize,
    },

    /// Zero or negative variance where a positive one is required
    #[error("Non-positive variance at index {0}")]
    DegenerateVariance(usize),

    /// Invalid parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}
