//! Error types for model estimation.

use barten_data::DataError;
use barten_stats::StatsError;
use thiserror::Error;

/// Result type for model estimation.
pub type Result<T> = std::result::Result<T, EstimationError>;

/// Errors that can occur while estimating the model.
#[derive(Debug, Error)]
pub enum EstimationError {
    /// Missing or malformed input data
    #[error("Data error: {0}")]
    Data(#[from] DataError),

    /// Rank-deficient regression design
    #[error("Singular design: {context}")]
    SingularDesign {
        /// Which design or matrix was singular
        context: String,
    },

    /// Too few observations
    #[error("Insufficient data for {context}: need {required}, got {actual}")]
    InsufficientData {
        /// What needed the observations
        context: String,
        /// Required count
        required: usize,
        /// Available count
        actual: usize,
    },

    /// A covariance block needed for a test is not invertible
    #[error("Degenerate covariance: {context}")]
    DegenerateCovariance {
        /// Which covariance block
        context: String,
    },

    /// Nearest-PSD projection failed
    #[error("Projection failed: {0}")]
    Projection(StatsError),

    /// Too few bootstrap replicates succeeded
    #[error(
        "Only {succeeded} of {attempted} bootstrap replicates succeeded, at least {required} required"
    )]
    InsufficientReplicates {
        /// Successful replicates
        succeeded: usize,
        /// Replicates attempted
        attempted: usize,
        /// Minimum number of successes
        required: usize,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Other numerical error
    #[error("Numerical error: {0}")]
    Stats(StatsError),
}

impl From<StatsError> for EstimationError {
    fn from(err: StatsError) -> Self {
        match err {
            StatsError::SingularMatrix { context } => Self::SingularDesign { context },
            StatsError::InsufficientData { required, actual } => Self::InsufficientData {
                context: "regression".to_string(),
                required,
                actual,
            },
            other => Self::Stats(other),
        }
    }
}

impl EstimationError {
    /// Attach a context label to a numerical error
    pub fn in_context(err: StatsError, context: impl Into<String>) -> Self {
        let context = context.into();
        match err {
            StatsError::SingularMatrix { context: inner } => Self::SingularDesign {
                context: format!("{context}: {inner}"),
            },
            StatsError::InsufficientData { required, actual } => Self::InsufficientData {
                context,
                required,
                actual,
            },
            other => Self::Stats(other),
        }
    }
}
