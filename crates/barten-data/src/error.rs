//! Error types for data operations.

use thiserror::Error;

/// Result type for data operations.
pub type Result<T> = std::result::Result<T, DataError>;

/// Errors that can occur while loading or validating survey data.
#[derive(Debug, Error)]
pub enum DataError {
    /// Polars error
    #[error("Polars error: {0}")]
    Polars(#[from] polars::prelude::PolarsError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A required column is absent
    #[error("Required column '{0}' not found in input")]
    ColumnNotFound(String),

    /// A required column is not numeric
    #[error("Column '{column}' must be numeric, found {found}")]
    ColumnWrongType {
        /// Column name
        column: String,
        /// Type found in the input
        found: String,
    },

    /// Missing values in a required column
    #[error("Missing values in column '{0}'")]
    MissingValues(String),

    /// NaN or infinite values in a required column
    #[error("Non-finite values in column '{0}'")]
    NonFinite(String),

    /// A household does not belong to exactly one province-year cell
    #[error("Row {row} does not have exactly one {dimension} indicator set")]
    InvalidCluster {
        /// Row in the selected sample
        row: usize,
        /// "year" or "province"
        dimension: &'static str,
    },

    /// A record violates the household invariants
    #[error("Invalid household record {id}: {reason}")]
    InvalidRecord {
        /// Record id
        id: usize,
        /// What is wrong
        reason: String,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Sample selection left no households
    #[error("No households left after {0}")]
    EmptySample(&'static str),
}
