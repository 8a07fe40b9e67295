//! Timestamped reports wrapping an estimation summary.

use crate::summary::EstimationSummary;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during report generation.
#[derive(Debug, Error)]
pub enum ReportError {
    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A report of one estimation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    /// Title of the run.
    pub title: String,

    /// Report generation timestamp.
    pub timestamp: DateTime<Utc>,

    /// Crate version that produced the report.
    pub version: String,

    /// Report contents (JSON format).
    pub contents: serde_json::Value,
}

impl Report {
    /// Create a new report.
    pub fn new(title: String, contents: serde_json::Value) -> Self {
        Self {
            title,
            timestamp: Utc::now(),
            version: crate::VERSION.to_string(),
            contents,
        }
    }

    /// Create a report holding a summary.
    ///
    /// # Errors
    ///
    /// Returns an error if the summary cannot be serialized.
    pub fn from_summary(summary: &EstimationSummary) -> Result<Self, ReportError> {
        Ok(Self::new(summary.title.clone(), serde_json::to_value(summary)?))
    }

    /// The summary held by the report, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the contents are not a summary.
    pub fn summary(&self) -> Result<EstimationSummary, ReportError> {
        Ok(serde_json::from_value(self.contents.clone())?)
    }

    /// Convert report to JSON string.
    pub fn to_json(&self) -> Result<String, ReportError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
