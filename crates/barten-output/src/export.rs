//! Export of estimation summaries.
//!
//! JSON exports carry the whole [`EstimationSummary`], including the model
//! and bootstrap settings of the run. CSV exports flatten it to one
//! [`SummaryRecord`] per estimate. Both mark estimates with a stability
//! warning through an `unstable` column.

use crate::summary::EstimationSummary;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// Errors that can occur during export operations.
#[derive(Debug, Error)]
pub enum ExportError {
    /// CSV serialization error.
    #[error("CSV serialization error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON serialization error.
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV writer produced invalid UTF-8.
    #[error("Invalid UTF-8 in export: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    /// Invalid format error.
    #[error("Invalid format: {0}")]
    InvalidFormat(String),
}

/// Export format options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    /// Comma-separated values format.
    Csv,

    /// Compact JSON format.
    Json,

    /// Pretty-printed JSON format.
    PrettyJson,
}

impl ExportFormat {
    /// Get the file extension for this format.
    pub const fn extension(&self) -> &str {
        match self {
            Self::Csv => "csv",
            Self::Json | Self::PrettyJson => "json",
        }
    }

    /// Guess the format from a file extension, pretty JSON for `.json`.
    ///
    /// # Errors
    ///
    /// Returns [`ExportError::InvalidFormat`] for any other extension.
    pub fn from_path(path: &Path) -> Result<Self, ExportError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        match extension {
            "json" => Ok(Self::PrettyJson),
            other => other.parse(),
        }
    }
}

impl FromStr for ExportFormat {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "json" => Ok(Self::Json),
            "pretty-json" | "pretty_json" => Ok(Self::PrettyJson),
            other => Err(ExportError::InvalidFormat(other.to_string())),
        }
    }
}

/// One estimate in a CSV export.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SummaryRecord {
    /// Table the estimate belongs to
    pub section: String,
    /// Household type label
    pub household_type: String,
    /// Reference group label, for index rows
    pub reference: String,
    /// Good, pair of goods or test name
    pub label: String,
    /// Point estimate or test statistic
    pub estimate: Option<f64>,
    /// Analytical standard error, or test degrees of freedom
    pub std_error: Option<f64>,
    /// Bootstrap standard error, or test p-value
    pub bootstrap_se: Option<f64>,
    /// Estimate carries a stability warning
    pub unstable: bool,
}

impl SummaryRecord {
    fn new(section: &str, household_type: String, label: String, estimate: Option<f64>) -> Self {
        Self {
            section: section.to_string(),
            household_type,
            reference: String::new(),
            label,
            estimate,
            std_error: None,
            bootstrap_se: None,
            unstable: false,
        }
    }
}

impl EstimationSummary {
    /// Flatten into one record per estimate.
    pub fn to_records(&self) -> Vec<SummaryRecord> {
        let mut records = Vec::new();

        for row in &self.scales {
            records.push(SummaryRecord {
                std_error: Some(row.std_error),
                bootstrap_se: row.bootstrap_se,
                unstable: row.unstable,
                ..SummaryRecord::new(
                    "scale",
                    row.household_type.to_string(),
                    row.category.to_string(),
                    Some(row.scale),
                )
            });
        }

        for row in &self.random_scales {
            records.push(SummaryRecord {
                bootstrap_se: row.bootstrap_se,
                unstable: row.unstable,
                ..SummaryRecord::new(
                    "random scale std",
                    row.household_type.to_string(),
                    row.category.to_string(),
                    Some(row.std),
                )
            });
        }

        for row in &self.index {
            records.push(SummaryRecord {
                reference: row.reference.to_string(),
                bootstrap_se: row.mean_bootstrap_se,
                ..SummaryRecord::new(
                    "index mean",
                    row.household_type.to_string(),
                    String::new(),
                    Some(row.mean),
                )
            });
            if let Some(std) = row.std {
                records.push(SummaryRecord {
                    reference: row.reference.to_string(),
                    bootstrap_se: row.std_bootstrap_se,
                    ..SummaryRecord::new(
                        "index std",
                        row.household_type.to_string(),
                        String::new(),
                        Some(std),
                    )
                });
            }
            if let Some(heterogeneity) = row.heterogeneity_std {
                records.push(SummaryRecord {
                    reference: row.reference.to_string(),
                    bootstrap_se: row.heterogeneity_bootstrap_se,
                    ..SummaryRecord::new(
                        "index heterogeneity std",
                        row.household_type.to_string(),
                        String::new(),
                        Some(heterogeneity),
                    )
                });
            }
        }

        for matrix in &self.matrices {
            let n = matrix.labels.len();
            for i in 0..n {
                for j in i..n {
                    records.push(SummaryRecord {
                        bootstrap_se: matrix
                            .bootstrap_se
                            .as_ref()
                            .and_then(|se| se[i][j]),
                        unstable: matrix.unstable,
                        ..SummaryRecord::new(
                            matrix.kind.label(),
                            matrix.household_type.to_string(),
                            format!("{}|{}", matrix.labels[i], matrix.labels[j]),
                            Some(matrix.values[i][j]),
                        )
                    });
                }
            }
        }

        for test in &self.tests {
            records.push(SummaryRecord {
                std_error: test.df.map(|d| d as f64),
                bootstrap_se: test.p_value,
                ..SummaryRecord::new("test", String::new(), test.name.clone(), test.statistic)
            });
        }

        records
    }
}

/// Trait for exporting data in various formats.
pub trait Exporter {
    /// Export data to a string in the specified format.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    fn export_to_string(&self, format: ExportFormat) -> Result<String, ExportError>;

    /// Export data to a file in the specified format.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or file writing fails.
    fn export_to_file(&self, path: &Path, format: ExportFormat) -> Result<(), ExportError> {
        let content = self.export_to_string(format)?;
        let mut file = File::create(path)?;
        file.write_all(content.as_bytes())?;
        Ok(())
    }
}

fn records_to_csv(records: &[SummaryRecord]) -> Result<String, ExportError> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    for record in records {
        wtr.serialize(record)?;
    }
    let bytes = wtr.into_inner().map_err(|e| e.into_error())?;
    Ok(String::from_utf8(bytes)?)
}

impl Exporter for EstimationSummary {
    fn export_to_string(&self, format: ExportFormat) -> Result<String, ExportError> {
        match format {
            ExportFormat::Csv => records_to_csv(&self.to_records()),
            ExportFormat::Json => Ok(serde_json::to_string(self)?),
            ExportFormat::PrettyJson => Ok(serde_json::to_string_pretty(self)?),
        }
    }
}

impl Exporter for Vec<SummaryRecord> {
    fn export_to_string(&self, format: ExportFormat) -> Result<String, ExportError> {
        match format {
            ExportFormat::Csv => records_to_csv(self),
            ExportFormat::Json => Ok(serde_json::to_string(self)?),
            ExportFormat::PrettyJson => Ok(serde_json::to_string_pretty(self)?),
        }
    }
}
