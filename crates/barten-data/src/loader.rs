//! CSV loading with a strict column contract.
//!
//! Column names are the contract: the loader never guesses. Every column the
//! sample configuration needs must be present, numeric, complete and finite;
//! anything else in the file is ignored.

use crate::error::{DataError, Result};
use crate::sample::{SampleConfig, Selection, required_columns, select};
use polars::prelude::*;
use std::collections::HashMap;
use std::path::Path;

/// Numeric survey columns, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct SurveyFrame {
    n_rows: usize,
    columns: HashMap<String, Vec<f64>>,
}

impl SurveyFrame {
    /// Build a frame from named columns of equal length.
    pub fn from_columns<I, S>(columns: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, Vec<f64>)>,
        S: Into<String>,
    {
        let mut frame = Self::default();
        for (i, (name, values)) in columns.into_iter().enumerate() {
            let name = name.into();
            if i == 0 {
                frame.n_rows = values.len();
            } else if values.len() != frame.n_rows {
                return Err(DataError::InvalidConfig(format!(
                    "column '{name}' has {} rows, expected {}",
                    values.len(),
                    frame.n_rows
                )));
            }
            frame.columns.insert(name, values);
        }
        Ok(frame)
    }

    /// Copy the columns of a data frame, casting each to `f64`.
    pub fn from_frame(df: &DataFrame) -> Result<Self> {
        let columns = df
            .get_columns()
            .iter()
            .map(|c| {
                let values: Vec<f64> = c.cast(&DataType::Float64)?.f64()?.into_no_null_iter().collect();
                Ok((c.name().to_string(), values))
            })
            .collect::<Result<Vec<_>>>()?;
        let mut frame = Self::from_columns(columns)?;
        frame.n_rows = df.height();
        Ok(frame)
    }

    /// Number of rows
    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    /// Values of a column
    pub fn column(&self, name: &str) -> Result<&[f64]> {
        self.columns
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| DataError::ColumnNotFound(name.to_string()))
    }
}

/// Read a comma-separated file with a header row.
pub fn read_csv(path: impl AsRef<Path>) -> Result<DataFrame> {
    let path = path.as_ref();
    let df = CsvReadOptions::default()
        .with_has_header(true)
        .try_into_reader_with_file_path(Some(path.to_path_buf()))?
        .finish()?;

    log::info!(
        "Read {} rows and {} columns from {}",
        df.height(),
        df.width(),
        path.display()
    );
    Ok(df)
}

fn extract_numeric_column(df: &DataFrame, name: &str) -> Result<Column> {
    let column = df.column(name)?;
    if column.null_count() > 0 {
        return Err(DataError::MissingValues(name.to_string()));
    }

    let wrong_type = || DataError::ColumnWrongType {
        column: name.to_string(),
        found: column.dtype().to_string(),
    };
    let casted = column.cast(&DataType::Float64).map_err(|_| wrong_type())?;
    if casted.null_count() > 0 {
        return Err(wrong_type());
    }

    if casted.f64()?.into_no_null_iter().any(|v| !v.is_finite()) {
        return Err(DataError::NonFinite(name.to_string()));
    }
    Ok(casted)
}

/// Restrict a frame to the named columns cast to `f64`, checking the column
/// contract.
///
/// # Errors
/// `ColumnNotFound`, `MissingValues`, `ColumnWrongType` or `NonFinite` for
/// the first offending column.
pub fn extract_columns(df: &DataFrame, names: &[String]) -> Result<DataFrame> {
    let available: Vec<&str> = df.get_column_names().into_iter().map(|c| c.as_str()).collect();
    if let Some(missing) = names.iter().find(|n| !available.contains(&n.as_str())) {
        return Err(DataError::ColumnNotFound(missing.clone()));
    }

    let columns = names
        .iter()
        .map(|name| extract_numeric_column(df, name))
        .collect::<Result<Vec<_>>>()?;
    Ok(DataFrame::new(columns)?)
}

/// Build the household table from an in-memory data frame.
pub fn households_from_frame(df: &DataFrame, config: &SampleConfig) -> Result<Selection> {
    let survey = extract_columns(df, &required_columns(config)?)?;
    select(&survey, config)
}

/// Load the survey extract and apply the sample selection.
pub fn load_households(path: impl AsRef<Path>, config: &SampleConfig) -> Result<Selection> {
    let df = read_csv(path)?;
    households_from_frame(&df, config)
}
