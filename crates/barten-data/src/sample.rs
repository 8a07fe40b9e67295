//! Sample selection and cluster derivation.
//!
//! Households are kept when they
//! 1. belong to exactly one of the singles / configured multi-person types,
//! 2. live in a large city (`z21 = z22 = 0`) when the location filter is on,
//! 3. have a head no older than the age limit (`z51`),
//! 4. report non-zero expenditure in every category,
//! 5. have total expenditure strictly between the configured quantiles.
//!
//! Each survivor is placed in a province-year cluster, and households that
//! are alone in their cluster × type cell are dropped.

use crate::category::CategorySet;
use crate::error::{DataError, Result};
use crate::household::{HouseholdRecord, HouseholdTable, HouseholdType};
use crate::loader::SurveyFrame;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ops::RangeInclusive;

/// Year indicator columns `z29 … z37`.
pub const YEAR_COLUMNS: RangeInclusive<u16> = 29..=37;

/// Province indicator columns `z38 … z50`.
pub const PROVINCE_COLUMNS: RangeInclusive<u16> = 38..=50;

const ROW_COLUMN: &str = "row";
const TYPE_COLUMN: &str = "household_type";
const TOTAL_COLUMN: &str = "total_expenditure";

/// Sample selection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleConfig {
    /// Shareable and nonshareable goods
    pub categories: CategorySet,
    /// Demographic columns carried into the model (may be empty)
    pub demographics: Vec<String>,
    /// Multi-person types kept in the sample
    pub household_types: Vec<HouseholdType>,
    /// Maximum age of the household head (`z51`), `None` to disable
    pub max_age: Option<f64>,
    /// Drop households in small cities (`z21`) and rural areas (`z22`)
    pub large_cities_only: bool,
    /// Quantiles of total expenditure outside which households are dropped
    pub expenditure_bounds: (f64, f64),
    /// Drop households alone in their cluster × type cell
    pub drop_singleton_cells: bool,
}

impl Default for SampleConfig {
    fn default() -> Self {
        Self {
            categories: CategorySet::default(),
            demographics: vec!["z1".to_string(), "z2".to_string()],
            household_types: HouseholdType::MULTI_PERSON.to_vec(),
            max_age: Some(65.0),
            large_cities_only: true,
            expenditure_bounds: (0.05, 0.90),
            drop_singleton_cells: true,
        }
    }
}

impl SampleConfig {
    /// Check the configuration.
    pub fn validate(&self) -> Result<()> {
        self.categories.validate()?;
        if self.household_types.iter().any(|t| t.is_single()) {
            return Err(DataError::InvalidConfig(
                "household_types lists multi-person types only".to_string(),
            ));
        }
        let (lo, hi) = self.expenditure_bounds;
        if !(0.0..=1.0).contains(&lo) || !(0.0..=1.0).contains(&hi) || lo >= hi {
            return Err(DataError::InvalidConfig(format!(
                "expenditure bounds must satisfy 0 <= lower < upper <= 1, got ({lo}, {hi})"
            )));
        }
        Ok(())
    }
}

/// Row counts after each selection stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionReport {
    /// Rows in the input
    pub loaded: usize,
    /// After the household type, location and age filters
    pub after_demographic_filters: usize,
    /// After dropping zero expenditures
    pub after_zero_expenditure: usize,
    /// After expenditure trimming
    pub after_trimming: usize,
    /// After dropping singleton cells
    pub after_singleton_cells: usize,
}

/// Selected sample with its report.
#[derive(Debug, Clone)]
pub struct Selection {
    /// The household table
    pub table: HouseholdTable,
    /// Row counts per stage
    pub report: SelectionReport,
}

fn z(i: u16) -> String {
    format!("z{i}")
}

/// Columns the loader must find for a given configuration.
pub fn required_columns(config: &SampleConfig) -> Result<Vec<String>> {
    config.validate()?;

    let mut cols: Vec<String> = Vec::new();
    for c in config.categories.all() {
        cols.push(c.expenditure_column());
        cols.push(c.price_column());
    }
    cols.extend(config.demographics.iter().cloned());
    cols.push(z(3));
    cols.push(z(23));
    cols.extend(
        config
            .household_types
            .iter()
            .filter_map(|t| t.indicator_column())
            .map(str::to_string),
    );
    if config.large_cities_only {
        cols.push(z(21));
        cols.push(z(22));
    }
    if config.max_age.is_some() {
        cols.push(z(51));
    }
    cols.extend(YEAR_COLUMNS.chain(PROVINCE_COLUMNS).map(z));

    let mut seen = std::collections::HashSet::new();
    cols.retain(|c| seen.insert(c.clone()));
    Ok(cols)
}

/// Index of the single indicator set to one, if exactly one is.
fn single_indicator(frame: &SurveyFrame, range: RangeInclusive<u16>, row: usize) -> Result<Option<u32>> {
    let mut found = None;
    for (k, col) in range.enumerate() {
        if frame.column(&z(col))?[row] == 1.0 {
            if found.is_some() {
                return Ok(None);
            }
            found = Some(k as u32);
        }
    }
    Ok(found)
}

/// Province-year cluster of a row: `year * 13 + province + 1`.
pub fn cluster_of(frame: &SurveyFrame, row: usize) -> Result<u32> {
    let year = single_indicator(frame, YEAR_COLUMNS, row)?.ok_or(DataError::InvalidCluster {
        row,
        dimension: "year",
    })?;
    let province =
        single_indicator(frame, PROVINCE_COLUMNS, row)?.ok_or(DataError::InvalidCluster {
            row,
            dimension: "province",
        })?;
    let n_provinces = PROVINCE_COLUMNS.count() as u32;
    Ok(year * n_provinces + province + 1)
}

/// Households outside every type get 0, so do singles whose sex indicator is
/// not binary.
fn type_code(candidates: &[HouseholdType]) -> Expr {
    candidates
        .iter()
        .enumerate()
        .map(|(k, t)| type_indicator(*t).cast(DataType::UInt32) * lit(k as u32 + 1))
        .fold(lit(0u32), |acc, e| acc + e)
}

fn is_set(name: &str) -> Expr {
    col(name).eq(lit(1.0))
}

fn type_indicator(household_type: HouseholdType) -> Expr {
    match household_type {
        HouseholdType::SingleMale => is_set("z23").and(col("z3").eq(lit(0.0))),
        HouseholdType::SingleFemale => is_set("z23").and(col("z3").eq(lit(1.0))),
        other => other.indicator_column().map_or(lit(false), is_set),
    }
}

/// Number of type indicators a household sets, singles counted once.
fn matched_types(config: &SampleConfig) -> Expr {
    config
        .household_types
        .iter()
        .filter_map(|t| t.indicator_column())
        .map(|c| is_set(c).cast(DataType::UInt32))
        .fold(is_set("z23").cast(DataType::UInt32), |acc, e| acc + e)
}

fn candidate_types(config: &SampleConfig) -> Vec<HouseholdType> {
    let mut candidates = vec![HouseholdType::SingleMale, HouseholdType::SingleFemale];
    candidates.extend(config.household_types.iter().copied());
    candidates
}

/// Remove records that are alone in their cluster × type cell.
pub fn drop_singleton_cells(records: Vec<HouseholdRecord>) -> Vec<HouseholdRecord> {
    let mut counts: HashMap<(u32, HouseholdType), usize> = HashMap::new();
    for r in &records {
        *counts.entry((r.cluster, r.household_type)).or_insert(0) += 1;
    }
    records
        .into_iter()
        .filter(|r| counts[&(r.cluster, r.household_type)] > 1)
        .collect()
}

/// Apply the sample selection to a survey frame.
///
/// `survey` holds the columns named by [`required_columns`] as `f64`, see
/// [`crate::loader::extract_columns`].
///
/// # Errors
/// Missing columns, invalid indicators on a kept row, or an empty sample.
pub fn select(survey: &DataFrame, config: &SampleConfig) -> Result<Selection> {
    config.validate()?;
    let categories = config.categories.all();
    let candidates = candidate_types(config);
    let mut report = SelectionReport {
        loaded: survey.height(),
        ..Default::default()
    };

    // Stage 1: household type, location and age
    let mut keep = matched_types(config).eq(lit(1u32));
    if config.large_cities_only {
        keep = keep.and((col("z21") + col("z22")).eq(lit(0.0)));
    }
    if let Some(max_age) = config.max_age {
        keep = keep.and(col("z51").lt_eq(lit(max_age)));
    }
    let demographic = survey
        .clone()
        .lazy()
        .with_row_index(ROW_COLUMN, None)
        .with_column(type_code(&candidates).alias(TYPE_COLUMN))
        .filter(keep)
        .collect()?;
    report.after_demographic_filters = demographic.height();

    // Stage 2: zero expenditures
    let expenditure: Vec<Expr> = categories.iter().map(|c| col(c.expenditure_column())).collect();
    let nonzero = expenditure
        .iter()
        .map(|e| e.clone().neq(lit(0.0)))
        .fold(lit(true), |acc, e| acc.and(e));
    let nonzero = demographic.lazy().filter(nonzero).collect()?;
    report.after_zero_expenditure = nonzero.height();
    if nonzero.height() == 0 {
        return Err(DataError::EmptySample("dropping zero expenditures"));
    }

    // Stage 3: trimming on total expenditure
    let (lo, hi) = config.expenditure_bounds;
    let total = || col(TOTAL_COLUMN);
    let trimmed = nonzero
        .lazy()
        .with_column(sum_horizontal(&expenditure, true)?.alias(TOTAL_COLUMN))
        .with_columns([
            total().quantile(lit(lo), QuantileMethod::Linear).alias("total_lower"),
            total().quantile(lit(hi), QuantileMethod::Linear).alias("total_upper"),
        ])
        .filter(total().gt(col("total_lower")).and(total().lt(col("total_upper"))))
        .collect()?;
    report.after_trimming = trimmed.height();
    if trimmed.height() == 0 {
        return Err(DataError::EmptySample("expenditure trimming"));
    }
    log::debug!(
        "Expenditure trimming bounds ({:?}, {:?}) keep {} of {} households",
        trimmed.column("total_lower")?.get(0)?,
        trimmed.column("total_upper")?.get(0)?,
        report.after_trimming,
        report.after_zero_expenditure
    );

    // Records
    let frame = SurveyFrame::from_frame(&trimmed)?;
    let rows = frame.column(ROW_COLUMN)?;
    let codes = frame.column(TYPE_COLUMN)?;
    let expenditure_cols = categories
        .iter()
        .map(|c| frame.column(&c.expenditure_column()))
        .collect::<Result<Vec<_>>>()?;
    let price_cols = categories
        .iter()
        .map(|c| frame.column(&c.price_column()))
        .collect::<Result<Vec<_>>>()?;
    let demo_cols = config
        .demographics
        .iter()
        .map(|d| frame.column(d))
        .collect::<Result<Vec<_>>>()?;

    let mut records = Vec::with_capacity(frame.n_rows());
    for r in 0..frame.n_rows() {
        let id = rows[r] as usize;
        let household_type = match codes[r] as usize {
            0 => {
                return Err(DataError::InvalidRecord {
                    id,
                    reason: format!("sex indicator z3 must be 0 or 1, found {}", frame.column("z3")?[r]),
                });
            }
            code => candidates[code - 1],
        };
        let cluster = cluster_of(&frame, r).map_err(|e| match e {
            DataError::InvalidCluster { dimension, .. } => DataError::InvalidCluster { row: id, dimension },
            other => other,
        })?;
        records.push(HouseholdRecord {
            id,
            expenditure: expenditure_cols.iter().map(|col| col[r]).collect(),
            log_price: price_cols.iter().map(|col| col[r]).collect(),
            demographics: demo_cols.iter().map(|col| col[r]).collect(),
            household_type,
            cluster,
        });
    }

    if config.drop_singleton_cells {
        records = drop_singleton_cells(records);
    }
    report.after_singleton_cells = records.len();
    if records.is_empty() {
        return Err(DataError::EmptySample("dropping singleton cells"));
    }

    log::info!(
        "Selected {} of {} households ({} clusters)",
        records.len(),
        report.loaded,
        records
            .iter()
            .map(|r| r.cluster)
            .collect::<std::collections::BTreeSet<_>>()
            .len()
    );

    let table = HouseholdTable::new(config.categories.clone(), config.demographics.clone(), records)?;
    Ok(Selection { table, report })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn singles_config(expenditure_bounds: (f64, f64)) -> SampleConfig {
        SampleConfig {
            demographics: vec![],
            household_types: vec![HouseholdType::TwoPerson],
            max_age: None,
            large_cities_only: false,
            expenditure_bounds,
            ..Default::default()
        }
    }

    /// Single-person households in one cluster, spending `level` on every good.
    fn singles(config: &SampleConfig, levels: &[f64], sex: &[f64]) -> DataFrame {
        let columns = required_columns(config)
            .unwrap()
            .into_iter()
            .map(|name| {
                let values: Vec<f64> = match name.as_str() {
                    n if n.starts_with('s') => levels.to_vec(),
                    "z3" => sex.to_vec(),
                    "z23" | "z29" | "z38" => vec![1.0; levels.len()],
                    _ => vec![0.0; levels.len()],
                };
                Column::new(name.into(), values)
            })
            .collect();
        DataFrame::new(columns).unwrap()
    }

    #[test]
    fn test_required_columns() {
        let cols = required_columns(&SampleConfig::default()).unwrap();
        for c in ["s1", "p6", "s19", "z1", "z2", "z3", "z23", "z24", "z27", "z28", "z21", "z51", "z29", "z50"] {
            assert!(cols.contains(&c.to_string()), "missing {c}");
        }
        assert!(!cols.contains(&"z25".to_string()));
    }

    #[test]
    fn test_validate_rejects_bad_bounds() {
        let config = SampleConfig {
            expenditure_bounds: (0.9, 0.1),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = SampleConfig {
            household_types: vec![HouseholdType::SingleMale],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[rstest]
    #[case((0.05, 0.90), 8)]
    #[case((0.0, 1.0), 8)]
    #[case((0.25, 0.75), 4)]
    fn test_trimming_bounds_are_strict(#[case] bounds: (f64, f64), #[case] kept: usize) {
        let config = singles_config(bounds);
        let levels: Vec<f64> = (1..=10).map(f64::from).collect();
        let survey = singles(&config, &levels, &[0.0; 10]);

        let selection = select(&survey, &config).unwrap();
        assert_eq!(selection.report.after_zero_expenditure, 10);
        assert_eq!(selection.report.after_trimming, kept);
        assert_eq!(selection.table.len(), kept);
        assert!(selection.table.records().iter().all(|r| r.cluster == 1));
        assert!(selection.table.records().iter().all(|r| r.household_type == HouseholdType::SingleMale));
    }

    #[test]
    fn test_single_with_invalid_sex_is_an_error() {
        let config = singles_config((0.05, 0.90));
        let levels: Vec<f64> = (1..=10).map(f64::from).collect();
        let mut sex = [1.0; 10];
        sex[4] = 2.0;
        let survey = singles(&config, &levels, &sex);

        let err = select(&survey, &config).unwrap_err();
        assert!(matches!(err, DataError::InvalidRecord { id: 4, .. }));
    }

    #[test]
    fn test_drop_singleton_cells() {
        let r = |cluster, household_type| HouseholdRecord {
            id: 0,
            expenditure: vec![1.0; 6],
            log_price: vec![0.0; 6],
            demographics: vec![],
            household_type,
            cluster,
        };
        let records = vec![
            r(1, HouseholdType::SingleMale),
            r(1, HouseholdType::SingleMale),
            r(1, HouseholdType::SingleFemale),
            r(2, HouseholdType::SingleMale),
        ];
        let kept = drop_singleton_cells(records);
        assert_eq!(kept.len(), 2);
        assert!(kept.iter().all(|r| r.cluster == 1 && r.household_type == HouseholdType::SingleMale));
    }
}
