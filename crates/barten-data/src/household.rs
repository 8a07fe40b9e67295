//! Household types, records and the household table.

use crate::category::CategorySet;
use crate::error::{DataError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Household type.
///
/// Singles are identified by `z23 = 1` with sex from `z3`; multi-person
/// types by their own indicator column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum HouseholdType {
    /// Single male (`z23 = 1`, `z3 = 0`)
    SingleMale,
    /// Single female (`z23 = 1`, `z3 = 1`)
    SingleFemale,
    /// Two-person household (`z24`)
    TwoPerson,
    /// Three-person household (`z27`)
    ThreePerson,
    /// Four-person household (`z28`)
    FourPerson,
}

impl HouseholdType {
    /// Multi-person types in survey order.
    pub const MULTI_PERSON: [Self; 3] = [Self::TwoPerson, Self::ThreePerson, Self::FourPerson];

    /// Whether this is a one-person household
    pub const fn is_single(self) -> bool {
        matches!(self, Self::SingleMale | Self::SingleFemale)
    }

    /// Number of members
    pub const fn size(self) -> usize {
        match self {
            Self::SingleMale | Self::SingleFemale => 1,
            Self::TwoPerson => 2,
            Self::ThreePerson => 3,
            Self::FourPerson => 4,
        }
    }

    /// Indicator column of a multi-person type
    pub const fn indicator_column(self) -> Option<&'static str> {
        match self {
            Self::SingleMale | Self::SingleFemale => None,
            Self::TwoPerson => Some("z24"),
            Self::ThreePerson => Some("z27"),
            Self::FourPerson => Some("z28"),
        }
    }

    /// Short label used in regressor names and tables
    pub const fn label(self) -> &'static str {
        match self {
            Self::SingleMale => "sm",
            Self::SingleFemale => "sf",
            Self::TwoPerson => "2p",
            Self::ThreePerson => "3p",
            Self::FourPerson => "4p",
        }
    }
}

impl fmt::Display for HouseholdType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One surveyed household-year.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HouseholdRecord {
    /// Position in the household table
    pub id: usize,
    /// Expenditure level per category, in [`CategorySet::all`] order
    pub expenditure: Vec<f64>,
    /// Log price per category, in [`CategorySet::all`] order
    pub log_price: Vec<f64>,
    /// Demographic values, in the table's demographic order
    pub demographics: Vec<f64>,
    /// Household type
    pub household_type: HouseholdType,
    /// Province-year cluster
    pub cluster: u32,
}

impl HouseholdRecord {
    /// Total expenditure `x = Σ s_c`
    pub fn total_expenditure(&self) -> f64 {
        self.expenditure.iter().sum()
    }

    /// Budget shares `s_c / x`
    pub fn shares(&self) -> Vec<f64> {
        let x = self.total_expenditure();
        self.expenditure.iter().map(|s| s / x).collect()
    }
}

/// Validated collection of household records.
///
/// Shared read-only by every estimation step; a bootstrap resample is a list
/// of indices into the table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HouseholdTable {
    categories: CategorySet,
    demographics: Vec<String>,
    records: Vec<HouseholdRecord>,
}

impl HouseholdTable {
    /// Build a table, renumbering record ids to their positions.
    ///
    /// # Errors
    /// `InvalidConfig` for an unusable category set, `InvalidRecord` when a
    /// record has the wrong number of fields, non-finite values, negative
    /// expenditure or non-positive total expenditure.
    pub fn new(
        categories: CategorySet,
        demographics: Vec<String>,
        mut records: Vec<HouseholdRecord>,
    ) -> Result<Self> {
        categories.validate()?;
        let n_cat = categories.all().len();

        for (id, record) in records.iter_mut().enumerate() {
            record.id = id;
            let invalid = |reason: String| DataError::InvalidRecord { id, reason };

            if record.expenditure.len() != n_cat || record.log_price.len() != n_cat {
                return Err(invalid(format!(
                    "expected {n_cat} expenditure and price fields, found {} and {}",
                    record.expenditure.len(),
                    record.log_price.len()
                )));
            }
            if record.demographics.len() != demographics.len() {
                return Err(invalid(format!(
                    "expected {} demographic values, found {}",
                    demographics.len(),
                    record.demographics.len()
                )));
            }
            if record
                .expenditure
                .iter()
                .chain(&record.log_price)
                .chain(&record.demographics)
                .any(|v| !v.is_finite())
            {
                return Err(invalid("non-finite value".to_string()));
            }
            if record.expenditure.iter().any(|s| *s < 0.0) {
                return Err(invalid("negative expenditure".to_string()));
            }
            if record.total_expenditure() <= 0.0 {
                return Err(invalid("total expenditure is not positive".to_string()));
            }
        }

        Ok(Self {
            categories,
            demographics,
            records,
        })
    }

    /// Number of households
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// All records
    pub fn records(&self) -> &[HouseholdRecord] {
        &self.records
    }

    /// Record at position `id`
    pub fn record(&self, id: usize) -> Option<&HouseholdRecord> {
        self.records.get(id)
    }

    /// Category configuration
    pub fn categories(&self) -> &CategorySet {
        &self.categories
    }

    /// Demographic column names
    pub fn demographic_names(&self) -> &[String] {
        &self.demographics
    }

    /// Record ids grouped by cluster, in ascending cluster order
    pub fn clusters(&self) -> BTreeMap<u32, Vec<usize>> {
        let mut clusters: BTreeMap<u32, Vec<usize>> = BTreeMap::new();
        for r in &self.records {
            clusters.entry(r.cluster).or_default().push(r.id);
        }
        clusters
    }

    /// Number of households per type
    pub fn type_counts(&self) -> BTreeMap<HouseholdType, usize> {
        let mut counts = BTreeMap::new();
        for r in &self.records {
            *counts.entry(r.household_type).or_insert(0) += 1;
        }
        counts
    }
}
