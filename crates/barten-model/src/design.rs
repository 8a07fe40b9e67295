//! Regression design for the share equations.
//!
//! For household `i` with total expenditure `x` and log prices `p`:
//!
//! ```text
//! y    = ln x - p_nonshareable          (log real expenditure)
//! er_c = exp(p_c - p_nonshareable)      (relative price of good c)
//! w_c  = s_c / x                        (budget share)
//! ```
//!
//! Fixed effects are absorbed by demeaning `w`, `y` and the demographics
//! within cluster × household-type cells. The equation of good `c` has one
//! price-expenditure regressor `er_c · ỹ` per household group (singles and
//! each multi-person type) and one `z̃_d` per demographic and detailed type.

use crate::config::ModelConfig;
use crate::error::{EstimationError, Result};
use barten_data::{CategorySet, HouseholdTable, HouseholdType};
use ndarray::{Array1, Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// Households sharing one price-expenditure coefficient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PriceGroup {
    /// All singles
    Singles,
    /// Single males only
    SingleMale,
    /// Single females only
    SingleFemale,
    /// One multi-person type
    Multi(HouseholdType),
}

impl PriceGroup {
    /// Whether a household of type `t` belongs to the group
    pub fn contains(self, t: HouseholdType) -> bool {
        match self {
            Self::Singles => t.is_single(),
            Self::SingleMale => t == HouseholdType::SingleMale,
            Self::SingleFemale => t == HouseholdType::SingleFemale,
            Self::Multi(m) => t == m,
        }
    }

    /// Label used in regressor names
    pub const fn label(self) -> &'static str {
        match self {
            Self::Singles => "s",
            Self::SingleMale => "sm",
            Self::SingleFemale => "sf",
            Self::Multi(t) => t.label(),
        }
    }
}

impl fmt::Display for PriceGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Subtract group means from every column.
pub fn demean_by_group(values: ArrayView2<'_, f64>, groups: &[usize], n_groups: usize) -> Array2<f64> {
    let k = values.ncols();
    let mut sums = Array2::<f64>::zeros((n_groups, k));
    let mut counts = vec![0usize; n_groups];
    for (row, &g) in values.axis_iter(Axis(0)).zip(groups) {
        let mut acc = sums.row_mut(g);
        acc += &row;
        counts[g] += 1;
    }
    for (g, &count) in counts.iter().enumerate() {
        if count > 0 {
            sums.row_mut(g).mapv_inplace(|v| v / count as f64);
        }
    }

    let mut out = values.to_owned();
    for (mut row, &g) in out.axis_iter_mut(Axis(0)).zip(groups) {
        row -= &sums.row(g);
    }
    out
}

/// Estimation sample with all derived variables.
#[derive(Debug, Clone)]
pub struct Design {
    categories: CategorySet,
    household_types: Vec<HouseholdType>,
    demographic_names: Vec<String>,
    record_ids: Vec<usize>,
    types: Vec<HouseholdType>,
    clusters: Vec<u32>,
    cells: Vec<usize>,
    n_cells: usize,
    y: Array1<f64>,
    y_tilde: Array1<f64>,
    relative_prices: Array2<f64>,
    shares: Array2<f64>,
    shares_tilde: Array2<f64>,
    demographics: Array2<f64>,
    demographics_tilde: Array2<f64>,
}

impl Design {
    /// Build the design for the households at `indices` (repeats allowed).
    ///
    /// Households of types not in the configuration are ignored, and cells
    /// with a single distinct household are dropped.
    ///
    /// # Errors
    /// `InsufficientData` when no singles or no households of a configured
    /// type remain.
    pub fn build(table: &HouseholdTable, indices: &[usize], config: &ModelConfig) -> Result<Self> {
        config.validate()?;
        let categories = table.categories().clone();
        let k = categories.n_shareable();
        let ns = categories.nonshareable_index();
        let n_demo = table.demographic_names().len();

        let in_model =
            |t: HouseholdType| t.is_single() || config.household_types.contains(&t);

        let mut rows = Vec::with_capacity(indices.len());
        for &idx in indices {
            let record = table.record(idx).ok_or_else(|| {
                EstimationError::InvalidConfig(format!(
                    "resample index {idx} is outside a table of {} households",
                    table.len()
                ))
            })?;
            if in_model(record.household_type) {
                rows.push(record);
            }
        }

        // Cells with one distinct household carry no within-cell variation
        let mut distinct: HashMap<(u32, HouseholdType), BTreeSet<usize>> = HashMap::new();
        for r in &rows {
            distinct
                .entry((r.cluster, r.household_type))
                .or_default()
                .insert(r.id);
        }
        let before = rows.len();
        rows.retain(|r| distinct[&(r.cluster, r.household_type)].len() > 1);
        if rows.len() < before {
            log::debug!("Dropped {} households in singleton cells", before - rows.len());
        }

        let count = |pred: &dyn Fn(HouseholdType) -> bool| {
            rows.iter().filter(|r| pred(r.household_type)).count()
        };
        if count(&|t| t.is_single()) == 0 {
            return Err(EstimationError::InsufficientData {
                context: "single households".to_string(),
                required: 1,
                actual: 0,
            });
        }
        for &t in &config.household_types {
            if count(&|u| u == t) == 0 {
                return Err(EstimationError::InsufficientData {
                    context: format!("households of type {t}"),
                    required: 1,
                    actual: 0,
                });
            }
        }

        let n = rows.len();
        let mut cell_index: HashMap<(u32, HouseholdType), usize> = HashMap::new();
        let mut cells = Vec::with_capacity(n);
        for r in &rows {
            let next = cell_index.len();
            cells.push(*cell_index.entry((r.cluster, r.household_type)).or_insert(next));
        }
        let n_cells = cell_index.len();

        let mut y = Array1::<f64>::zeros(n);
        let mut relative_prices = Array2::<f64>::zeros((n, k));
        let mut shares = Array2::<f64>::zeros((n, k + 1));
        let mut demographics = Array2::<f64>::zeros((n, n_demo));
        for (i, r) in rows.iter().enumerate() {
            let x = r.total_expenditure();
            let p_ns = r.log_price[ns];
            y[i] = x.ln() - p_ns;
            for c in 0..k {
                relative_prices[[i, c]] = (r.log_price[c] - p_ns).exp();
            }
            for c in 0..=k {
                shares[[i, c]] = r.expenditure[c] / x;
            }
            for d in 0..n_demo {
                demographics[[i, d]] = r.demographics[d];
            }
        }

        let y_tilde = demean_by_group(y.view().insert_axis(Axis(1)), &cells, n_cells).column(0).to_owned();
        let shares_tilde = demean_by_group(shares.slice(ndarray::s![.., ..k]), &cells, n_cells);
        let demographics_tilde = demean_by_group(demographics.view(), &cells, n_cells);

        log::debug!("Design with {n} households in {n_cells} cells");

        Ok(Self {
            categories,
            household_types: config.household_types.clone(),
            demographic_names: table.demographic_names().to_vec(),
            record_ids: rows.iter().map(|r| r.id).collect(),
            types: rows.iter().map(|r| r.household_type).collect(),
            clusters: rows.iter().map(|r| r.cluster).collect(),
            cells,
            n_cells,
            y,
            y_tilde,
            relative_prices,
            shares,
            shares_tilde,
            demographics,
            demographics_tilde,
        })
    }

    /// Number of households
    pub fn n_obs(&self) -> usize {
        self.types.len()
    }

    /// Number of fixed-effect cells
    pub fn n_cells(&self) -> usize {
        self.n_cells
    }

    /// Category configuration
    pub fn categories(&self) -> &CategorySet {
        &self.categories
    }

    /// Configured multi-person types
    pub fn household_types(&self) -> &[HouseholdType] {
        &self.household_types
    }

    /// Household type of every row
    pub fn types(&self) -> &[HouseholdType] {
        &self.types
    }

    /// Cluster of every row
    pub fn clusters(&self) -> &[u32] {
        &self.clusters
    }

    /// Table id of every row
    pub fn record_ids(&self) -> &[usize] {
        &self.record_ids
    }

    /// Cell of every row
    pub fn cells(&self) -> &[usize] {
        &self.cells
    }

    /// Log real expenditure (not demeaned)
    pub fn log_real_expenditure(&self) -> &Array1<f64> {
        &self.y
    }

    /// Relative prices `er_c` of the shareable goods (n x K)
    pub fn relative_prices(&self) -> &Array2<f64> {
        &self.relative_prices
    }

    /// Budget shares of all goods, nonshareable last (n x (K + 1))
    pub fn shares(&self) -> &Array2<f64> {
        &self.shares
    }

    /// Within-cell demeaned shares of the shareable goods (n x K)
    pub fn demeaned_shares(&self) -> &Array2<f64> {
        &self.shares_tilde
    }

    /// Rows of a given household type
    pub fn rows_where(&self, pred: impl Fn(HouseholdType) -> bool) -> Vec<usize> {
        (0..self.n_obs()).filter(|&i| pred(self.types[i])).collect()
    }

    /// Price-expenditure groups: singles (pooled or split by sex) followed by
    /// the configured multi-person types
    pub fn price_groups(&self, split_singles: bool) -> Vec<PriceGroup> {
        let mut groups = if split_singles {
            vec![PriceGroup::SingleMale, PriceGroup::SingleFemale]
        } else {
            vec![PriceGroup::Singles]
        };
        groups.extend(self.household_types.iter().map(|&t| PriceGroup::Multi(t)));
        groups
    }

    /// Detailed types present in the sample, in survey order
    pub fn detailed_types(&self) -> Vec<HouseholdType> {
        [HouseholdType::SingleMale, HouseholdType::SingleFemale]
            .into_iter()
            .chain(self.household_types.iter().copied())
            .filter(|t| self.types.contains(t))
            .collect()
    }

    /// Name of the price-expenditure regressor of group `g` in equation `eq`
    pub fn price_regressor_name(&self, eq: usize, group: PriceGroup) -> String {
        format!("er{}y_{}", self.categories.shareable[eq].code(), group)
    }

    /// Regressors of equation `eq` with their names.
    ///
    /// With `demeaned` the fixed-effect (within-cell) version is returned,
    /// otherwise the same columns built from raw `y` and `z`.
    pub fn equation_regressors(
        &self,
        eq: usize,
        split_singles: bool,
        demeaned: bool,
    ) -> (Array2<f64>, Vec<String>) {
        let groups = self.price_groups(split_singles);
        let detailed = self.detailed_types();
        let n_demo = self.demographic_names.len();
        let n = self.n_obs();
        let p = groups.len() + detailed.len() * n_demo;

        let y = if demeaned { &self.y_tilde } else { &self.y };
        let z = if demeaned {
            &self.demographics_tilde
        } else {
            &self.demographics
        };

        let mut x = Array2::<f64>::zeros((n, p));
        let mut names = Vec::with_capacity(p);
        for (j, &g) in groups.iter().enumerate() {
            for i in 0..n {
                if g.contains(self.types[i]) {
                    x[[i, j]] = self.relative_prices[[i, eq]] * y[i];
                }
            }
            names.push(self.price_regressor_name(eq, g));
        }

        let mut j = groups.len();
        for &t in &detailed {
            for (d, demo) in self.demographic_names.iter().enumerate() {
                for i in 0..n {
                    if self.types[i] == t {
                        x[[i, j]] = z[[i, d]];
                    }
                }
                names.push(format!("{demo}_{t}"));
                j += 1;
            }
        }

        (x, names)
    }
}
