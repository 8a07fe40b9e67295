//! Summary tables of a model fit and its bootstrap standard errors.
//!
//! An [`EstimationSummary`] flattens a [`ModelFit`] (and optionally a
//! [`BootstrapResult`]) into plain rows that render as ASCII or Markdown
//! tables and serialize to JSON or CSV. Estimates whose covariance needed a
//! large positive-semidefinite adjustment are flagged with
//! [`UNSTABLE_MARKER`] in tables and `unstable: true` in exports.

use barten_data::{Category, HouseholdType};
use barten_model::{
    BootstrapConfig, BootstrapResult, ModelConfig, ModelFit, ReferenceGroup, TestOutcome,
};
use barten_stats::linalg::triangle_pairs;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Marker appended to estimates that carry a stability warning.
pub const UNSTABLE_MARKER: &str = "*";

/// Scale of one good for one household type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScaleRow {
    /// Household type
    pub household_type: HouseholdType,
    /// Shareable good
    pub category: Category,
    /// Point estimate
    pub scale: f64,
    /// Delta-method standard error
    pub std_error: f64,
    /// Bootstrap standard error
    pub bootstrap_se: Option<f64>,
    /// Covariance needed a large projection
    pub unstable: bool,
}

/// Standard deviation of the random scale of one good.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RandomScaleRow {
    /// Household type
    pub household_type: HouseholdType,
    /// Shareable good
    pub category: Category,
    /// Point estimate
    pub std: f64,
    /// Bootstrap standard error
    pub bootstrap_se: Option<f64>,
    /// Estimate at the lower robustness penalty
    pub lower_std: Option<f64>,
    /// Estimate at the upper robustness penalty
    pub upper_std: Option<f64>,
    /// Covariance needed a large projection
    pub unstable: bool,
}

/// Economies-of-scale index for one reference group and household type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexRow {
    /// Reference group whose shares weight the scales
    pub reference: ReferenceGroup,
    /// Household type
    pub household_type: HouseholdType,
    /// Mean index
    pub mean: f64,
    /// Spread of the index across reference households
    pub std: Option<f64>,
    /// Spread including random-scale heterogeneity
    pub heterogeneity_std: Option<f64>,
    /// Bootstrap standard error of the mean
    pub mean_bootstrap_se: Option<f64>,
    /// Bootstrap standard error of the spread
    pub std_bootstrap_se: Option<f64>,
    /// Bootstrap standard error of the heterogeneity spread
    pub heterogeneity_bootstrap_se: Option<f64>,
}

/// One hypothesis test.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestRow {
    /// Test name
    pub name: String,
    /// Wald statistic
    pub statistic: Option<f64>,
    /// Degrees of freedom
    pub df: Option<usize>,
    /// χ² p-value
    pub p_value: Option<f64>,
    /// Why the test is unavailable
    pub note: Option<String>,
}

impl TestRow {
    /// Whether the null is rejected at level `alpha`, `None` when the test
    /// was not computed.
    pub fn rejects(&self, alpha: f64) -> Option<bool> {
        self.p_value.map(|p| p < alpha)
    }
}

/// Which matrix a [`MatrixSummary`] holds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MatrixKind {
    /// Delta-method covariance of the scales
    ScaleCovariance,
    /// Covariance of the random scales
    RandomCovariance,
    /// Correlation of the random scales
    RandomCorrelation,
}

impl MatrixKind {
    /// Short label.
    pub const fn label(&self) -> &'static str {
        match self {
            Self::ScaleCovariance => "scale covariance",
            Self::RandomCovariance => "random-scale covariance",
            Self::RandomCorrelation => "random-scale correlation",
        }
    }
}

impl fmt::Display for MatrixKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A covariance or correlation matrix over the shareable goods.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatrixSummary {
    /// Household type
    pub household_type: HouseholdType,
    /// Matrix held
    pub kind: MatrixKind,
    /// Row and column labels
    pub labels: Vec<String>,
    /// Values, row-major
    pub values: Vec<Vec<f64>>,
    /// Bootstrap standard errors of every entry
    pub bootstrap_se: Option<Vec<Vec<Option<f64>>>>,
    /// Matrix needed a large projection
    pub unstable: bool,
}

impl MatrixSummary {
    fn new(
        household_type: HouseholdType,
        kind: MatrixKind,
        labels: &[String],
        matrix: &Array2<f64>,
        unstable: bool,
    ) -> Self {
        Self {
            household_type,
            kind,
            labels: labels.to_vec(),
            values: matrix.rows().into_iter().map(|r| r.to_vec()).collect(),
            bootstrap_se: None,
            unstable,
        }
    }
}

/// Replicate counts of a bootstrap run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BootstrapSummary {
    /// Settings used
    pub config: BootstrapConfig,
    /// Replicates attempted
    pub attempted: usize,
    /// Replicates that succeeded
    pub succeeded: usize,
    /// Replicates that failed
    pub failed: usize,
}

/// Everything reported about one estimation run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EstimationSummary {
    /// Title of the run
    pub title: String,
    /// Households in the estimation sample
    pub n_obs: usize,
    /// Model settings
    pub config: ModelConfig,
    /// Scales
    pub scales: Vec<ScaleRow>,
    /// Random-scale standard deviations
    pub random_scales: Vec<RandomScaleRow>,
    /// Index summaries
    pub index: Vec<IndexRow>,
    /// Hypothesis tests
    pub tests: Vec<TestRow>,
    /// Covariance and correlation matrices
    pub matrices: Vec<MatrixSummary>,
    /// Bootstrap replicate counts
    pub bootstrap: Option<BootstrapSummary>,
}

/// Rebuild a full matrix of optional values from its packed upper triangle.
fn unpack(packed: &[Option<f64>], n: usize) -> Option<Vec<Vec<Option<f64>>>> {
    let pairs = triangle_pairs(n);
    if packed.len() != pairs.len() || packed.iter().all(Option::is_none) {
        return None;
    }
    let mut full = vec![vec![None; n]; n];
    for (&(i, j), value) in pairs.iter().zip(packed) {
        full[i][j] = *value;
        full[j][i] = *value;
    }
    Some(full)
}

fn se_at(values: &[Option<f64>], i: usize) -> Option<f64> {
    values.get(i).copied().flatten()
}

fn fmt_opt(value: Option<f64>, precision: usize) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{v:.precision$}"))
}

fn fmt_se(value: Option<f64>) -> String {
    value.map_or_else(String::new, |v| format!("({v:.4})"))
}

const fn marker(unstable: bool) -> &'static str {
    if unstable { UNSTABLE_MARKER } else { "" }
}

impl EstimationSummary {
    /// Summarize a fit, attaching bootstrap standard errors when given.
    ///
    /// # Arguments
    ///
    /// * `title` - Name of the run shown in table headers
    /// * `fit` - Full-sample model fit
    /// * `config` - Settings the fit was produced with
    /// * `bootstrap` - Bootstrap run on the same sample, if any
    pub fn from_fit(
        title: impl Into<String>,
        fit: &ModelFit,
        config: &ModelConfig,
        bootstrap: Option<&BootstrapResult>,
    ) -> Self {
        let categories = &fit.demand.categories;
        let labels: Vec<String> = categories.iter().map(|c| c.to_string()).collect();
        let k = categories.len();

        let mut scales = Vec::new();
        let mut random_scales = Vec::new();
        let mut matrices = Vec::new();

        for estimate in &fit.scales {
            let t = estimate.household_type;
            let errors = bootstrap.and_then(|b| b.for_type(t));
            let se = estimate.standard_errors();
            for (c, &category) in categories.iter().enumerate() {
                scales.push(ScaleRow {
                    household_type: t,
                    category,
                    scale: estimate.scales[c],
                    std_error: se[c],
                    bootstrap_se: errors.and_then(|e| se_at(&e.scales, c)),
                    unstable: estimate.is_unstable(),
                });
            }
            let mut matrix = MatrixSummary::new(
                t,
                MatrixKind::ScaleCovariance,
                &labels,
                &estimate.cov,
                estimate.is_unstable(),
            );
            matrix.bootstrap_se = errors.and_then(|e| unpack(&e.scale_cov, k));
            matrices.push(matrix);
        }

        for random in &fit.random_scales {
            let t = random.household_type;
            let errors = bootstrap.and_then(|b| b.for_type(t));
            for (c, &category) in categories.iter().enumerate() {
                random_scales.push(RandomScaleRow {
                    household_type: t,
                    category,
                    std: random.std[c],
                    bootstrap_se: errors.and_then(|e| se_at(&e.random_std, c)),
                    lower_std: random.robustness.as_ref().map(|r| r.lower_std[c]),
                    upper_std: random.robustness.as_ref().map(|r| r.upper_std[c]),
                    unstable: random.is_unstable(),
                });
            }
            let mut cov = MatrixSummary::new(
                t,
                MatrixKind::RandomCovariance,
                &labels,
                &random.cov,
                random.is_unstable(),
            );
            cov.bootstrap_se = errors.and_then(|e| unpack(&e.random_cov, k));
            matrices.push(cov);

            if let Some(correlation) = &random.correlation {
                let mut cor = MatrixSummary::new(
                    t,
                    MatrixKind::RandomCorrelation,
                    &labels,
                    correlation,
                    random.is_unstable(),
                );
                cor.bootstrap_se = errors.and_then(|e| unpack(&e.random_correlation, k));
                matrices.push(cor);
            }
        }

        let index = fit
            .index
            .iter()
            .map(|s| {
                let errors = bootstrap.and_then(|b| b.for_index(s.reference, s.household_type));
                IndexRow {
                    reference: s.reference,
                    household_type: s.household_type,
                    mean: s.mean,
                    std: s.std,
                    heterogeneity_std: s.heterogeneity_std,
                    mean_bootstrap_se: errors.and_then(|e| e.mean),
                    std_bootstrap_se: errors.and_then(|e| e.std),
                    heterogeneity_bootstrap_se: errors.and_then(|e| e.heterogeneity_std),
                }
            })
            .collect();

        let tests = fit
            .tests
            .iter()
            .map(|t| match &t.outcome {
                TestOutcome::Computed(w) => TestRow {
                    name: t.name.clone(),
                    statistic: Some(w.statistic),
                    df: Some(w.df),
                    p_value: Some(w.p_value),
                    note: None,
                },
                TestOutcome::Unavailable { reason } => TestRow {
                    name: t.name.clone(),
                    statistic: None,
                    df: None,
                    p_value: None,
                    note: Some(reason.clone()),
                },
            })
            .collect();

        Self {
            title: title.into(),
            n_obs: fit.n_obs,
            config: config.clone(),
            scales,
            random_scales,
            index,
            tests,
            matrices,
            bootstrap: bootstrap.map(|b| BootstrapSummary {
                config: b.config,
                attempted: b.attempted,
                succeeded: b.succeeded,
                failed: b.failures.len(),
            }),
        }
    }

    /// Whether any estimate carries a stability warning.
    pub fn has_unstable(&self) -> bool {
        self.scales.iter().any(|s| s.unstable)
            || self.random_scales.iter().any(|s| s.unstable)
            || self.matrices.iter().any(|m| m.unstable)
    }

    /// Household types in the order they were estimated.
    pub fn household_types(&self) -> Vec<HouseholdType> {
        let mut types = Vec::new();
        for row in &self.scales {
            if !types.contains(&row.household_type) {
                types.push(row.household_type);
            }
        }
        types
    }

    /// Format as ASCII table for terminal display.
    pub fn to_ascii_table(&self) -> String {
        let mut output = String::new();

        output.push_str(&format!("\nBarten Scales: {}\n", self.title));
        output.push_str(&format!("Households: {}\n", self.n_obs));
        if let Some(b) = &self.bootstrap {
            output.push_str(&format!(
                "Bootstrap: {}/{} replicates succeeded (seed {})\n",
                b.succeeded, b.attempted, b.config.seed
            ));
        }
        output.push_str(&"=".repeat(80));
        output.push('\n');

        if !self.scales.is_empty() {
            output.push_str("\nScales:\n");
            output.push_str(&"-".repeat(80));
            output.push('\n');
            output.push_str(&format!(
                "{:<6} {:<28} {:>12} {:>12} {:>12}\n",
                "Type", "Good", "Scale", "Std. Err.", "Boot. SE"
            ));
            output.push_str(&"-".repeat(80));
            output.push('\n');
            for row in &self.scales {
                output.push_str(&format!(
                    "{:<6} {:<28} {:>11.4}{:1} {:>12.4} {:>12}\n",
                    row.household_type.label(),
                    row.category.label(),
                    row.scale,
                    marker(row.unstable),
                    row.std_error,
                    fmt_opt(row.bootstrap_se, 4)
                ));
            }
        }

        if !self.random_scales.is_empty() {
            output.push_str("\nRandom-Scale Standard Deviations:\n");
            output.push_str(&"-".repeat(80));
            output.push('\n');
            output.push_str(&format!(
                "{:<6} {:<28} {:>10} {:>10} {:>10} {:>10}\n",
                "Type", "Good", "Std. Dev.", "Boot. SE", "Lower", "Upper"
            ));
            output.push_str(&"-".repeat(80));
            output.push('\n');
            for row in &self.random_scales {
                output.push_str(&format!(
                    "{:<6} {:<28} {:>9.4}{:1} {:>10} {:>10} {:>10}\n",
                    row.household_type.label(),
                    row.category.label(),
                    row.std,
                    marker(row.unstable),
                    fmt_opt(row.bootstrap_se, 4),
                    fmt_opt(row.lower_std, 4),
                    fmt_opt(row.upper_std, 4)
                ));
            }
        }

        if !self.index.is_empty() {
            output.push_str("\nEconomies-of-Scale Index:\n");
            output.push_str(&"-".repeat(80));
            output.push('\n');
            output.push_str(&format!(
                "{:<16} {:<6} {:>10} {:>10} {:>10} {:>10} {:>10} {:>10}\n",
                "Reference", "Type", "Mean", "Boot. SE", "Std. Dev.", "Boot. SE", "Hetero.", "Boot. SE"
            ));
            output.push_str(&"-".repeat(80));
            output.push('\n');
            for row in &self.index {
                output.push_str(&format!(
                    "{:<16} {:<6} {:>10.4} {:>10} {:>10} {:>10} {:>10} {:>10}\n",
                    row.reference.label(),
                    row.household_type.label(),
                    row.mean,
                    fmt_opt(row.mean_bootstrap_se, 4),
                    fmt_opt(row.std, 4),
                    fmt_opt(row.std_bootstrap_se, 4),
                    fmt_opt(row.heterogeneity_std, 4),
                    fmt_opt(row.heterogeneity_bootstrap_se, 4)
                ));
            }
        }

        if !self.tests.is_empty() {
            output.push_str("\nHypothesis Tests:\n");
            output.push_str(&"-".repeat(80));
            output.push('\n');
            output.push_str(&format!(
                "{:<44} {:>12} {:>6} {:>12}\n",
                "Test", "Wald", "df", "p-value"
            ));
            output.push_str(&"-".repeat(80));
            output.push('\n');
            for row in &self.tests {
                match &row.note {
                    Some(note) => {
                        output.push_str(&format!("{:<44} unavailable: {}\n", row.name, note));
                    }
                    None => output.push_str(&format!(
                        "{:<44} {:>12} {:>6} {:>12}\n",
                        row.name,
                        fmt_opt(row.statistic, 3),
                        row.df.map(|d| d.to_string()).unwrap_or_default(),
                        fmt_opt(row.p_value, 4)
                    )),
                }
            }
        }

        output.push_str(&"=".repeat(80));
        output.push('\n');
        if self.has_unstable() {
            output.push_str(&format!(
                "{UNSTABLE_MARKER} covariance needed a large positive-semidefinite adjustment\n"
            ));
        }

        output
    }

    /// Format as Markdown for documentation.
    pub fn to_markdown(&self) -> String {
        let mut output = String::new();

        output.push_str(&format!("# Barten Scales: {}\n\n", self.title));
        output.push_str(&format!("**Households:** {}\n\n", self.n_obs));
        if let Some(b) = &self.bootstrap {
            output.push_str(&format!(
                "**Bootstrap:** {}/{} replicates succeeded (seed {})\n\n",
                b.succeeded, b.attempted, b.config.seed
            ));
        }

        if !self.scales.is_empty() {
            output.push_str("## Scales\n\n");
            output.push_str("| Type | Good | Scale | Std. Err. | Bootstrap SE |\n");
            output.push_str("|------|------|-------|-----------|--------------|\n");
            for row in &self.scales {
                output.push_str(&format!(
                    "| {} | {} | {:.4}{} | {:.4} | {} |\n",
                    row.household_type,
                    row.category,
                    row.scale,
                    marker(row.unstable),
                    row.std_error,
                    fmt_opt(row.bootstrap_se, 4)
                ));
            }
            output.push('\n');
        }

        if !self.random_scales.is_empty() {
            output.push_str("## Random-Scale Standard Deviations\n\n");
            output.push_str("| Type | Good | Std. Dev. | Bootstrap SE | Lower | Upper |\n");
            output.push_str("|------|------|-----------|--------------|-------|-------|\n");
            for row in &self.random_scales {
                output.push_str(&format!(
                    "| {} | {} | {:.4}{} | {} | {} | {} |\n",
                    row.household_type,
                    row.category,
                    row.std,
                    marker(row.unstable),
                    fmt_opt(row.bootstrap_se, 4),
                    fmt_opt(row.lower_std, 4),
                    fmt_opt(row.upper_std, 4)
                ));
            }
            output.push('\n');
        }

        if !self.index.is_empty() {
            output.push_str("## Economies-of-Scale Index\n\n");
            output.push_str("| Reference | Type | Mean | Std. Dev. | Heterogeneity Std. Dev. |\n");
            output.push_str("|-----------|------|------|-----------|-------------------------|\n");
            for row in &self.index {
                output.push_str(&format!(
                    "| {} | {} | {:.4} {} | {} {} | {} {} |\n",
                    row.reference,
                    row.household_type,
                    row.mean,
                    fmt_se(row.mean_bootstrap_se),
                    fmt_opt(row.std, 4),
                    fmt_se(row.std_bootstrap_se),
                    fmt_opt(row.heterogeneity_std, 4),
                    fmt_se(row.heterogeneity_bootstrap_se)
                ));
            }
            output.push('\n');
        }

        if !self.tests.is_empty() {
            output.push_str("## Hypothesis Tests\n\n");
            output.push_str("| Test | Wald | df | p-value |\n");
            output.push_str("|------|------|----|---------|\n");
            for row in &self.tests {
                match &row.note {
                    Some(note) => {
                        output.push_str(&format!("| {} | unavailable: {} | | |\n", row.name, note));
                    }
                    None => output.push_str(&format!(
                        "| {} | {} | {} | {} |\n",
                        row.name,
                        fmt_opt(row.statistic, 3),
                        row.df.map(|d| d.to_string()).unwrap_or_default(),
                        fmt_opt(row.p_value, 4)
                    )),
                }
            }
            output.push('\n');
        }

        if self.has_unstable() {
            output.push_str(&format!(
                "{UNSTABLE_MARKER} covariance needed a large positive-semidefinite adjustment\n"
            ));
        }

        output
    }
}

impl fmt::Display for EstimationSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Barten Scales: {} ({} households)", self.title, self.n_obs)?;
        for t in self.household_types() {
            let scales: Vec<String> = self
                .scales
                .iter()
                .filter(|s| s.household_type == t)
                .map(|s| format!("{:.3}{}", s.scale, marker(s.unstable)))
                .collect();
            writeln!(f, "  {t}: {}", scales.join(" "))?;
        }
        if let Some(b) = &self.bootstrap {
            writeln!(f, "  Bootstrap: {}/{} replicates", b.succeeded, b.attempted)?;
        }
        Ok(())
    }
}
