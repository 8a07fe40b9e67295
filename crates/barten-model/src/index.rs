//! Economies-of-scale index.
//!
//! For a reference household with budget shares `w` (all goods, the
//! nonshareable good with scale 1) living as household type `T`, the index
//! is `I = Σ_c w_c a_Tc`: the cost of the reference bundle relative to
//! living alone. Values below the household size indicate economies of
//! scale.

use crate::design::Design;
use crate::scales::ScaleEstimate;
use crate::variance::RandomScaleEstimate;
use barten_data::HouseholdType;
use barten_stats::{sample_covariance, sample_std};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Households whose budget shares weight the scales.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReferenceGroup {
    /// All singles
    Singles,
    /// Single males
    SingleMales,
    /// Single females
    SingleFemales,
}

impl ReferenceGroup {
    /// Every reference group
    pub const ALL: [Self; 3] = [Self::Singles, Self::SingleMales, Self::SingleFemales];

    /// Whether households of type `t` belong to the group
    pub fn contains(self, t: HouseholdType) -> bool {
        match self {
            Self::Singles => t.is_single(),
            Self::SingleMales => t == HouseholdType::SingleMale,
            Self::SingleFemales => t == HouseholdType::SingleFemale,
        }
    }

    /// Short label
    pub const fn label(self) -> &'static str {
        match self {
            Self::Singles => "singles",
            Self::SingleMales => "single males",
            Self::SingleFemales => "single females",
        }
    }
}

impl fmt::Display for ReferenceGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Index values for one reference group and household type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSummary {
    /// Reference group
    pub reference: ReferenceGroup,
    /// Household type whose scales are used
    pub household_type: HouseholdType,
    /// Index of every reference household
    pub values: Vec<f64>,
    /// Average of `values`
    pub mean: f64,
    /// `w̄' a`
    pub direct_mean: f64,
    /// Sample standard deviation of `values`, `None` with fewer than two
    /// households
    pub std: Option<f64>,
    /// Standard deviation including random-scale heterogeneity
    pub heterogeneity_std: Option<f64>,
}

/// Index of every row of `shares` (n x (K + 1)) given the scales of all
/// goods. Zero shares contribute nothing.
pub fn index_values(shares: &Array2<f64>, scales: &Array1<f64>) -> Vec<f64> {
    shares
        .rows()
        .into_iter()
        .map(|w| {
            w.iter()
                .zip(scales)
                .filter(|(wc, _)| **wc != 0.0)
                .map(|(wc, a)| wc * a)
                .sum()
        })
        .collect()
}

/// `sqrt(a' Σ_w a + w̄' Σ_a w̄)`, with `Σ_a` (K x K) padded by a zero row and
/// column for the nonshareable good.
pub fn heterogeneity_std(shares: &Array2<f64>, scales: &Array1<f64>, random_cov: &Array2<f64>) -> Option<f64> {
    let sigma_w = sample_covariance(shares).ok()?;
    let mean_w = shares.mean_axis(Axis(0))?;
    let k = random_cov.nrows();

    let mut padded = Array2::<f64>::zeros((k + 1, k + 1));
    padded.slice_mut(ndarray::s![..k, ..k]).assign(random_cov);

    let variance = scales.dot(&sigma_w.dot(scales)) + mean_w.dot(&padded.dot(&mean_w));
    (variance >= 0.0).then(|| variance.sqrt())
}

/// Summarise the index for one reference share matrix.
pub fn summarize(
    reference: ReferenceGroup,
    scales: &ScaleEstimate,
    shares: &Array2<f64>,
    random: Option<&RandomScaleEstimate>,
) -> Option<IndexSummary> {
    let n = shares.nrows();
    if n == 0 {
        return None;
    }
    let full = scales.full_scales();
    let values = index_values(shares, &full);
    let mean = values.iter().sum::<f64>() / n as f64;
    let direct_mean = shares.mean_axis(Axis(0))?.dot(&full);

    Some(IndexSummary {
        reference,
        household_type: scales.household_type,
        std: sample_std(&values),
        heterogeneity_std: random.and_then(|r| heterogeneity_std(shares, &full, &r.cov)),
        values,
        mean,
        direct_mean,
    })
}

/// Index summaries for every reference group present in the sample and
/// every household type.
pub fn compute_indices(
    design: &Design,
    scales: &[ScaleEstimate],
    random: Option<&[RandomScaleEstimate]>,
) -> Vec<IndexSummary> {
    let mut out = Vec::new();
    for reference in ReferenceGroup::ALL {
        let rows = design.rows_where(|t| reference.contains(t));
        if rows.is_empty() {
            log::debug!("No {reference} in the sample, index skipped");
            continue;
        }
        let shares = design.shares().select(Axis(0), &rows);
        for estimate in scales {
            let matching = random
                .and_then(|r| r.iter().find(|e| e.household_type == estimate.household_type));
            if let Some(summary) = summarize(reference, estimate, &shares, matching) {
                out.push(summary);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use barten_stats::ProjectionDiagnostic;
    use ndarray::array;

    fn estimate(scales: Array1<f64>) -> ScaleEstimate {
        let k = scales.len();
        ScaleEstimate {
            household_type: HouseholdType::TwoPerson,
            scales,
            raw_cov: Array2::zeros((k, k)),
            cov: Array2::zeros((k, k)),
            diagnostic: ProjectionDiagnostic {
                adjustment: 0.0,
                relative_adjustment: 0.0,
                min_eigenvalue: 0.0,
                clipped_eigenvalues: 0,
                condition_number: None,
                unstable: false,
            },
            warning: None,
        }
    }

    fn shares() -> Array2<f64> {
        array![
            [0.2, 0.3, 0.5],
            [0.4, 0.0, 0.6],
            [0.1, 0.6, 0.3],
            [0.3, 0.3, 0.4],
        ]
    }

    #[test]
    fn test_direct_mean_equals_average() {
        let scales = estimate(array![1.4, 0.9]);
        let summary = summarize(ReferenceGroup::Singles, &scales, &shares(), None).unwrap();

        assert_eq!(summary.values.len(), 4);
        assert_abs_diff_eq!(summary.values[1], 0.4 * 1.4 + 0.6, epsilon = 1e-12);
        assert_abs_diff_eq!(summary.mean, summary.direct_mean, epsilon = 1e-12);
        assert!(summary.std.unwrap() > 0.0);
        assert_eq!(summary.heterogeneity_std, None);
    }

    #[test]
    fn test_unit_scales_give_unit_index() {
        let scales = estimate(array![1.0, 1.0]);
        let summary = summarize(ReferenceGroup::Singles, &scales, &shares(), None).unwrap();
        for v in &summary.values {
            assert_abs_diff_eq!(*v, 1.0, epsilon = 1e-12);
        }
        assert_abs_diff_eq!(summary.std.unwrap(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_heterogeneity_std() {
        let s = shares();
        let full = array![1.4, 0.9, 1.0];
        let random_cov = array![[0.04, 0.0], [0.0, 0.01]];
        let h = heterogeneity_std(&s, &full, &random_cov).unwrap();

        let values = index_values(&s, &full);
        let between = sample_std(&values).unwrap().powi(2);
        let w = s.mean_axis(Axis(0)).unwrap();
        let within = 0.04 * w[0] * w[0] + 0.01 * w[1] * w[1];
        assert_abs_diff_eq!(h * h, between + within, epsilon = 1e-12);
    }

    #[test]
    fn test_single_household_has_no_spread() {
        let scales = estimate(array![1.2, 1.1]);
        let one = array![[0.2, 0.3, 0.5]];
        let summary = summarize(ReferenceGroup::SingleMales, &scales, &one, None).unwrap();
        assert_eq!(summary.std, None);
        assert!(summarize(ReferenceGroup::SingleMales, &scales, &Array2::zeros((0, 3)), None).is_none());
    }

    #[test]
    fn test_reference_groups() {
        assert!(ReferenceGroup::Singles.contains(HouseholdType::SingleFemale));
        assert!(!ReferenceGroup::SingleMales.contains(HouseholdType::SingleFemale));
        assert!(!ReferenceGroup::SingleFemales.contains(HouseholdType::TwoPerson));
    }
}
