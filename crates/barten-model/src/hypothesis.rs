//! Wald tests of the identifying assumptions.
//!
//! * Homogeneity: a household type has the same scale for every shareable
//!   good (`a_T1 = ... = a_TK`).
//! * Singles pooling: single males and single females share their
//!   price-expenditure coefficients, which is what lets them serve as one
//!   reference group.
//! * Shareability: the scale of a good differs from one.
//!
//! A test whose covariance block cannot be inverted is reported as
//! unavailable; the remaining tests still run.

use crate::demand::{DemandFit, estimate_demand};
use crate::design::{Design, PriceGroup};
use crate::error::{EstimationError, Result};
use crate::scales::ScaleEstimate;
use barten_data::{Category, HouseholdType};
use barten_stats::{WaldTest, wald_test};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

/// Which restriction is tested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TestKind {
    /// Equal scales across goods
    Homogeneity,
    /// Equal price-expenditure coefficients for single males and females
    SinglesPooling,
    /// Scale of one good equal to one
    Shareability,
}

/// Result of a test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TestOutcome {
    /// Statistic, degrees of freedom and p-value
    Computed(WaldTest),
    /// The test could not be computed
    Unavailable {
        /// Why
        reason: String,
    },
}

/// One hypothesis test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HypothesisTest {
    /// Display name
    pub name: String,
    /// Restriction tested
    pub kind: TestKind,
    /// Household type, for type-specific tests
    pub household_type: Option<HouseholdType>,
    /// Good, for good-specific tests
    pub category: Option<Category>,
    /// Outcome
    pub outcome: TestOutcome,
}

impl HypothesisTest {
    /// The Wald test, if computed
    pub fn wald(&self) -> Option<&WaldTest> {
        match &self.outcome {
            TestOutcome::Computed(w) => Some(w),
            TestOutcome::Unavailable { .. } => None,
        }
    }
}

fn wald(diff: &Array1<f64>, cov: &Array2<f64>, context: &str) -> Result<WaldTest> {
    wald_test(diff, cov).map_err(|e| EstimationError::DegenerateCovariance {
        context: format!("{context}: {e}"),
    })
}

fn outcome(result: Result<WaldTest>, name: &str) -> TestOutcome {
    match result {
        Ok(w) => TestOutcome::Computed(w),
        Err(e) => {
            log::warn!("Test '{name}' unavailable: {e}");
            TestOutcome::Unavailable {
                reason: e.to_string(),
            }
        }
    }
}

/// `a_Tc - a_T1 = 0` for every `c > 1`, df `K - 1`.
pub fn homogeneity(estimate: &ScaleEstimate) -> HypothesisTest {
    let t = estimate.household_type;
    let name = format!("homogeneity ({t})");
    let k = estimate.scales.len();

    let result = if k < 2 {
        Err(EstimationError::InsufficientData {
            context: name.clone(),
            required: 2,
            actual: k,
        })
    } else {
        // Contrast rows e_c - e_1
        let mut contrast = Array2::<f64>::zeros((k - 1, k));
        for c in 1..k {
            contrast[[c - 1, 0]] = -1.0;
            contrast[[c - 1, c]] = 1.0;
        }
        let diff = contrast.dot(&estimate.scales);
        let cov = contrast.dot(&estimate.raw_cov).dot(&contrast.t());
        wald(&diff, &cov, &name)
    };

    HypothesisTest {
        outcome: outcome(result, &name),
        name,
        kind: TestKind::Homogeneity,
        household_type: Some(t),
        category: None,
    }
}

/// `a_Tc = 1` for each good, df 1.
pub fn shareability(estimate: &ScaleEstimate, categories: &[Category]) -> Vec<HypothesisTest> {
    let t = estimate.household_type;
    categories
        .iter()
        .enumerate()
        .map(|(c, &category)| {
            let name = format!("shareability ({t}, {category})");
            let diff = Array1::from_elem(1, estimate.scales[c] - 1.0);
            let cov = Array2::from_elem((1, 1), estimate.raw_cov[[c, c]]);
            HypothesisTest {
                outcome: outcome(wald(&diff, &cov, &name), &name),
                name,
                kind: TestKind::Shareability,
                household_type: Some(t),
                category: Some(category),
            }
        })
        .collect()
}

fn pooling_wald(fit: &DemandFit, context: &str) -> Result<WaldTest> {
    let k = fit.n_equations();
    let mut indices = Vec::with_capacity(2 * k);
    let mut diff = Array1::<f64>::zeros(k);
    for eq in 0..k {
        let found = (
            fit.price_param_index(eq, PriceGroup::SingleMale),
            fit.price_param_index(eq, PriceGroup::SingleFemale),
            fit.price_coefficient(eq, PriceGroup::SingleMale),
            fit.price_coefficient(eq, PriceGroup::SingleFemale),
        );
        let (Some(m), Some(f), Some(bm), Some(bf)) = found else {
            return Err(EstimationError::InvalidConfig(
                "demand fit does not split singles by sex".to_string(),
            ));
        };
        indices.push(m);
        indices.push(f);
        diff[eq] = bm - bf;
    }

    let mut contrast = Array2::<f64>::zeros((k, 2 * k));
    for eq in 0..k {
        contrast[[eq, 2 * eq]] = 1.0;
        contrast[[eq, 2 * eq + 1]] = -1.0;
    }
    let cov = contrast
        .dot(&fit.sur.covariance_block(&indices))
        .dot(&contrast.t());
    wald(&diff, &cov, context)
}

/// `b_sm,c = b_sf,c` for all goods, df `K`. Refits the demand system with
/// the singles' coefficients split by sex.
pub fn singles_pooling(design: &Design) -> HypothesisTest {
    let name = "singles pooling".to_string();
    let result = estimate_demand(design, true).and_then(|fit| pooling_wald(&fit, &name));
    HypothesisTest {
        outcome: outcome(result, &name),
        name,
        kind: TestKind::SinglesPooling,
        household_type: None,
        category: None,
    }
}

/// All tests: singles pooling, then homogeneity and shareability per type.
pub fn run_tests(design: &Design, fit: &DemandFit, scales: &[ScaleEstimate]) -> Vec<HypothesisTest> {
    let mut tests = vec![singles_pooling(design)];
    for estimate in scales {
        tests.push(homogeneity(estimate));
        tests.extend(shareability(estimate, &fit.categories));
    }
    tests
}
