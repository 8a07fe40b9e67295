//! Full model fit: demand system, scales, random-scale covariance and index.

use crate::config::ModelConfig;
use crate::demand::{DemandFit, estimate_demand};
use crate::design::Design;
use crate::error::Result;
use crate::hypothesis::{HypothesisTest, run_tests};
use crate::index::{IndexSummary, ReferenceGroup, compute_indices};
use crate::scales::{ScaleEstimate, recover_scales};
use crate::variance::{LassoSelection, RandomScaleEstimate, estimate_random_scales};
use barten_data::{HouseholdTable, HouseholdType};

/// Everything estimated on one sample.
#[derive(Debug, Clone)]
pub struct ModelFit {
    /// Households in the estimation design
    pub n_obs: usize,
    /// Demand system
    pub demand: DemandFit,
    /// Scales per household type
    pub scales: Vec<ScaleEstimate>,
    /// Random-scale covariances per household type (empty when disabled)
    pub random_scales: Vec<RandomScaleEstimate>,
    /// LASSO selection used for the random scales
    pub lasso: Option<LassoSelection>,
    /// Index summaries per reference group and household type
    pub index: Vec<IndexSummary>,
    /// Hypothesis tests (full-sample fits only)
    pub tests: Vec<HypothesisTest>,
}

impl ModelFit {
    /// Scales of a household type
    pub fn scale(&self, household_type: HouseholdType) -> Option<&ScaleEstimate> {
        self.scales.iter().find(|s| s.household_type == household_type)
    }

    /// Random-scale covariance of a household type
    pub fn random_scale(&self, household_type: HouseholdType) -> Option<&RandomScaleEstimate> {
        self.random_scales
            .iter()
            .find(|s| s.household_type == household_type)
    }

    /// Index summary for a reference group and household type
    pub fn index_summary(
        &self,
        reference: ReferenceGroup,
        household_type: HouseholdType,
    ) -> Option<&IndexSummary> {
        self.index
            .iter()
            .find(|s| s.reference == reference && s.household_type == household_type)
    }

    /// Number of estimates carrying a stability warning
    pub fn unstable_count(&self) -> usize {
        self.scales.iter().filter(|s| s.is_unstable()).count()
            + self.random_scales.iter().filter(|s| s.is_unstable()).count()
    }
}

/// Fit the model on the households at `indices` (repeats allowed), without
/// hypothesis tests.
///
/// With LASSO enabled, a `selection` from an earlier fit is reused instead
/// of cross-validating again.
///
/// # Errors
/// Any error of the design, demand, scale or random-scale steps.
pub fn fit_model(
    table: &HouseholdTable,
    indices: &[usize],
    config: &ModelConfig,
    selection: Option<&LassoSelection>,
) -> Result<ModelFit> {
    let design = Design::build(table, indices, config)?;
    fit_design(&design, config, selection)
}

fn fit_design(
    design: &Design,
    config: &ModelConfig,
    selection: Option<&LassoSelection>,
) -> Result<ModelFit> {
    let demand = estimate_demand(design, false)?;
    let scales = recover_scales(&demand, &config.household_types, &config.projection)?;

    let (random_scales, lasso) = if config.random_scales {
        estimate_random_scales(design, &demand, config, selection)?
    } else {
        (Vec::new(), None)
    };

    let random = config.random_scales.then_some(random_scales.as_slice());
    let index = compute_indices(design, &scales, random);

    Ok(ModelFit {
        n_obs: design.n_obs(),
        demand,
        scales,
        random_scales,
        lasso,
        index,
        tests: Vec::new(),
    })
}

/// Fit the model on the whole table and run the hypothesis tests.
///
/// # Errors
/// As [`fit_model`]. Test failures are reported inside the tests, not as
/// errors.
pub fn estimate(table: &HouseholdTable, config: &ModelConfig) -> Result<ModelFit> {
    let all: Vec<usize> = (0..table.len()).collect();
    log::info!("Estimating on {} households", table.len());

    let design = Design::build(table, &all, config)?;
    let mut fit = fit_design(&design, config, None)?;
    fit.tests = run_tests(&design, &fit.demand, &fit.scales);

    let unstable = fit.unstable_count();
    if unstable > 0 {
        log::warn!("{unstable} estimate(s) carry a stability warning");
    }
    log::info!(
        "Estimated scales for {} household type(s), {} test(s)",
        fit.scales.len(),
        fit.tests.len()
    );
    Ok(fit)
}
