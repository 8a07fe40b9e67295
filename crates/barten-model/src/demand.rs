//! Fixed-effects demand system.
//!
//! One share equation per shareable good, estimated jointly by SUR on the
//! within-cell demeaned design.

use crate::design::{Design, PriceGroup, demean_by_group};
use crate::error::{EstimationError, Result};
use barten_data::Category;
use barten_stats::{SurEquation, SurFit, fit_sur};
use ndarray::Array2;

/// Fitted demand system.
#[derive(Debug, Clone)]
pub struct DemandFit {
    /// SUR estimates, one equation per shareable good
    pub sur: SurFit,
    /// Price-expenditure groups of every equation
    pub groups: Vec<PriceGroup>,
    /// Shareable goods in equation order
    pub categories: Vec<Category>,
}

impl DemandFit {
    /// Position of the coefficient `b_{group,c}` in the stacked vector
    pub fn price_param_index(&self, eq: usize, group: PriceGroup) -> Option<usize> {
        let name = format!("er{}y_{}", self.categories.get(eq)?.code(), group);
        self.sur.param_index(eq, &name)
    }

    /// Price-expenditure coefficient `b_{group,c}`
    pub fn price_coefficient(&self, eq: usize, group: PriceGroup) -> Option<f64> {
        let name = format!("er{}y_{}", self.categories.get(eq)?.code(), group);
        self.sur.equations[eq].coefficient(&name)
    }

    /// Number of equations
    pub fn n_equations(&self) -> usize {
        self.categories.len()
    }
}

/// Estimate the demand system.
///
/// With `split_singles` the singles' coefficient is split into separate
/// coefficients for single males and single females.
///
/// # Errors
/// `SingularDesign` for a rank-deficient design, `InsufficientData` when
/// there are more regressors than households.
pub fn estimate_demand(design: &Design, split_singles: bool) -> Result<DemandFit> {
    let categories = design.categories().shareable.clone();
    let shares = design.demeaned_shares();

    let equations: Vec<SurEquation> = categories
        .iter()
        .enumerate()
        .map(|(eq, category)| {
            let (x, names) = design.equation_regressors(eq, split_singles, true);
            SurEquation::new(
                format!("w{}", category.code()),
                shares.column(eq).to_owned(),
                x,
                names,
            )
        })
        .collect();

    let sur = fit_sur(&equations)
        .map_err(|e| EstimationError::in_context(e, "demand system"))?;
    log::debug!(
        "Demand system: {} equations, {} coefficients, {:?}",
        categories.len(),
        sur.n_params(),
        sur.method
    );

    Ok(DemandFit {
        sur,
        groups: design.price_groups(split_singles),
        categories,
    })
}

/// Share residuals `w - X β` built from the raw (not demeaned) regressors,
/// then demeaned within cells (n x K).
pub fn demeaned_raw_residuals(design: &Design, fit: &DemandFit) -> Array2<f64> {
    let k = fit.n_equations();
    let n = design.n_obs();
    let mut residuals = Array2::<f64>::zeros((n, k));
    for eq in 0..k {
        let (x, _) = design.equation_regressors(eq, false, false);
        let fitted = x.dot(&fit.sur.coefficients(eq));
        let mut col = residuals.column_mut(eq);
        col.assign(&(&design.shares().column(eq) - &fitted));
    }
    demean_by_group(residuals.view(), design.cells(), design.n_cells())
}
