//! Barten scale recovery.
//!
//! The scale of good `c` for household type `T` is the ratio of the
//! price-expenditure coefficients, `a_Tc = b_Tc / b_sc`. Its sampling
//! covariance follows from the delta method and is projected onto the PSD
//! cone before use.

use crate::demand::DemandFit;
use crate::design::PriceGroup;
use crate::error::{EstimationError, Result};
use barten_data::HouseholdType;
use barten_stats::{Projection, ProjectionConfig, ProjectionDiagnostic, nearest_psd};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Non-fatal condition attached to an estimate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum StabilityWarning {
    /// The nearest-PSD projection moved the covariance by more than the
    /// configured share of its norm
    ProjectionInstability {
        /// `||projected - raw||_F / ||raw||_F`
        relative_adjustment: f64,
        /// Configured threshold
        threshold: f64,
    },
}

impl fmt::Display for StabilityWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProjectionInstability {
                relative_adjustment,
                threshold,
            } => write!(
                f,
                "projection adjusted the covariance by {:.1}% (threshold {:.1}%)",
                100.0 * relative_adjustment,
                100.0 * threshold
            ),
        }
    }
}

/// Project a raw covariance and derive its stability warning.
pub(crate) fn project(
    raw: &Array2<f64>,
    config: &ProjectionConfig,
    context: &str,
) -> Result<(Projection, Option<StabilityWarning>)> {
    let projection = nearest_psd(raw, config).map_err(EstimationError::Projection)?;
    let warning = projection.diagnostic.unstable.then(|| {
        log::warn!(
            "{context}: projection adjusted the covariance by {:.2e} relative to its norm",
            projection.diagnostic.relative_adjustment
        );
        StabilityWarning::ProjectionInstability {
            relative_adjustment: projection.diagnostic.relative_adjustment,
            threshold: config.instability_threshold,
        }
    });
    Ok((projection, warning))
}

/// Scales of one household type with their sampling covariance.
#[derive(Debug, Clone)]
pub struct ScaleEstimate {
    /// Household type
    pub household_type: HouseholdType,
    /// Scales of the shareable goods
    pub scales: Array1<f64>,
    /// Delta-method covariance before projection
    pub raw_cov: Array2<f64>,
    /// Projected covariance
    pub cov: Array2<f64>,
    /// Projection diagnostic
    pub diagnostic: ProjectionDiagnostic,
    /// Set when the projection was large
    pub warning: Option<StabilityWarning>,
}

impl ScaleEstimate {
    /// Standard errors from the projected covariance
    pub fn standard_errors(&self) -> Array1<f64> {
        self.cov.diag().mapv(|v| v.max(0.0).sqrt())
    }

    /// Scales of all goods, the nonshareable good (scale 1) last
    pub fn full_scales(&self) -> Array1<f64> {
        let mut full = self.scales.to_vec();
        full.push(1.0);
        Array1::from(full)
    }

    /// Whether the estimate carries a stability warning
    pub fn is_unstable(&self) -> bool {
        self.warning.is_some()
    }
}

/// Scales and delta-method covariance for each household type.
///
/// # Errors
/// `SingularDesign` when a singles coefficient is zero, `Projection` when
/// the projector fails.
pub fn recover_scales(
    fit: &DemandFit,
    types: &[HouseholdType],
    projection: &ProjectionConfig,
) -> Result<Vec<ScaleEstimate>> {
    types
        .iter()
        .map(|&t| recover_type(fit, t, projection))
        .collect()
}

fn recover_type(
    fit: &DemandFit,
    household_type: HouseholdType,
    projection: &ProjectionConfig,
) -> Result<ScaleEstimate> {
    let (scales, raw_cov) = delta_method(fit, household_type)?;
    let context = format!("scales of type {household_type}");
    let (projected, warning) = project(&raw_cov, projection, &context)?;

    Ok(ScaleEstimate {
        household_type,
        scales,
        raw_cov,
        cov: projected.matrix,
        diagnostic: projected.diagnostic,
        warning,
    })
}

/// Point estimates and raw delta-method covariance of `a_T`.
pub(crate) fn delta_method(
    fit: &DemandFit,
    household_type: HouseholdType,
) -> Result<(Array1<f64>, Array2<f64>)> {
    let k = fit.n_equations();
    let group = PriceGroup::Multi(household_type);
    let missing = || EstimationError::InvalidConfig(format!(
        "household type {household_type} is not in the demand system"
    ));

    let mut indices = Vec::with_capacity(2 * k);
    let mut b_single = Vec::with_capacity(k);
    let mut b_type = Vec::with_capacity(k);
    for eq in 0..k {
        let is = fit.price_param_index(eq, PriceGroup::Singles).ok_or_else(missing)?;
        let it = fit.price_param_index(eq, group).ok_or_else(missing)?;
        indices.push(is);
        indices.push(it);
        b_single.push(fit.price_coefficient(eq, PriceGroup::Singles).ok_or_else(missing)?);
        b_type.push(fit.price_coefficient(eq, group).ok_or_else(missing)?);
    }

    if let Some(eq) = b_single.iter().position(|b| *b == 0.0 || !b.is_finite()) {
        return Err(EstimationError::SingularDesign {
            context: format!(
                "singles coefficient of {} is zero, scale is not identified",
                fit.categories[eq]
            ),
        });
    }

    let scales: Array1<f64> = b_type.iter().zip(&b_single).map(|(t, s)| t / s).collect();

    // Jacobian over (b_s1, b_T1, b_s2, b_T2, ...)
    let mut jacobian = Array2::<f64>::zeros((k, 2 * k));
    for c in 0..k {
        jacobian[[c, 2 * c]] = -b_type[c] / (b_single[c] * b_single[c]);
        jacobian[[c, 2 * c + 1]] = 1.0 / b_single[c];
    }
    let v = fit.sur.covariance_block(&indices);
    let raw_cov = jacobian.dot(&v).dot(&jacobian.t());

    Ok((scales, raw_cov))
}
