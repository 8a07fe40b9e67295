//! Model, LASSO and bootstrap configuration.

use crate::error::{EstimationError, Result};
use barten_data::HouseholdType;
use barten_stats::{ElasticNetCv, ProjectionConfig};
use serde::{Deserialize, Serialize};

/// Settings of a single model fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Multi-person household types with their own scales, in output order
    pub household_types: Vec<HouseholdType>,
    /// Nearest-PSD projection settings
    pub projection: ProjectionConfig,
    /// Estimate the covariance of the random household-level scales
    pub random_scales: bool,
    /// Minimum households of a type in a cluster for the cluster to get its
    /// own nuisance term
    pub min_cluster_size: usize,
    /// LASSO selection of nuisance terms, `None` to keep them all
    pub lasso: Option<LassoConfig>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            household_types: HouseholdType::MULTI_PERSON.to_vec(),
            projection: ProjectionConfig::default(),
            random_scales: true,
            min_cluster_size: 2,
            lasso: None,
        }
    }
}

impl ModelConfig {
    /// Check the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.household_types.is_empty() {
            return Err(EstimationError::InvalidConfig(
                "at least one multi-person household type is required".to_string(),
            ));
        }
        if self.household_types.iter().any(|t| t.is_single()) {
            return Err(EstimationError::InvalidConfig(
                "singles are the reference group and cannot be a scaled type".to_string(),
            ));
        }
        if self.min_cluster_size < 2 {
            return Err(EstimationError::InvalidConfig(
                "min_cluster_size must be at least 2".to_string(),
            ));
        }
        if let Some(lasso) = &self.lasso {
            lasso.validate()?;
        }
        Ok(())
    }
}

/// LASSO selection of cluster-specific nuisance terms.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LassoConfig {
    /// Cross-validation settings (penalty grid, folds, solver)
    pub cv: ElasticNetCv,
    /// Multiples of the selected penalty refitted as robustness checks
    pub robustness_factors: (f64, f64),
}

impl Default for LassoConfig {
    fn default() -> Self {
        Self {
            cv: ElasticNetCv::default(),
            robustness_factors: (0.5, 2.0),
        }
    }
}

impl LassoConfig {
    /// Check the configuration.
    pub fn validate(&self) -> Result<()> {
        let (lo, hi) = self.robustness_factors;
        if !(lo > 0.0 && hi > 0.0 && lo.is_finite() && hi.is_finite()) {
            return Err(EstimationError::InvalidConfig(format!(
                "robustness factors must be positive, got ({lo}, {hi})"
            )));
        }
        if self.cv.config.l1_ratio <= 0.0 || self.cv.config.l1_ratio > 1.0 {
            return Err(EstimationError::InvalidConfig(format!(
                "l1_ratio must be in (0, 1], got {}",
                self.cv.config.l1_ratio
            )));
        }
        Ok(())
    }
}

/// How households are drawn in a bootstrap replicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ResamplingScheme {
    /// Draw within each province-year cluster, keeping cluster sizes
    #[default]
    Stratified,
    /// Draw from the whole sample
    Simple,
}

/// When the LASSO penalty and nuisance terms are chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PenaltySelection {
    /// Once on the full sample; replicates reuse the selected terms
    FullSample,
    /// Cross-validated again inside every replicate
    #[default]
    PerReplicate,
}

/// Bootstrap settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BootstrapConfig {
    /// Number of replicates
    pub replicates: usize,
    /// Seed of the resampling RNG
    pub seed: u64,
    /// Resampling scheme
    pub scheme: ResamplingScheme,
    /// When LASSO selection happens (ignored without LASSO)
    pub penalty_selection: PenaltySelection,
    /// Fraction of replicates that must succeed
    pub min_success_fraction: f64,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            replicates: 1000,
            seed: 123,
            scheme: ResamplingScheme::Stratified,
            penalty_selection: PenaltySelection::PerReplicate,
            min_success_fraction: 0.9,
        }
    }
}

impl BootstrapConfig {
    /// Check the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.replicates == 0 {
            return Err(EstimationError::InvalidConfig(
                "at least one bootstrap replicate is required".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.min_success_fraction) {
            return Err(EstimationError::InvalidConfig(format!(
                "min_success_fraction must be in [0, 1], got {}",
                self.min_success_fraction
            )));
        }
        Ok(())
    }

    /// Minimum number of successful replicates
    pub fn required_successes(&self) -> usize {
        (self.min_success_fraction * self.replicates as f64).ceil() as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(ModelConfig::default().validate().is_ok());
        assert!(LassoConfig::default().validate().is_ok());
        assert!(BootstrapConfig::default().validate().is_ok());
        assert_eq!(BootstrapConfig::default().required_successes(), 900);
    }

    #[test]
    fn test_invalid_model_config() {
        let config = ModelConfig {
            household_types: vec![HouseholdType::SingleFemale],
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ModelConfig {
            household_types: vec![],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_bootstrap_config() {
        let config = BootstrapConfig {
            replicates: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = BootstrapConfig {
            min_success_fraction: 1.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_roundtrips_through_json() {
        let config = ModelConfig {
            lasso: Some(LassoConfig::default()),
            ..Default::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: ModelConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
