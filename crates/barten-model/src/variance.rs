//! Covariance of the random household-level Barten scales.
//!
//! With random scales `a_ic = a_c + u_ic` the demeaned share residuals
//! satisfy `E[e_i e_j | q] = Cov(a_i, a_j) q_i q_j + (terms in q_i + q_j)`
//! where `q_c = er_c · y · b_sc` is the singles' price-expenditure component.
//! For each household type the residual cross-products are regressed on
//! `q_i q_j` and cluster-specific nuisance terms in `q_i + q_j`, one
//! equation per pair `i <= j`, jointly by SUR. The coefficients on
//! `q_i q_j` form the covariance.
//!
//! The nuisance terms can be selected by LASSO (penalty weight 1 on the
//! cluster terms, 0 on `q_i q_j`), with refits at multiples of the selected
//! penalty as robustness checks.

use crate::config::{LassoConfig, ModelConfig};
use crate::demand::DemandFit;
use crate::design::{Design, PriceGroup, demean_by_group};
use crate::error::{EstimationError, Result};
use crate::scales::{StabilityWarning, project};
use barten_data::HouseholdType;
use barten_stats::linalg::{from_upper_triangle, triangle_pairs};
use barten_stats::{ElasticNet, ProjectionConfig, ProjectionDiagnostic, SurEquation, cov_to_cor, fit_sur};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Name of the regressor whose coefficient is the covariance
pub const PRODUCT_REGRESSOR: &str = "prod";

/// Nuisance clusters kept for one pair equation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairSelection {
    /// Goods `(i, j)`, `i <= j`
    pub pair: (usize, usize),
    /// Cross-validated penalty
    pub alpha: f64,
    /// Clusters with a nonzero coefficient at `alpha`
    pub selected: Vec<u32>,
    /// Clusters selected at the lower robustness penalty
    pub lower: Vec<u32>,
    /// Clusters selected at the upper robustness penalty
    pub upper: Vec<u32>,
}

/// LASSO selection for one household type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeSelection {
    /// Household type
    pub household_type: HouseholdType,
    /// One entry per pair, in packed upper-triangle order
    pub pairs: Vec<PairSelection>,
}

/// LASSO selection for all household types.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LassoSelection {
    /// Per-type selections
    pub types: Vec<TypeSelection>,
}

impl LassoSelection {
    /// Selection of a given type
    pub fn for_type(&self, household_type: HouseholdType) -> Option<&TypeSelection> {
        self.types.iter().find(|s| s.household_type == household_type)
    }
}

/// Standard deviations refitted at the robustness penalties.
#[derive(Debug, Clone, PartialEq)]
pub struct Robustness {
    /// At the lower multiple of the selected penalty
    pub lower_std: Array1<f64>,
    /// At the upper multiple of the selected penalty
    pub upper_std: Array1<f64>,
}

/// Covariance of the random scales of one household type.
#[derive(Debug, Clone)]
pub struct RandomScaleEstimate {
    /// Household type
    pub household_type: HouseholdType,
    /// Covariance before projection
    pub raw_cov: Array2<f64>,
    /// Projected covariance
    pub cov: Array2<f64>,
    /// Correlation matrix, `None` when a variance is zero
    pub correlation: Option<Array2<f64>>,
    /// Standard deviations of the random scales
    pub std: Array1<f64>,
    /// Projection diagnostic
    pub diagnostic: ProjectionDiagnostic,
    /// Set when the projection was large
    pub warning: Option<StabilityWarning>,
    /// LASSO robustness refits
    pub robustness: Option<Robustness>,
}

impl RandomScaleEstimate {
    /// Whether the estimate carries a stability warning
    pub fn is_unstable(&self) -> bool {
        self.warning.is_some()
    }
}

/// Second-stage regression data for one household type.
#[derive(Debug, Clone)]
pub struct SecondStage {
    household_type: HouseholdType,
    n_goods: usize,
    pairs: Vec<(usize, usize)>,
    /// Included clusters, ascending
    clusters: Vec<u32>,
    /// Included-cluster position of every row
    row_cluster: Vec<Option<usize>>,
    /// Demeaned `e_i e_j` (m x P)
    products: Array2<f64>,
    /// Demeaned `q_i q_j` (m x P)
    q_products: Array2<f64>,
    /// Demeaned `q_i + q_j` (m x P)
    q_sums: Array2<f64>,
}

impl SecondStage {
    /// Collect the second-stage variables of `household_type`.
    ///
    /// `residuals` are the within-cell demeaned raw share residuals of the
    /// whole design.
    pub fn build(
        design: &Design,
        fit: &DemandFit,
        residuals: &Array2<f64>,
        household_type: HouseholdType,
        min_cluster_size: usize,
    ) -> Result<Self> {
        let k = fit.n_equations();
        let mut b_single = Vec::with_capacity(k);
        for eq in 0..k {
            let b = fit.price_coefficient(eq, PriceGroup::Singles).ok_or_else(|| {
                EstimationError::InvalidConfig("demand fit has no pooled singles coefficient".to_string())
            })?;
            b_single.push(b);
        }

        let rows = design.rows_where(|t| t == household_type);
        let m = rows.len();
        let pairs = triangle_pairs(k);
        let n_pairs = pairs.len();
        if m <= n_pairs {
            return Err(EstimationError::InsufficientData {
                context: format!("random scales of type {household_type}"),
                required: n_pairs + 1,
                actual: m,
            });
        }

        let y = design.log_real_expenditure();
        let er = design.relative_prices();
        let mut products = Array2::<f64>::zeros((m, n_pairs));
        let mut q_products = Array2::<f64>::zeros((m, n_pairs));
        let mut q_sums = Array2::<f64>::zeros((m, n_pairs));
        for (r, &i) in rows.iter().enumerate() {
            let q: Vec<f64> = (0..k).map(|c| er[[i, c]] * y[i] * b_single[c]).collect();
            for (p, &(a, b)) in pairs.iter().enumerate() {
                products[[r, p]] = residuals[[i, a]] * residuals[[i, b]];
                q_products[[r, p]] = q[a] * q[b];
                q_sums[[r, p]] = q[a] + q[b];
            }
        }

        // Group rows by cluster
        let mut members: BTreeMap<u32, Vec<usize>> = BTreeMap::new();
        for (r, &i) in rows.iter().enumerate() {
            members.entry(design.clusters()[i]).or_default().push(r);
        }
        let mut groups = vec![0usize; m];
        for (g, rows_in) in members.values().enumerate() {
            for &r in rows_in {
                groups[r] = g;
            }
        }
        let products = demean_by_group(products.view(), &groups, members.len());
        let q_products = demean_by_group(q_products.view(), &groups, members.len());
        let q_sums = demean_by_group(q_sums.view(), &groups, members.len());

        let mut clusters = Vec::new();
        let mut row_cluster = vec![None; m];
        for (&id, rows_in) in &members {
            if rows_in.len() >= min_cluster_size {
                for &r in rows_in {
                    row_cluster[r] = Some(clusters.len());
                }
                clusters.push(id);
            }
        }
        log::debug!(
            "Second stage for {household_type}: {m} households, {} of {} clusters included",
            clusters.len(),
            members.len()
        );

        Ok(Self {
            household_type,
            n_goods: k,
            pairs,
            clusters,
            row_cluster,
            products,
            q_products,
            q_sums,
        })
    }

    /// Household type
    pub fn household_type(&self) -> HouseholdType {
        self.household_type
    }

    /// Included clusters
    pub fn clusters(&self) -> &[u32] {
        &self.clusters
    }

    /// Number of households
    pub fn n_obs(&self) -> usize {
        self.products.nrows()
    }

    /// Dependent variable and regressors of pair `p` with the given nuisance
    /// clusters; the product regressor is the last column.
    fn pair_design(&self, p: usize, keep: &[usize]) -> (Array1<f64>, Array2<f64>, Vec<String>) {
        let m = self.n_obs();
        let mut x = Array2::<f64>::zeros((m, keep.len() + 1));
        for (r, cluster) in self.row_cluster.iter().enumerate() {
            if let Some(g) = cluster
                && let Some(col) = keep.iter().position(|k| k == g)
            {
                x[[r, col]] = self.q_sums[[r, p]];
            }
            x[[r, keep.len()]] = self.q_products[[r, p]];
        }
        let mut names: Vec<String> = keep.iter().map(|&g| format!("g{}", self.clusters[g])).collect();
        names.push(PRODUCT_REGRESSOR.to_string());
        (self.products.column(p).to_owned(), x, names)
    }

    /// Positions of the given cluster ids among the included clusters;
    /// clusters absent from this sample are skipped.
    fn positions(&self, ids: &[u32]) -> Vec<usize> {
        ids.iter()
            .filter_map(|id| self.clusters.iter().position(|c| c == id))
            .collect()
    }

    /// Raw covariance from a SUR with the given nuisance clusters per pair
    /// (`None` keeps every included cluster).
    pub fn raw_covariance(&self, selected: Option<&[&[u32]]>) -> Result<Array2<f64>> {
        let all: Vec<usize> = (0..self.clusters.len()).collect();
        let equations: Vec<SurEquation> = (0..self.pairs.len())
            .map(|p| {
                let keep = selected.map_or_else(|| all.clone(), |s| self.positions(s[p]));
                let (y, x, names) = self.pair_design(p, &keep);
                let (a, b) = self.pairs[p];
                SurEquation::new(format!("e{a}e{b}"), y, x, names)
            })
            .collect();

        let context = format!("random scales of type {}", self.household_type);
        let sur = fit_sur(&equations).map_err(|e| EstimationError::in_context(e, context.as_str()))?;
        let mut packed = Vec::with_capacity(self.pairs.len());
        for eq in &sur.equations {
            let cov = eq.coefficient(PRODUCT_REGRESSOR).ok_or_else(|| {
                EstimationError::InvalidConfig("product regressor missing from pair equation".to_string())
            })?;
            packed.push(cov);
        }
        from_upper_triangle(&packed, self.n_goods).map_err(EstimationError::from)
    }

    /// Cross-validated LASSO selection of the nuisance clusters.
    pub fn select(&self, lasso: &LassoConfig) -> Result<TypeSelection> {
        let all: Vec<usize> = (0..self.clusters.len()).collect();
        let mut weights = vec![1.0; all.len()];
        weights.push(0.0);
        let (lo, hi) = lasso.robustness_factors;
        let context = format!("LASSO selection for type {}", self.household_type);

        let mut pairs = Vec::with_capacity(self.pairs.len());
        for (p, &pair) in self.pairs.iter().enumerate() {
            let (y, x, _) = self.pair_design(p, &all);
            let cv = lasso
                .cv
                .fit(&x, &y, &weights)
                .map_err(|e| EstimationError::in_context(e, context.as_str()))?;
            let at = |alpha: f64| -> Result<Vec<u32>> {
                let fit = ElasticNet::new(alpha)
                    .with_config(lasso.cv.config)
                    .fit(&x, &y, &weights)
                    .map_err(|e| EstimationError::in_context(e, context.as_str()))?;
                Ok(self.selected_clusters(&fit.selected()))
            };
            pairs.push(PairSelection {
                pair,
                alpha: cv.best_alpha,
                selected: self.selected_clusters(&cv.fit.selected()),
                lower: at(lo * cv.best_alpha)?,
                upper: at(hi * cv.best_alpha)?,
            });
        }
        log::debug!(
            "LASSO kept {} of {} nuisance terms for {}",
            pairs.iter().map(|p| p.selected.len()).sum::<usize>(),
            self.pairs.len() * self.clusters.len(),
            self.household_type
        );

        Ok(TypeSelection {
            household_type: self.household_type,
            pairs,
        })
    }

    fn selected_clusters(&self, columns: &[usize]) -> Vec<u32> {
        columns
            .iter()
            .filter(|&&c| c < self.clusters.len())
            .map(|&c| self.clusters[c])
            .collect()
    }
}

/// Raw covariance to projected estimate.
fn finish(
    household_type: HouseholdType,
    raw_cov: Array2<f64>,
    projection: &ProjectionConfig,
) -> Result<RandomScaleEstimate> {
    let context = format!("random scales of type {household_type}");
    let (projected, warning) = project(&raw_cov, projection, &context)?;
    let cov = projected.matrix;
    let correlation = match cov_to_cor(&cov) {
        Ok(cor) => Some(cor),
        Err(e) => {
            log::debug!("{context}: no correlation matrix ({e})");
            None
        }
    };
    let std = cov.diag().mapv(|v| v.max(0.0).sqrt());

    Ok(RandomScaleEstimate {
        household_type,
        raw_cov,
        cov,
        correlation,
        std,
        diagnostic: projected.diagnostic,
        warning,
        robustness: None,
    })
}

fn projected_std(raw: &Array2<f64>, projection: &ProjectionConfig) -> Result<Array1<f64>> {
    let projected = barten_stats::nearest_psd(raw, projection).map_err(EstimationError::Projection)?;
    Ok(projected.matrix.diag().mapv(|v| v.max(0.0).sqrt()))
}

/// Random-scale covariances for every configured type.
///
/// Without LASSO all nuisance terms are used. With LASSO, `selection`
/// (chosen earlier on the full sample) is reused when given, otherwise the
/// penalty is cross-validated here; the selection actually used is
/// returned.
///
/// # Errors
/// `InsufficientData` when a type has too few households, `SingularDesign`
/// for a rank-deficient second stage, `Projection` when the projector fails.
pub fn estimate_random_scales(
    design: &Design,
    fit: &DemandFit,
    config: &ModelConfig,
    selection: Option<&LassoSelection>,
) -> Result<(Vec<RandomScaleEstimate>, Option<LassoSelection>)> {
    let residuals = crate::demand::demeaned_raw_residuals(design, fit);
    let mut estimates = Vec::with_capacity(config.household_types.len());
    let mut used = LassoSelection::default();

    for &t in &config.household_types {
        let stage = SecondStage::build(design, fit, &residuals, t, config.min_cluster_size)?;

        let Some(lasso) = &config.lasso else {
            let raw = stage.raw_covariance(None)?;
            estimates.push(finish(t, raw, &config.projection)?);
            continue;
        };

        let chosen = match selection.and_then(|s| s.for_type(t)) {
            Some(existing) => existing.clone(),
            None => stage.select(lasso)?,
        };
        let selected: Vec<&[u32]> = chosen.pairs.iter().map(|p| p.selected.as_slice()).collect();
        let lower: Vec<&[u32]> = chosen.pairs.iter().map(|p| p.lower.as_slice()).collect();
        let upper: Vec<&[u32]> = chosen.pairs.iter().map(|p| p.upper.as_slice()).collect();

        let raw = stage.raw_covariance(Some(selected.as_slice()))?;
        let lower = stage.raw_covariance(Some(lower.as_slice()))?;
        let upper = stage.raw_covariance(Some(upper.as_slice()))?;

        let mut estimate = finish(t, raw, &config.projection)?;
        estimate.robustness = Some(Robustness {
            lower_std: projected_std(&lower, &config.projection)?,
            upper_std: projected_std(&upper, &config.projection)?,
        });
        estimates.push(estimate);
        used.types.push(chosen);
    }

    let used = config.lasso.is_some().then_some(used);
    Ok((estimates, used))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use barten_stats::{ElasticNetCv, RepeatedKFold};
    use ndarray::{Axis, array};

    /// Two goods, two clusters of three households, regressors identical
    /// across pairs so the SUR reduces to OLS
    fn exact_stage(cov: [f64; 3], effects: [f64; 2]) -> SecondStage {
        let q_sum = [1.0, 0.0, -1.0, 2.0, -1.0, -1.0];
        let q_prod = [1.0, -2.0, 1.0, 1.0, 1.0, -2.0];
        let row_cluster = vec![Some(0), Some(0), Some(0), Some(1), Some(1), Some(1)];
        let mut products = Array2::<f64>::zeros((6, 3));
        let mut q_products = Array2::<f64>::zeros((6, 3));
        let mut q_sums = Array2::<f64>::zeros((6, 3));
        for r in 0..6 {
            let g = r / 3;
            for p in 0..3 {
                q_products[[r, p]] = q_prod[r];
                q_sums[[r, p]] = q_sum[r];
                products[[r, p]] = cov[p] * q_prod[r] + effects[g] * q_sum[r];
            }
        }
        SecondStage {
            household_type: HouseholdType::TwoPerson,
            n_goods: 2,
            pairs: triangle_pairs(2),
            clusters: vec![4, 9],
            row_cluster,
            products,
            q_products,
            q_sums,
        }
    }

    #[test]
    fn test_pair_design_columns() {
        let stage = exact_stage([0.04, 0.01, 0.09], [0.5, -0.3]);
        let (y, x, names) = stage.pair_design(1, &[1]);
        assert_eq!(names, vec!["g9", "prod"]);
        assert_eq!(x.column(0).to_vec(), vec![0.0, 0.0, 0.0, 2.0, -1.0, -1.0]);
        assert_eq!(x.column(1).to_vec(), vec![1.0, -2.0, 1.0, 1.0, 1.0, -2.0]);
        assert_abs_diff_eq!(y[0], 0.01 + 0.5, epsilon = 1e-12);
        assert_eq!(stage.q_sums.sum_axis(Axis(0)), array![0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_raw_covariance_recovers_coefficients() {
        let stage = exact_stage([0.04, 0.01, 0.09], [0.5, -0.3]);
        let raw = stage.raw_covariance(None).unwrap();
        assert_abs_diff_eq!(raw[[0, 0]], 0.04, epsilon = 1e-10);
        assert_abs_diff_eq!(raw[[0, 1]], 0.01, epsilon = 1e-10);
        assert_abs_diff_eq!(raw[[1, 0]], 0.01, epsilon = 1e-10);
        assert_abs_diff_eq!(raw[[1, 1]], 0.09, epsilon = 1e-10);

        let estimate = finish(HouseholdType::TwoPerson, raw, &ProjectionConfig::default()).unwrap();
        assert!(!estimate.is_unstable());
        assert_abs_diff_eq!(estimate.std[0], 0.2, epsilon = 1e-8);
        assert_abs_diff_eq!(estimate.std[1], 0.3, epsilon = 1e-8);
        let cor = estimate.correlation.unwrap();
        assert_abs_diff_eq!(cor[[0, 1]], 0.01 / 0.06, epsilon = 1e-8);
    }

    #[test]
    fn test_selection_filters_missing_clusters() {
        let stage = exact_stage([0.04, 0.01, 0.09], [0.0, 0.0]);
        assert_eq!(stage.positions(&[9, 12, 4]), vec![1, 0]);

        // Dropping every nuisance term still identifies the product term
        let none: Vec<&[u32]> = vec![&[], &[], &[]];
        let raw = stage.raw_covariance(Some(none.as_slice())).unwrap();
        assert_abs_diff_eq!(raw[[1, 1]], 0.09, epsilon = 1e-10);
    }

    #[test]
    fn test_negative_variance_is_projected() {
        let stage = exact_stage([0.04, 0.05, -0.01], [0.0, 0.0]);
        let raw = stage.raw_covariance(None).unwrap();
        let estimate = finish(HouseholdType::TwoPerson, raw, &ProjectionConfig::default()).unwrap();
        assert!(estimate.diagnostic.min_eigenvalue < 0.0);
        assert!(estimate.diagnostic.clipped_eigenvalues > 0);
        assert!(estimate.std.iter().all(|s| s.is_finite()));
    }

    #[test]
    fn test_lasso_keeps_strong_cluster_effect() {
        // Forty households in two clusters; only cluster 4 has a nuisance effect
        let m = 40;
        let mut products = Array2::<f64>::zeros((m, 1));
        let mut q_products = Array2::<f64>::zeros((m, 1));
        let mut q_sums = Array2::<f64>::zeros((m, 1));
        let mut row_cluster = Vec::with_capacity(m);
        for r in 0..m {
            let g = r % 2;
            let t = r as f64;
            let s = (1.3 * t).sin();
            let q = (0.7 * t + 0.4).cos();
            q_sums[[r, 0]] = s;
            q_products[[r, 0]] = q;
            let effect = if g == 0 { 2.0 } else { 0.0 };
            products[[r, 0]] = 0.05 * q + effect * s + 0.01 * (3.1 * t).sin();
            row_cluster.push(Some(g));
        }
        let mut groups = vec![0; m];
        for (r, g) in groups.iter_mut().enumerate() {
            *g = r % 2;
        }
        let stage = SecondStage {
            household_type: HouseholdType::TwoPerson,
            n_goods: 1,
            pairs: triangle_pairs(1),
            clusters: vec![4, 9],
            row_cluster,
            products: demean_by_group(products.view(), &groups, 2),
            q_products: demean_by_group(q_products.view(), &groups, 2),
            q_sums: demean_by_group(q_sums.view(), &groups, 2),
        };

        let lasso = LassoConfig {
            cv: ElasticNetCv {
                n_alphas: 30,
                folds: RepeatedKFold {
                    n_splits: 5,
                    n_repeats: 2,
                    seed: 123,
                },
                ..Default::default()
            },
            ..Default::default()
        };
        let selection = stage.select(&lasso).unwrap();
        let pair = &selection.pairs[0];
        assert_eq!(pair.pair, (0, 0));
        assert!(pair.alpha > 0.0);
        assert!(pair.selected.contains(&4));
        assert!(pair.lower.contains(&4));
        assert!(pair.upper.contains(&4));

        // Same inputs give the same selection
        assert_eq!(stage.select(&lasso).unwrap(), selection);
    }
}
