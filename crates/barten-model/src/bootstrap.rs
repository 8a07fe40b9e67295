//! Bootstrap standard errors.
//!
//! Every replicate refits the model on households drawn with replacement.
//! The standard error of a statistic is its sample standard deviation across
//! the successful replicates. Index draws for all replicates come from one
//! seeded RNG before any fitting starts, so results do not depend on the
//! number of threads.

use crate::config::{BootstrapConfig, ModelConfig, PenaltySelection, ResamplingScheme};
use crate::error::{EstimationError, Result};
use crate::index::ReferenceGroup;
use crate::pipeline::{ModelFit, fit_model};
use crate::variance::LassoSelection;
use barten_data::{HouseholdTable, HouseholdType};
use barten_stats::bootstrap_standard_errors;
use barten_stats::linalg::{triangle_len, upper_triangle};
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Draw one resample of table indices.
pub fn draw_indices<R: Rng>(table: &HouseholdTable, scheme: ResamplingScheme, rng: &mut R) -> Vec<usize> {
    let n = table.len();
    match scheme {
        ResamplingScheme::Simple => (0..n).map(|_| rng.gen_range(0..n)).collect(),
        ResamplingScheme::Stratified => {
            let mut out = Vec::with_capacity(n);
            for members in table.clusters().values() {
                for _ in 0..members.len() {
                    out.push(members[rng.gen_range(0..members.len())]);
                }
            }
            out
        }
    }
}

/// A replicate that could not be fitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicateFailure {
    /// Replicate number, from zero
    pub replicate: usize,
    /// Error message
    pub reason: String,
}

/// Standard errors of the estimates of one household type.
///
/// Matrices are packed upper triangles. A `None` standard error means fewer
/// than two replicates produced the statistic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeStandardErrors {
    /// Household type
    pub household_type: HouseholdType,
    /// Scales
    pub scales: Vec<Option<f64>>,
    /// Projected delta-method covariance
    pub scale_cov: Vec<Option<f64>>,
    /// Random-scale covariance before projection
    pub random_raw_cov: Vec<Option<f64>>,
    /// Projected random-scale covariance
    pub random_cov: Vec<Option<f64>>,
    /// Random-scale correlation
    pub random_correlation: Vec<Option<f64>>,
    /// Random-scale standard deviations
    pub random_std: Vec<Option<f64>>,
    /// Random-scale standard deviations at the lower robustness penalty
    pub random_std_lower: Vec<Option<f64>>,
    /// Random-scale standard deviations at the upper robustness penalty
    pub random_std_upper: Vec<Option<f64>>,
    /// Successful replicates whose scale covariance needed a large projection
    pub unstable_scale_replicates: usize,
    /// Successful replicates whose random-scale covariance needed a large
    /// projection
    pub unstable_random_replicates: usize,
}

/// Standard errors of the index for one reference group and type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexStandardErrors {
    /// Reference group
    pub reference: ReferenceGroup,
    /// Household type
    pub household_type: HouseholdType,
    /// Index mean
    pub mean: Option<f64>,
    /// Standard deviation of the index across reference households
    pub std: Option<f64>,
    /// Heterogeneity standard deviation
    pub heterogeneity_std: Option<f64>,
}

/// Outcome of a bootstrap run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BootstrapResult {
    /// Settings used
    pub config: BootstrapConfig,
    /// Replicates attempted
    pub attempted: usize,
    /// Replicates that succeeded
    pub succeeded: usize,
    /// Failed replicates
    pub failures: Vec<ReplicateFailure>,
    /// Per-type standard errors
    pub types: Vec<TypeStandardErrors>,
    /// Index standard errors
    pub index: Vec<IndexStandardErrors>,
}

impl BootstrapResult {
    /// Standard errors of a household type
    pub fn for_type(&self, household_type: HouseholdType) -> Option<&TypeStandardErrors> {
        self.types.iter().find(|t| t.household_type == household_type)
    }

    /// Index standard errors of a reference group and type
    pub fn for_index(
        &self,
        reference: ReferenceGroup,
        household_type: HouseholdType,
    ) -> Option<&IndexStandardErrors> {
        self.index
            .iter()
            .find(|i| i.reference == reference && i.household_type == household_type)
    }
}

/// Index mean, std and heterogeneity std per reference group and type.
const INDEX_STATS: usize = 3;

/// Position of every statistic in a replicate vector.
#[derive(Debug, Clone, Copy)]
struct Layout {
    k: usize,
    n_types: usize,
}

impl Layout {
    /// Entries per type: scales, four packed matrices, three std vectors
    fn per_type(self) -> usize {
        4 * self.k + 4 * triangle_len(self.k)
    }

    fn len(self) -> usize {
        self.index_offset() + INDEX_STATS * ReferenceGroup::ALL.len() * self.n_types
    }

    fn index_offset(self) -> usize {
        self.n_types * self.per_type()
    }
}

/// Statistics of one successful replicate.
struct ReplicateStats {
    values: Array1<f64>,
    unstable_scales: Vec<bool>,
    unstable_random: Vec<bool>,
}

fn push_matrix(out: &mut Vec<f64>, m: Option<&Array2<f64>>, k: usize) {
    match m {
        Some(m) => out.extend(upper_triangle(m)),
        None => out.extend(std::iter::repeat_n(f64::NAN, triangle_len(k))),
    }
}

fn push_vector(out: &mut Vec<f64>, v: Option<&Array1<f64>>, k: usize) {
    match v {
        Some(v) => out.extend(v.iter().copied()),
        None => out.extend(std::iter::repeat_n(f64::NAN, k)),
    }
}

fn collect_stats(fit: &ModelFit, types: &[HouseholdType], layout: Layout) -> ReplicateStats {
    let k = layout.k;
    let mut values = Vec::with_capacity(layout.len());
    let mut unstable_scales = Vec::with_capacity(types.len());
    let mut unstable_random = Vec::with_capacity(types.len());

    for &t in types {
        let scale = fit.scale(t);
        let random = fit.random_scale(t);
        let robustness = random.and_then(|r| r.robustness.as_ref());

        push_vector(&mut values, scale.map(|s| &s.scales), k);
        push_matrix(&mut values, scale.map(|s| &s.cov), k);
        push_matrix(&mut values, random.map(|r| &r.raw_cov), k);
        push_matrix(&mut values, random.map(|r| &r.cov), k);
        push_matrix(&mut values, random.and_then(|r| r.correlation.as_ref()), k);
        push_vector(&mut values, random.map(|r| &r.std), k);
        push_vector(&mut values, robustness.map(|r| &r.lower_std), k);
        push_vector(&mut values, robustness.map(|r| &r.upper_std), k);

        unstable_scales.push(scale.is_some_and(|s| s.is_unstable()));
        unstable_random.push(random.is_some_and(|r| r.is_unstable()));
    }

    for reference in ReferenceGroup::ALL {
        for &t in types {
            let summary = fit.index_summary(reference, t);
            values.push(summary.map_or(f64::NAN, |s| s.mean));
            values.push(summary.and_then(|s| s.std).unwrap_or(f64::NAN));
            values.push(
                summary
                    .and_then(|s| s.heterogeneity_std)
                    .unwrap_or(f64::NAN),
            );
        }
    }

    ReplicateStats {
        values: Array1::from(values),
        unstable_scales,
        unstable_random,
    }
}

/// Run the bootstrap.
///
/// With LASSO and [`PenaltySelection::FullSample`], `selection` is the
/// full-sample selection reused by every replicate; it is computed here
/// when not supplied. `progress` is called once per finished replicate.
///
/// # Errors
/// `InvalidConfig` for bad settings, `InsufficientReplicates` when fewer
/// replicates succeed than required, or the full-sample error when the
/// full-sample selection cannot be computed.
pub fn run_bootstrap(
    table: &HouseholdTable,
    model: &ModelConfig,
    config: &BootstrapConfig,
    selection: Option<&LassoSelection>,
    progress: Option<&(dyn Fn() + Sync)>,
) -> Result<BootstrapResult> {
    model.validate()?;
    config.validate()?;

    let full_selection = match (&model.lasso, config.penalty_selection) {
        (Some(_), PenaltySelection::FullSample) => match selection {
            Some(s) => Some(s.clone()),
            None => {
                log::info!("Selecting nuisance terms on the full sample");
                let all: Vec<usize> = (0..table.len()).collect();
                fit_model(table, &all, model, None)?.lasso
            }
        },
        _ => None,
    };

    let mut rng = StdRng::seed_from_u64(config.seed);
    let draws: Vec<Vec<usize>> = (0..config.replicates)
        .map(|_| draw_indices(table, config.scheme, &mut rng))
        .collect();

    log::info!(
        "Running {} bootstrap replicates ({:?} resampling)",
        config.replicates,
        config.scheme
    );

    let types = &model.household_types;
    let layout = Layout {
        k: table.categories().n_shareable(),
        n_types: types.len(),
    };

    let outcomes: Vec<std::result::Result<ReplicateStats, String>> = draws
        .par_iter()
        .enumerate()
        .map(|(b, indices)| {
            let outcome = fit_model(table, indices, model, full_selection.as_ref())
                .map(|fit| collect_stats(&fit, types, layout))
                .map_err(|e| {
                    log::warn!("Bootstrap replicate {b} failed: {e}");
                    e.to_string()
                });
            if let Some(tick) = progress {
                tick();
            }
            outcome
        })
        .collect();

    let mut stats = Vec::with_capacity(outcomes.len());
    let mut failures = Vec::new();
    for (replicate, outcome) in outcomes.into_iter().enumerate() {
        match outcome {
            Ok(s) => stats.push(s),
            Err(reason) => failures.push(ReplicateFailure { replicate, reason }),
        }
    }

    let succeeded = stats.len();
    let required = config.required_successes();
    if succeeded < required {
        return Err(EstimationError::InsufficientReplicates {
            succeeded,
            attempted: config.replicates,
            required,
        });
    }
    if succeeded < 2 {
        log::warn!("Fewer than two successful replicates, standard errors are undefined");
    }

    let vectors: Vec<Array1<f64>> = stats.iter().map(|s| s.values.clone()).collect();
    let errors = if vectors.is_empty() {
        vec![None; layout.len()]
    } else {
        bootstrap_standard_errors(&vectors)?
    };

    let k = layout.k;
    let p = triangle_len(k);
    let mut result_types = Vec::with_capacity(types.len());
    for (ti, &t) in types.iter().enumerate() {
        let mut at = ti * layout.per_type();
        let mut take = |len: usize| {
            let slice = errors[at..at + len].to_vec();
            at += len;
            slice
        };
        result_types.push(TypeStandardErrors {
            household_type: t,
            scales: take(k),
            scale_cov: take(p),
            random_raw_cov: take(p),
            random_cov: take(p),
            random_correlation: take(p),
            random_std: take(k),
            random_std_lower: take(k),
            random_std_upper: take(k),
            unstable_scale_replicates: stats.iter().filter(|s| s.unstable_scales[ti]).count(),
            unstable_random_replicates: stats.iter().filter(|s| s.unstable_random[ti]).count(),
        });
    }

    let mut index = Vec::new();
    let mut at = layout.index_offset();
    for reference in ReferenceGroup::ALL {
        for &t in types {
            index.push(IndexStandardErrors {
                reference,
                household_type: t,
                mean: errors[at],
                std: errors[at + 1],
                heterogeneity_std: errors[at + 2],
            });
            at += INDEX_STATS;
        }
    }

    log::info!(
        "Bootstrap finished: {succeeded} of {} replicates succeeded",
        config.replicates
    );

    Ok(BootstrapResult {
        config: *config,
        attempted: config.replicates,
        succeeded,
        failures,
        types: result_types,
        index,
    })
}
