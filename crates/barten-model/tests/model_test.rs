//! End-to-end tests of estimation and bootstrap on synthetic households

use approx::assert_abs_diff_eq;
use barten_data::{CategorySet, HouseholdRecord, HouseholdTable, HouseholdType};
use barten_model::{
    BootstrapConfig, EstimationError, LassoConfig, ModelConfig, PenaltySelection, ReferenceGroup,
    TestKind, estimate, run_bootstrap,
};
use barten_stats::{ElasticNetCv, RepeatedKFold, is_positive_semidefinite, sample_std};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicUsize, Ordering};

const SLOPES: [f64; 5] = [0.010, 0.012, 0.014, 0.016, 0.018];

fn household(
    household_type: HouseholdType,
    cluster: u32,
    y: f64,
    shares: Vec<f64>,
    demographics: Vec<f64>,
) -> HouseholdRecord {
    let x = y.exp();
    let mut shares = shares;
    shares.push(1.0 - shares.iter().sum::<f64>());
    HouseholdRecord {
        id: 0,
        expenditure: shares.iter().map(|s| s * x).collect(),
        log_price: vec![0.0; 6],
        demographics,
        household_type,
        cluster,
    }
}

/// Three single males and three couples with identical slopes, so every
/// scale is exactly one
fn six_households(demographics: &[(f64, f64)]) -> HouseholdTable {
    let rows = [
        (HouseholdType::SingleMale, 1.0, 2.0),
        (HouseholdType::SingleMale, 2.0, -3.0),
        (HouseholdType::SingleMale, 4.0, 1.0),
        (HouseholdType::TwoPerson, 1.5, 1.0),
        (HouseholdType::TwoPerson, 2.5, -3.0),
        (HouseholdType::TwoPerson, 3.0, 2.0),
    ];
    let names: Vec<String> = if demographics.is_empty() {
        vec![]
    } else {
        vec!["z1".to_string(), "z2".to_string()]
    };
    let records = rows
        .iter()
        .enumerate()
        .map(|(r, &(t, y, noise))| {
            let shares = SLOPES
                .iter()
                .enumerate()
                .map(|(k, b)| 0.1 + b * y + 1e-3 * (k as f64 + 1.0) * noise)
                .collect();
            let demo = demographics.get(r).map(|&(a, b)| vec![a, b]).unwrap_or_default();
            household(t, 1, y, shares, demo)
        })
        .collect();
    HouseholdTable::new(CategorySet::default(), names, records).unwrap()
}

fn couples_only() -> ModelConfig {
    ModelConfig {
        household_types: vec![HouseholdType::TwoPerson],
        random_scales: false,
        ..Default::default()
    }
}

/// Singles of both sexes and couples in several clusters. Couples' slopes
/// carry household-level noise, i.e. random scales around `scale`.
fn synthetic_table(seed: u64, clusters: u32, per_type: usize, scale: f64) -> HouseholdTable {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut records = Vec::new();
    for cluster in 1..=clusters {
        for t in [HouseholdType::SingleMale, HouseholdType::SingleFemale, HouseholdType::TwoPerson] {
            for _ in 0..per_type {
                let y: f64 = rng.gen_range(1.0..3.0);
                let shares = SLOPES
                    .iter()
                    .map(|b| {
                        let slope = if t.is_single() {
                            *b
                        } else {
                            b * scale * (1.0 + rng.gen_range(-0.3..0.3))
                        };
                        0.08 + 0.002 * cluster as f64 + slope * y + rng.gen_range(-0.01..0.01)
                    })
                    .collect();
                let z1 = rng.gen_range(0.0..1.0);
                records.push(household(t, cluster, y, shares, vec![z1]));
            }
        }
    }
    HouseholdTable::new(CategorySet::default(), vec!["z1".to_string()], records).unwrap()
}

#[test]
fn test_unit_scales_are_recovered() {
    let table = six_households(&[]);
    let fit = estimate(&table, &couples_only()).unwrap();

    let scales = fit.scale(HouseholdType::TwoPerson).unwrap();
    for a in &scales.scales {
        assert_abs_diff_eq!(*a, 1.0, epsilon = 1e-6);
    }

    let shareability: Vec<_> = fit
        .tests
        .iter()
        .filter(|t| t.kind == TestKind::Shareability)
        .collect();
    assert_eq!(shareability.len(), 5);
    for test in shareability {
        let wald = test.wald().unwrap();
        assert_eq!(wald.df, 1);
        assert!(!wald.rejects(0.05), "{} rejected", test.name);
    }

    // No single females: pooling test is reported, not dropped
    let pooling = fit
        .tests
        .iter()
        .find(|t| t.kind == TestKind::SinglesPooling)
        .unwrap();
    assert!(pooling.wald().is_none());
}

#[test]
fn test_collinear_demographics_are_singular() {
    let demographics: Vec<(f64, f64)> = [0.5, 1.5, 1.0, 0.2, 0.9, 0.4]
        .iter()
        .map(|&v| (2.0 * v, v))
        .collect();
    let table = six_households(&demographics);
    let err = estimate(&table, &couples_only()).unwrap_err();
    assert!(matches!(err, EstimationError::SingularDesign { .. }), "{err}");
}

#[test]
fn test_index_direct_mean() {
    let table = synthetic_table(1, 3, 20, 1.4);
    let fit = estimate(&table, &couples_only()).unwrap();

    assert_eq!(fit.index.len(), 3);
    for summary in &fit.index {
        assert_abs_diff_eq!(summary.mean, summary.direct_mean, epsilon = 1e-12);
        let average = summary.values.iter().sum::<f64>() / summary.values.len() as f64;
        assert_abs_diff_eq!(summary.mean, average, epsilon = 1e-12);
    }
    let singles = fit
        .index_summary(ReferenceGroup::Singles, HouseholdType::TwoPerson)
        .unwrap();
    assert_eq!(singles.values.len(), 120);
    assert_eq!(singles.heterogeneity_std, None);
}

#[test]
fn test_random_scales() {
    let table = synthetic_table(2, 4, 40, 1.3);
    let config = ModelConfig {
        household_types: vec![HouseholdType::TwoPerson],
        ..Default::default()
    };
    let fit = estimate(&table, &config).unwrap();

    let random = fit.random_scale(HouseholdType::TwoPerson).unwrap();
    assert_eq!(random.cov.dim(), (5, 5));
    assert!(is_positive_semidefinite(&random.cov, 1e-10));
    assert!(random.std.iter().all(|s| s.is_finite() && *s >= 0.0));
    assert!(random.robustness.is_none());
    assert!(fit.lasso.is_none());

    for summary in &fit.index {
        assert!(summary.heterogeneity_std.is_some());
    }
}

#[test]
fn test_random_scales_with_lasso() {
    let table = synthetic_table(3, 4, 40, 1.3);
    let config = ModelConfig {
        household_types: vec![HouseholdType::TwoPerson],
        lasso: Some(LassoConfig {
            cv: ElasticNetCv {
                n_alphas: 10,
                folds: RepeatedKFold {
                    n_splits: 3,
                    n_repeats: 1,
                    seed: 123,
                },
                ..Default::default()
            },
            ..Default::default()
        }),
        ..Default::default()
    };
    let fit = estimate(&table, &config).unwrap();

    let selection = fit.lasso.as_ref().unwrap();
    let pairs = &selection.for_type(HouseholdType::TwoPerson).unwrap().pairs;
    assert_eq!(pairs.len(), 15);
    assert!(pairs.iter().all(|p| p.selected.iter().all(|g| (1..=4).contains(g))));

    let random = fit.random_scale(HouseholdType::TwoPerson).unwrap();
    let robustness = random.robustness.as_ref().unwrap();
    assert_eq!(robustness.lower_std.len(), 5);
    assert_eq!(robustness.upper_std.len(), 5);

    // Replicates reuse the full-sample selection
    let boot = BootstrapConfig {
        replicates: 4,
        penalty_selection: PenaltySelection::FullSample,
        min_success_fraction: 0.5,
        ..Default::default()
    };
    let result = run_bootstrap(&table, &config, &boot, Some(selection), None).unwrap();
    let errors = result.for_type(HouseholdType::TwoPerson).unwrap();
    assert_eq!(errors.random_std_lower.len(), 5);
}

#[test]
fn test_single_replicate_has_undefined_errors() {
    let table = synthetic_table(4, 2, 15, 1.5);
    let config = BootstrapConfig {
        replicates: 1,
        ..Default::default()
    };
    let result = run_bootstrap(&table, &couples_only(), &config, None, None).unwrap();

    assert_eq!(result.succeeded, 1);
    let errors = result.for_type(HouseholdType::TwoPerson).unwrap();
    assert!(errors.scales.iter().all(Option::is_none));
    assert!(result.index.iter().all(|i| i.mean.is_none()));
}

#[test]
fn test_bootstrap_is_deterministic_and_reports_progress() {
    let table = synthetic_table(5, 2, 15, 1.5);
    let config = BootstrapConfig {
        replicates: 20,
        ..Default::default()
    };
    let ticks = AtomicUsize::new(0);
    let tick = || {
        ticks.fetch_add(1, Ordering::Relaxed);
    };

    let first = run_bootstrap(&table, &couples_only(), &config, None, Some(&tick)).unwrap();
    let second = run_bootstrap(&table, &couples_only(), &config, None, None).unwrap();

    assert_eq!(ticks.load(Ordering::Relaxed), 20);
    assert_eq!(first, second);
    let errors = first.for_type(HouseholdType::TwoPerson).unwrap();
    assert!(errors.scales.iter().all(|se| se.is_some_and(|v| v > 0.0)));
    // Random scales are disabled
    assert!(errors.random_std.iter().all(Option::is_none));
}

#[test]
fn test_index_std_has_a_bootstrap_standard_error() {
    let table = synthetic_table(8, 2, 15, 1.5);
    let run = |seed| {
        let config = BootstrapConfig {
            replicates: 30,
            seed,
            ..Default::default()
        };
        let result = run_bootstrap(&table, &couples_only(), &config, None, None).unwrap();
        result
            .for_index(ReferenceGroup::Singles, HouseholdType::TwoPerson)
            .unwrap()
            .std
    };

    let se = run(7).unwrap();
    assert!(se.is_finite() && se > 0.0);
    assert_eq!(run(7), Some(se));
    assert_ne!(run(8), Some(se));
}

#[test]
fn test_standard_errors_settle_as_replicates_grow() {
    let table = synthetic_table(6, 2, 10, 1.5);
    let spread = |replicates: usize| {
        let ses: Vec<f64> = (0..10)
            .map(|seed| {
                let config = BootstrapConfig {
                    replicates,
                    seed,
                    ..Default::default()
                };
                let result = run_bootstrap(&table, &couples_only(), &config, None, None).unwrap();
                result.for_type(HouseholdType::TwoPerson).unwrap().scales[0].unwrap()
            })
            .collect();
        sample_std(&ses).unwrap()
    };

    assert!(spread(2000) < spread(200));
}
