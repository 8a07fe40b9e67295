//! Integration tests for summaries and exports of a real fit.

use approx::assert_abs_diff_eq;
use barten_data::{CategorySet, HouseholdRecord, HouseholdTable, HouseholdType};
use barten_model::{BootstrapConfig, ModelConfig, estimate, run_bootstrap};
use barten_output::{
    EstimationSummary, ExportFormat, Exporter, MatrixKind, Report, SummaryRecord,
};

const SLOPES: [f64; 5] = [0.010, 0.012, 0.014, 0.016, 0.018];

/// Deterministic noise in [-1, 1]
fn wiggle(seed: usize) -> f64 {
    (seed as f64 * 12.9898).sin()
}

fn table() -> HouseholdTable {
    let mut records = Vec::new();
    let mut counter = 0;
    for cluster in 1..=3u32 {
        for t in [
            HouseholdType::SingleMale,
            HouseholdType::SingleFemale,
            HouseholdType::TwoPerson,
        ] {
            for _ in 0..12 {
                counter += 1;
                let y = 2.0 + wiggle(counter);
                let scale = if t.is_single() { 1.0 } else { 1.3 };
                let mut shares: Vec<f64> = SLOPES
                    .iter()
                    .enumerate()
                    .map(|(k, b)| {
                        0.08 + 0.002 * f64::from(cluster)
                            + b * scale * y
                            + 0.002 * wiggle(counter * 7 + k)
                    })
                    .collect();
                shares.push(1.0 - shares.iter().sum::<f64>());
                let x = y.exp();
                records.push(HouseholdRecord {
                    id: 0,
                    expenditure: shares.iter().map(|s| s * x).collect(),
                    log_price: vec![0.0; 6],
                    demographics: vec![0.5 + 0.5 * wiggle(counter * 13)],
                    household_type: t,
                    cluster,
                });
            }
        }
    }
    HouseholdTable::new(CategorySet::default(), vec!["z1".to_string()], records).unwrap()
}

fn config() -> ModelConfig {
    ModelConfig {
        household_types: vec![HouseholdType::TwoPerson],
        random_scales: false,
        ..Default::default()
    }
}

fn summary_with_bootstrap() -> EstimationSummary {
    let table = table();
    let config = config();
    let fit = estimate(&table, &config).unwrap();
    let boot = BootstrapConfig {
        replicates: 8,
        min_success_fraction: 0.5,
        ..Default::default()
    };
    let result = run_bootstrap(&table, &config, &boot, None, None).unwrap();
    EstimationSummary::from_fit("synthetic survey", &fit, &config, Some(&result))
}

#[test]
fn test_summary_of_fit() {
    let summary = summary_with_bootstrap();

    assert_eq!(summary.n_obs, 108);
    assert_eq!(summary.scales.len(), 5);
    assert!(summary.random_scales.is_empty());
    assert_eq!(summary.index.len(), 3);
    assert!(summary.scales.iter().all(|s| s.bootstrap_se.is_some()));
    for row in &summary.scales {
        assert_abs_diff_eq!(row.scale, 1.3, epsilon = 0.25);
    }

    let matrices: Vec<_> = summary.matrices.iter().map(|m| m.kind).collect();
    assert_eq!(matrices, vec![MatrixKind::ScaleCovariance]);
    let covariance = &summary.matrices[0];
    assert_eq!(covariance.values.len(), 5);
    assert!(covariance.bootstrap_se.is_some());

    let boot = summary.bootstrap.as_ref().unwrap();
    assert_eq!(boot.attempted, 8);
    assert_eq!(boot.succeeded + boot.failed, 8);

    let ascii = summary.to_ascii_table();
    assert!(ascii.contains("Barten Scales: synthetic survey"));
    assert!(ascii.contains("Hypothesis Tests"));
    let markdown = summary.to_markdown();
    assert!(markdown.contains("## Economies-of-Scale Index"));
}

#[test]
fn test_json_file_round_trip() {
    let summary = summary_with_bootstrap();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fit.json");

    summary
        .export_to_file(&path, ExportFormat::from_path(&path).unwrap())
        .unwrap();
    let text = std::fs::read_to_string(&path).unwrap();
    let restored: EstimationSummary = serde_json::from_str(&text).unwrap();

    assert_eq!(restored.config, summary.config);
    assert_eq!(restored.scales.len(), summary.scales.len());
    for (a, b) in restored.scales.iter().zip(&summary.scales) {
        assert_eq!(a.household_type, b.household_type);
        assert_eq!(a.category, b.category);
        assert_abs_diff_eq!(a.scale, b.scale, epsilon = 1e-12);
    }
    assert_eq!(restored.tests.len(), summary.tests.len());
}

#[test]
fn test_csv_file_round_trip() {
    let summary = summary_with_bootstrap();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fit.csv");

    summary.export_to_file(&path, ExportFormat::Csv).unwrap();
    let mut reader = csv::Reader::from_path(&path).unwrap();
    let records: Vec<SummaryRecord> = reader.deserialize().collect::<Result<_, _>>().unwrap();

    assert_eq!(records.len(), summary.to_records().len());
    let scales: Vec<_> = records.iter().filter(|r| r.section == "scale").collect();
    assert_eq!(scales.len(), 5);
    assert!(scales.iter().all(|r| r.household_type == "2p"));
    for (record, row) in scales.iter().zip(&summary.scales) {
        assert_abs_diff_eq!(record.estimate.unwrap(), row.scale, epsilon = 1e-9);
        assert_eq!(record.unstable, row.unstable);
    }
}

#[test]
fn test_report_round_trip() {
    let summary = summary_with_bootstrap();
    let report = Report::from_summary(&summary).unwrap();
    let json = report.to_json().unwrap();

    let parsed: Report = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed.title, "synthetic survey");
    let restored = parsed.summary().unwrap();
    assert_eq!(restored.n_obs, summary.n_obs);
    assert_eq!(restored.index.len(), 3);
}
