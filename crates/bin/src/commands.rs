//! Subcommand implementations.

use crate::OutputFormat;
use barten::prelude::*;
use barten::data::Selection;
use barten::model::LassoSelection;
use indicatif::{ProgressBar, ProgressStyle};
use std::error::Error;
use std::path::{Path, PathBuf};

/// Settings shared by every subcommand.
#[derive(Debug, Clone)]
pub(crate) struct ModelOptions {
    pub(crate) household_types: Vec<HouseholdType>,
    pub(crate) lasso: bool,
    pub(crate) random_scales: bool,
    pub(crate) format: OutputFormat,
    pub(crate) output: Option<PathBuf>,
}

impl ModelOptions {
    fn sample_config(&self) -> SampleConfig {
        SampleConfig {
            household_types: self.household_types.clone(),
            ..Default::default()
        }
    }

    fn model_config(&self) -> ModelConfig {
        ModelConfig {
            household_types: self.household_types.clone(),
            random_scales: self.random_scales,
            lasso: self.lasso.then(LassoConfig::default),
            ..Default::default()
        }
    }
}

/// Bootstrap settings from the command line.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BootstrapOptions {
    pub(crate) replicates: usize,
    pub(crate) seed: u64,
    pub(crate) scheme: ResamplingScheme,
    pub(crate) penalty_selection: PenaltySelection,
}

fn load(csv: &Path, options: &ModelOptions) -> Result<Selection, Box<dyn Error>> {
    let selection = load_households(csv, &options.sample_config())?;
    let report = selection.report;
    log::info!(
        "Loaded {} rows from {}, {} households after selection",
        report.loaded,
        csv.display(),
        report.after_singleton_cells
    );
    log::debug!("Selection stages: {report:?}");
    Ok(selection)
}

fn title(csv: &Path) -> String {
    csv.file_stem()
        .map_or_else(|| "survey".to_string(), |s| s.to_string_lossy().into_owned())
}

fn render(summary: &EstimationSummary, options: &ModelOptions) -> Result<(), Box<dyn Error>> {
    match options.format {
        OutputFormat::Text => println!("{}", summary.to_ascii_table()),
        OutputFormat::Markdown => println!("{}", summary.to_markdown()),
        OutputFormat::Json => println!("{}", Report::from_summary(summary)?.to_json()?),
    }

    if let Some(path) = &options.output {
        let format = ExportFormat::from_path(path)?;
        summary.export_to_file(path, format)?;
        log::info!("Exported results to {}", path.display());
    }
    Ok(())
}

/// Full-sample fit with hypothesis tests.
pub(crate) fn estimate(csv: &Path, options: &ModelOptions) -> Result<(), Box<dyn Error>> {
    let selection = load(csv, options)?;
    let config = options.model_config();
    let fit = barten::model::estimate(&selection.table, &config)?;

    let summary = EstimationSummary::from_fit(title(csv), &fit, &config, None);
    render(&summary, options)
}

/// Full-sample fit followed by bootstrap standard errors.
pub(crate) fn bootstrap(
    csv: &Path,
    options: &ModelOptions,
    boot: &BootstrapOptions,
) -> Result<(), Box<dyn Error>> {
    let selection = load(csv, options)?;
    let config = options.model_config();
    let fit = barten::model::estimate(&selection.table, &config)?;

    let boot_config = BootstrapConfig {
        replicates: boot.replicates,
        seed: boot.seed,
        scheme: boot.scheme,
        penalty_selection: boot.penalty_selection,
        ..Default::default()
    };
    let full_sample: Option<&LassoSelection> = match boot.penalty_selection {
        PenaltySelection::FullSample => fit.lasso.as_ref(),
        PenaltySelection::PerReplicate => None,
    };

    let pb = ProgressBar::new(boot.replicates as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} replicates {msg}")?
            .progress_chars("█▓░"),
    );
    let tick = || pb.inc(1);

    let result = run_bootstrap(&selection.table, &config, &boot_config, full_sample, Some(&tick));
    match &result {
        Ok(r) => pb.finish_with_message(format!("({} failed)", r.failures.len())),
        Err(_) => pb.finish_with_message("Failed!"),
    }
    let result = result?;

    let summary = EstimationSummary::from_fit(title(csv), &fit, &config, Some(&result));
    render(&summary, options)
}
