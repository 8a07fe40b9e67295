//! Barten CLI binary.
//!
//! Estimates Barten scales from a household survey CSV and, optionally,
//! their bootstrap standard errors.

mod commands;

use barten::data::HouseholdType;
use barten::model::{PenaltySelection, ResamplingScheme};
use clap::{Parser, Subcommand, ValueEnum};
use commands::{BootstrapOptions, ModelOptions};
use std::path::PathBuf;
use std::process;

#[derive(Parser)]
#[command(name = "barten")]
#[command(about = "Barten equivalence scales from household expenditure surveys", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// How results are printed to stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    /// ASCII tables
    Text,
    /// Markdown tables
    Markdown,
    /// Timestamped JSON report
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Fit the model on the full sample and run the hypothesis tests
    Estimate {
        /// Survey CSV file
        csv: PathBuf,

        #[command(flatten)]
        model: ModelArgs,
    },

    /// Fit the model and bootstrap its standard errors
    Bootstrap {
        /// Survey CSV file
        csv: PathBuf,

        #[command(flatten)]
        model: ModelArgs,

        /// Number of bootstrap replicates
        #[arg(long, default_value = "1000")]
        replicates: usize,

        /// Cross-validate the LASSO penalty in every replicate instead of
        /// reusing the full-sample selection
        #[arg(long)]
        per_replicate: bool,

        /// Seed of the resampling RNG
        #[arg(long, default_value = "123")]
        seed: u64,

        /// Resample households from the whole sample instead of within
        /// clusters
        #[arg(long)]
        simple: bool,
    },
}

#[derive(clap::Args)]
struct ModelArgs {
    /// Multi-person household types (2p, 3p, 4p)
    #[arg(long, value_delimiter = ',', value_parser = parse_household_type, default_value = "2p,3p,4p")]
    types: Vec<HouseholdType>,

    /// Select cluster nuisance terms of the random-scale regressions by LASSO
    #[arg(long)]
    lasso: bool,

    /// Skip the random-scale covariance
    #[arg(long)]
    no_random_scales: bool,

    /// Output format
    #[arg(long, value_enum, default_value = "text")]
    format: OutputFormat,

    /// Also export results to this file (.json or .csv)
    #[arg(long)]
    output: Option<PathBuf>,
}

impl ModelArgs {
    fn into_options(self) -> ModelOptions {
        ModelOptions {
            household_types: self.types,
            lasso: self.lasso,
            random_scales: !self.no_random_scales,
            format: self.format,
            output: self.output,
        }
    }
}

fn parse_household_type(s: &str) -> Result<HouseholdType, String> {
    HouseholdType::MULTI_PERSON
        .into_iter()
        .find(|t| t.label() == s.trim())
        .ok_or_else(|| format!("unknown household type '{s}', expected 2p, 3p or 4p"))
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Estimate { csv, model } => {
            commands::estimate(&csv, &model.into_options())?;
        }
        Commands::Bootstrap {
            csv,
            model,
            replicates,
            per_replicate,
            seed,
            simple,
        } => {
            let options = BootstrapOptions {
                replicates,
                seed,
                scheme: if simple {
                    ResamplingScheme::Simple
                } else {
                    ResamplingScheme::Stratified
                },
                penalty_selection: if per_replicate {
                    PenaltySelection::PerReplicate
                } else {
                    PenaltySelection::FullSample
                },
            };
            commands::bootstrap(&csv, &model.into_options(), &options)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use rstest::rstest;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[rstest]
    #[case("2p", HouseholdType::TwoPerson)]
    #[case(" 4p", HouseholdType::FourPerson)]
    fn test_parse_household_type(#[case] input: &str, #[case] expected: HouseholdType) {
        assert_eq!(parse_household_type(input).unwrap(), expected);
    }

    #[test]
    fn test_singles_are_not_a_model_type() {
        assert!(parse_household_type("sm").is_err());
    }

    #[test]
    fn test_bootstrap_arguments() {
        let cli = Cli::try_parse_from([
            "barten",
            "bootstrap",
            "survey.csv",
            "--replicates",
            "50",
            "--lasso",
            "--simple",
            "--types",
            "2p,3p",
            "--format",
            "json",
        ])
        .unwrap();

        match cli.command {
            Commands::Bootstrap {
                model,
                replicates,
                per_replicate,
                seed,
                simple,
                ..
            } => {
                assert_eq!(replicates, 50);
                assert!(!per_replicate);
                assert_eq!(seed, 123);
                assert!(simple);
                assert!(model.lasso);
                assert_eq!(model.format, OutputFormat::Json);
                assert_eq!(
                    model.types,
                    vec![HouseholdType::TwoPerson, HouseholdType::ThreePerson]
                );
            }
            Commands::Estimate { .. } => panic!("expected bootstrap"),
        }
    }
}
