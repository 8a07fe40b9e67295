#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/hsieh-lewbel-pendakur/barten/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

// Re-export main types from sub-crates
pub use barten_data as data;
pub use barten_model as model;
pub use barten_output as output;
pub use barten_stats as stats;

/// Types needed for a typical estimation run.
pub mod prelude {
    pub use barten_data::{
        Category, CategorySet, HouseholdTable, HouseholdType, SampleConfig, load_households,
    };
    pub use barten_model::{
        BootstrapConfig, EstimationError, LassoConfig, ModelConfig, ModelFit, PenaltySelection,
        ReferenceGroup, ResamplingScheme, estimate, run_bootstrap,
    };
    pub use barten_output::{EstimationSummary, ExportFormat, Exporter, Report};
    pub use barten_stats::ProjectionConfig;
}

/// Version information.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
