#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/hsieh-lewbel-pendakur/barten/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod bootstrap;
pub mod config;
pub mod demand;
pub mod design;
pub mod error;
pub mod hypothesis;
pub mod index;
pub mod pipeline;
pub mod scales;
pub mod variance;

// Re-export main types
pub use bootstrap::{
    BootstrapResult, IndexStandardErrors, ReplicateFailure, TypeStandardErrors, draw_indices,
    run_bootstrap,
};
pub use config::{BootstrapConfig, LassoConfig, ModelConfig, PenaltySelection, ResamplingScheme};
pub use demand::{DemandFit, estimate_demand};
pub use design::{Design, PriceGroup};
pub use error::{EstimationError, Result};
pub use hypothesis::{HypothesisTest, TestKind, TestOutcome, run_tests};
pub use index::{IndexSummary, ReferenceGroup, compute_indices};
pub use pipeline::{ModelFit, estimate, fit_model};
pub use scales::{ScaleEstimate, StabilityWarning, recover_scales};
pub use variance::{
    LassoSelection, PairSelection, RandomScaleEstimate, Robustness, SecondStage, TypeSelection,
    estimate_random_scales,
};

/// Version information.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
