#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/hsieh-lewbel-pendakur/barten/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod error;
pub mod inference;
pub mod linalg;
pub mod penalized;
pub mod projection;
pub mod regression;

// Re-export main types
pub use error::{Result, StatsError};
pub use inference::{
    WaldTest, bootstrap_standard_errors, sample_covariance, sample_std, wald_test,
};
pub use penalized::{
    CvFit, ElasticNet, ElasticNetConfig, ElasticNetCv, PenalizedFit, RepeatedKFold, alpha_grid,
    alpha_max,
};
pub use projection::{
    EigenDecomposition, Projection, ProjectionConfig, ProjectionDiagnostic, cov_to_cor,
    is_positive_semidefinite, jacobi_eigendecomp, nearest_psd,
};
pub use regression::{OlsFit, SurEquation, SurEquationFit, SurFit, SurMethod, fit_sur, ols};
