#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/hsieh-lewbel-pendakur/barten/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod export;
pub mod report;
pub mod summary;

pub use export::{ExportError, ExportFormat, Exporter, SummaryRecord};
pub use report::{Report, ReportError};
pub use summary::{
    BootstrapSummary, EstimationSummary, IndexRow, MatrixKind, MatrixSummary, RandomScaleRow,
    ScaleRow, TestRow, UNSTABLE_MARKER,
};

/// Version information.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
