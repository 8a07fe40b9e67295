#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/hsieh-lewbel-pendakur/barten/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod category;
pub mod error;
pub mod household;
pub mod loader;
pub mod sample;

pub use category::{Category, CategorySet};
pub use error::{DataError, Result};
pub use household::{HouseholdRecord, HouseholdTable, HouseholdType};
pub use loader::{SurveyFrame, extract_columns, households_from_frame, load_households, read_csv};
pub use sample::{SampleConfig, Selection, SelectionReport, required_columns, select};

/// Version information.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
