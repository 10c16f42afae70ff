//! Post-load data validation: date-coverage/anomaly analysis (spec.md
//! section 4.9) and duplicate-key detection (section 4.10). Both issue a
//! single aggregation query against the warehouse and do the rest of the
//! work — date-range math, gap detection, severity classification — in
//! plain Rust so it can be unit- and property-tested without a live
//! connection.

pub mod duplicates;
pub mod stats;
pub mod validator;

pub use duplicates::{
    check_duplicates, DuplicateCheckError, DuplicateCheckRequest, DuplicateCheckResult,
    DuplicateGroup, DuplicateSeverity, SeverityThresholds,
};
pub use validator::{build_result, validate, ValidationRequest, ValidatorError};
