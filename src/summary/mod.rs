//! Run summary and failure taxonomy
//!
//! Implements matrix_summary.json and the stable exit codes.

mod failure;
mod run_summary;
mod variant_outcome;

pub use failure::{ExitCode, FailureKind, Status};
pub use run_summary::{MatrixSummary, RUN_SUMMARY_SCHEMA_ID, RUN_SUMMARY_SCHEMA_VERSION, SUMMARY_FILE};
pub use variant_outcome::VariantOutcome;
