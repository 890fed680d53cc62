//! Matrix summary (matrix_summary.json)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;

use super::failure::{ExitCode, Status};
use super::variant_outcome::VariantOutcome;

/// Schema version for matrix_summary.json
pub const RUN_SUMMARY_SCHEMA_VERSION: u32 = 1;

/// Schema identifier for matrix_summary.json
pub const RUN_SUMMARY_SCHEMA_ID: &str = "lorahub-build/matrix_summary@1";

/// File name inside the archive root
pub const SUMMARY_FILE: &str = "matrix_summary.json";

/// Run summary (matrix_summary.json)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatrixSummary {
    pub schema_version: u32,

    pub schema_id: String,

    /// Run identifier
    pub run_id: String,

    pub created_at: DateTime<Utc>,

    /// Aggregated status
    pub status: Status,

    /// Aggregated exit code
    pub exit_code: i32,

    /// Total variants selected for the run
    pub variant_count: usize,

    pub variants_succeeded: usize,

    pub variants_failed: usize,

    pub variants_cancelled: usize,

    /// Variants never attempted because of fail-fast
    pub variants_skipped: usize,

    /// Variant the run stopped at, if it did not complete
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stopped_at: Option<String>,

    /// Whether the base configuration was confirmed active at the end
    pub base_restored: bool,

    /// Wall-clock duration of the entire run in milliseconds
    pub duration_ms: u64,

    /// Per-variant outcomes in build order
    pub variants: Vec<VariantOutcome>,

    /// Human-readable final line
    pub human_summary: String,
}

impl MatrixSummary {
    /// Aggregate per-variant outcomes
    ///
    /// A cancelled variant wins over a failed one; otherwise the first
    /// failure decides the exit code.
    pub fn from_outcomes(run_id: String, outcomes: Vec<VariantOutcome>, duration_ms: u64) -> Self {
        let mut succeeded = 0;
        let mut failed = 0;
        let mut cancelled = 0;
        let mut skipped = 0;
        let mut first_failure: Option<&VariantOutcome> = None;

        for outcome in &outcomes {
            match outcome.status {
                Status::Success => succeeded += 1,
                Status::Failed => failed += 1,
                Status::Cancelled => cancelled += 1,
                Status::Skipped => skipped += 1,
            }
            if outcome.status.is_failure() && first_failure.is_none() {
                first_failure = Some(outcome);
            }
        }

        let (status, exit_code) = if cancelled > 0 {
            (Status::Cancelled, ExitCode::Cancelled)
        } else if let Some(f) = first_failure {
            (Status::Failed, f.exit_code())
        } else {
            (Status::Success, ExitCode::Success)
        };
        let stopped_at = first_failure.map(|f| f.name.clone());

        let mut summary = Self {
            schema_version: RUN_SUMMARY_SCHEMA_VERSION,
            schema_id: RUN_SUMMARY_SCHEMA_ID.to_string(),
            run_id,
            created_at: Utc::now(),
            status,
            exit_code: exit_code.as_i32(),
            variant_count: outcomes.len(),
            variants_succeeded: succeeded,
            variants_failed: failed,
            variants_cancelled: cancelled,
            variants_skipped: skipped,
            stopped_at,
            base_restored: true,
            duration_ms,
            variants: outcomes,
            human_summary: String::new(),
        };
        summary.human_summary = summary.generate_human_summary();
        summary
    }

    /// Record that the base configuration could not be confirmed at the end
    pub fn with_base_unverified(mut self) -> Self {
        self.base_restored = false;
        if self.status == Status::Success {
            self.status = Status::Failed;
            self.exit_code = ExitCode::Environment.as_i32();
        }
        self.human_summary = self.generate_human_summary();
        self
    }

    fn generate_human_summary(&self) -> String {
        let mut line = match (&self.stopped_at, self.status) {
            (None, Status::Success) => {
                format!("all {} variants completed", self.variant_count)
            }
            (Some(name), Status::Cancelled) => format!(
                "cancelled at variant {} ({} of {} completed)",
                name, self.variants_succeeded, self.variant_count
            ),
            (Some(name), _) => format!(
                "stopped at variant {} ({} of {} completed, {} skipped)",
                name, self.variants_succeeded, self.variant_count, self.variants_skipped
            ),
            (None, _) => format!(
                "run did not complete ({} of {} completed)",
                self.variants_succeeded, self.variant_count
            ),
        };
        if !self.base_restored {
            line.push_str("; base configuration NOT confirmed, run with --recover");
        }
        line
    }

    /// Warnings collected across all variants
    pub fn warnings(&self) -> impl Iterator<Item = &str> {
        self.variants
            .iter()
            .flat_map(|v| v.warnings.iter().map(String::as_str))
    }

    /// Multi-line report: one line per variant, then the final line
    pub fn render(&self) -> String {
        let mut out = String::new();
        for v in &self.variants {
            out.push_str("  ");
            out.push_str(&v.describe());
            out.push('\n');
        }
        out.push_str(&self.human_summary);
        out
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn write_to_file(&self, path: &Path) -> io::Result<()> {
        let json = self.to_json().map_err(|e| {
            io::Error::new(io::ErrorKind::InvalidData, format!("JSON error: {}", e))
        })?;
        fs::write(path, json)
    }

    pub fn from_file(path: &Path) -> io::Result<Self> {
        let json = fs::read_to_string(path)?;
        Self::from_json(&json)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("JSON error: {}", e)))
    }

    pub fn exit_code_enum(&self) -> Option<ExitCode> {
        ExitCode::from_i32(self.exit_code)
    }
}
