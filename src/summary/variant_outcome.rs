//! Per-variant outcome, one entry per variant in matrix_summary.json

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::failure::{ExitCode, FailureKind, Status};
use crate::state::VariantPhase;

/// Result of processing one variant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariantOutcome {
    /// Variant name
    pub name: String,

    /// Position in build order (0-based)
    pub index: usize,

    pub status: Status,

    /// Failure kind (when status is failed or cancelled)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_kind: Option<FailureKind>,

    /// Phase that was running when the variant stopped
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_phase: Option<VariantPhase>,

    /// Underlying cause, as displayed to the operator
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Wall-clock time spent on the variant
    pub duration_ms: u64,

    /// Time spent in clean + build
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_ms: Option<u64>,

    /// Archived build tree
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive_dir: Option<PathBuf>,

    /// Number of files placed in the export directory
    #[serde(default)]
    pub exported: usize,

    /// Non-fatal problems (export step)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl VariantOutcome {
    fn base(name: &str, index: usize, status: Status) -> Self {
        Self {
            name: name.to_string(),
            index,
            status,
            failure_kind: None,
            failed_phase: None,
            message: None,
            duration_ms: 0,
            build_ms: None,
            archive_dir: None,
            exported: 0,
            warnings: Vec::new(),
        }
    }

    pub fn success(
        name: &str,
        index: usize,
        duration_ms: u64,
        build_ms: u64,
        archive_dir: PathBuf,
    ) -> Self {
        Self {
            duration_ms,
            build_ms: Some(build_ms),
            archive_dir: Some(archive_dir),
            ..Self::base(name, index, Status::Success)
        }
    }

    pub fn failure(
        name: &str,
        index: usize,
        kind: FailureKind,
        phase: VariantPhase,
        message: String,
        duration_ms: u64,
    ) -> Self {
        Self {
            failure_kind: Some(kind),
            failed_phase: Some(phase),
            message: Some(message),
            duration_ms,
            ..Self::base(name, index, Status::Failed)
        }
    }

    pub fn cancelled(name: &str, index: usize, phase: VariantPhase, duration_ms: u64) -> Self {
        Self {
            failure_kind: Some(FailureKind::Cancelled),
            failed_phase: Some(phase),
            message: Some("interrupted".to_string()),
            duration_ms,
            ..Self::base(name, index, Status::Cancelled)
        }
    }

    /// Variant never attempted because an earlier one stopped the run
    pub fn skipped(name: &str, index: usize) -> Self {
        Self::base(name, index, Status::Skipped)
    }

    /// Record export results
    pub fn with_exports(mut self, exported: usize, warnings: Vec<String>) -> Self {
        self.exported = exported;
        self.warnings = warnings;
        self
    }

    pub fn exit_code(&self) -> ExitCode {
        match (self.status, self.failure_kind) {
            (Status::Success | Status::Skipped, _) => ExitCode::Success,
            (Status::Cancelled, _) => ExitCode::Cancelled,
            (Status::Failed, Some(kind)) => kind.exit_code(),
            (Status::Failed, None) => ExitCode::BuildFailed,
        }
    }

    /// One line for the human summary
    pub fn describe(&self) -> String {
        match self.status {
            Status::Success => {
                let mut line = format!("{}: ok ({} ms)", self.name, self.duration_ms);
                if self.exported > 0 {
                    line.push_str(&format!(", {} file(s) exported", self.exported));
                }
                if !self.warnings.is_empty() {
                    line.push_str(&format!(", {} warning(s)", self.warnings.len()));
                }
                line
            }
            Status::Failed | Status::Cancelled => {
                let phase = self
                    .failed_phase
                    .map(|p| format!("{:?}", p).to_lowercase())
                    .unwrap_or_else(|| "unknown".to_string());
                format!(
                    "{}: {} in {} ({})",
                    self.name,
                    if self.status == Status::Cancelled { "cancelled" } else { "FAILED" },
                    phase,
                    self.message.as_deref().unwrap_or("no detail"),
                )
            }
            Status::Skipped => format!("{}: skipped", self.name),
        }
    }
}
