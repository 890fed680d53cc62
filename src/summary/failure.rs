//! Failure taxonomy and stable exit codes

use serde::{Deserialize, Serialize};

/// Variant/run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Completed successfully
    Success,
    /// Failed during a phase
    Failed,
    /// Stopped by an interrupt
    Cancelled,
    /// Never attempted because the run aborted earlier
    Skipped,
}

impl Status {
    pub fn is_failure(&self) -> bool {
        matches!(self, Status::Failed | Status::Cancelled)
    }
}

/// Failure kind - categorizes the cause of failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    /// Invalid configuration or variant selection
    Config,
    /// Could not read or write the shared configuration
    Environment,
    /// Clean or build step failed
    Build,
    /// Declared output missing, or archive copy failed
    Artifacts,
    /// Interrupted
    Cancelled,
}

impl FailureKind {
    /// Get the stable exit code for this failure kind
    pub fn exit_code(&self) -> ExitCode {
        match self {
            FailureKind::Config => ExitCode::Config,
            FailureKind::Environment => ExitCode::Environment,
            FailureKind::Build => ExitCode::BuildFailed,
            FailureKind::Artifacts => ExitCode::ArtifactsFailed,
            FailureKind::Cancelled => ExitCode::Cancelled,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            FailureKind::Config => "Configuration error",
            FailureKind::Environment => "Configuration file could not be read or written",
            FailureKind::Build => "Build step failed",
            FailureKind::Artifacts => "Artifact archiving failed",
            FailureKind::Cancelled => "Run cancelled",
        }
    }
}

/// Stable process exit codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    /// Config file, CLI usage or variant selection
    Config = 1,
    /// Base configuration could not be captured or restored
    Environment = 10,
    BuildFailed = 50,
    ArtifactsFailed = 70,
    Cancelled = 80,
}

impl ExitCode {
    pub fn as_i32(&self) -> i32 {
        *self as i32
    }

    pub fn from_i32(code: i32) -> Option<Self> {
        match code {
            0 => Some(ExitCode::Success),
            1 => Some(ExitCode::Config),
            10 => Some(ExitCode::Environment),
            50 => Some(ExitCode::BuildFailed),
            70 => Some(ExitCode::ArtifactsFailed),
            80 => Some(ExitCode::Cancelled),
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExitCode::Success)
    }
}

impl Default for ExitCode {
    fn default() -> Self {
        ExitCode::Success
    }
}
