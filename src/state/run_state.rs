//! Run state machine
//!
//! Run states: INIT → RUNNING → {DONE | ABORTED | CANCELLED}
//!
//! Persisted as `matrix_state.json` in the archive root after every
//! change, so a run killed mid-build still says which variant held the
//! configuration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;

use super::{next_seq, now_utc, TerminalState, VariantPhase};

/// Schema version for matrix_state.json
pub const SCHEMA_VERSION: u32 = 1;

/// Schema identifier
pub const SCHEMA_ID: &str = "lorahub-build/matrix_state@1";

/// File name inside the archive root
pub const STATE_FILE: &str = "matrix_state.json";

/// Run state enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatrixState {
    /// Base configuration not yet captured
    Init,
    /// Iterating variants
    Running,
    /// Every variant completed and the base is active
    Done,
    /// Stopped at a failing variant
    Aborted,
    /// Stopped by an interrupt
    Cancelled,
}

impl TerminalState for MatrixState {
    fn is_terminal(&self) -> bool {
        matches!(
            self,
            MatrixState::Done | MatrixState::Aborted | MatrixState::Cancelled
        )
    }
}

impl MatrixState {
    /// Check if transition from this state to target is valid
    pub fn can_transition_to(&self, target: MatrixState) -> bool {
        match (self, target) {
            (MatrixState::Init, MatrixState::Running) => true,
            (MatrixState::Init, MatrixState::Aborted) => true, // Snapshot failed
            (MatrixState::Init, MatrixState::Cancelled) => true,

            (MatrixState::Running, MatrixState::Done) => true,
            (MatrixState::Running, MatrixState::Aborted) => true,
            (MatrixState::Running, MatrixState::Cancelled) => true,

            _ => false,
        }
    }
}

/// Variant currently being processed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentVariant {
    /// Position in build order (0-based)
    pub index: usize,

    /// Variant name
    pub name: String,

    /// Phase within the variant
    pub phase: VariantPhase,
}

/// Run state artifact data (matrix_state.json)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStateData {
    pub schema_version: u32,

    pub schema_id: String,

    /// Run identifier
    pub run_id: String,

    /// Current state
    pub state: MatrixState,

    /// Number of variants in the run
    pub variant_count: usize,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    /// Variant being processed (None outside RUNNING)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current: Option<CurrentVariant>,

    /// Monotonic sequence counter for ordering
    pub seq: u64,
}

/// Errors for run state operations
#[derive(Debug, thiserror::Error)]
pub enum RunStateError {
    #[error("Invalid state transition from {from:?} to {to:?}")]
    InvalidTransition { from: MatrixState, to: MatrixState },

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl RunStateData {
    /// Create a new run in INIT state
    pub fn new(run_id: String, variant_count: usize) -> Self {
        let now = now_utc();
        Self {
            schema_version: SCHEMA_VERSION,
            schema_id: SCHEMA_ID.to_string(),
            run_id,
            state: MatrixState::Init,
            variant_count,
            created_at: now,
            updated_at: now,
            current: None,
            seq: next_seq(),
        }
    }

    /// Transition to a new state
    pub fn transition(&mut self, new_state: MatrixState) -> Result<(), RunStateError> {
        if !self.state.can_transition_to(new_state) {
            return Err(RunStateError::InvalidTransition {
                from: self.state,
                to: new_state,
            });
        }

        self.state = new_state;
        self.updated_at = now_utc();
        self.seq = next_seq();

        if new_state.is_terminal() {
            self.current = None;
        }

        Ok(())
    }

    /// INIT → RUNNING
    pub fn start(&mut self) -> Result<(), RunStateError> {
        self.transition(MatrixState::Running)
    }

    pub fn complete(&mut self) -> Result<(), RunStateError> {
        self.transition(MatrixState::Done)
    }

    pub fn abort(&mut self) -> Result<(), RunStateError> {
        self.transition(MatrixState::Aborted)
    }

    pub fn cancel(&mut self) -> Result<(), RunStateError> {
        self.transition(MatrixState::Cancelled)
    }

    /// Record the variant and phase being worked on
    pub fn set_current(&mut self, index: usize, name: &str, phase: VariantPhase) {
        self.current = Some(CurrentVariant {
            index,
            name: name.to_string(),
            phase,
        });
        self.updated_at = now_utc();
        self.seq = next_seq();
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Write atomically to file (write-then-rename)
    pub fn write_to_file(&self, path: &Path) -> Result<(), RunStateError> {
        let json = self.to_json()?;
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, &json)?;
        fs::rename(&temp_path, path)?;
        Ok(())
    }

    pub fn from_file(path: &Path) -> Result<Self, RunStateError> {
        let json = fs::read_to_string(path)?;
        Ok(Self::from_json(&json)?)
    }

    /// Write into the archive root as matrix_state.json
    pub fn write_to_dir(&self, dir: &Path) -> Result<(), RunStateError> {
        self.write_to_file(&dir.join(STATE_FILE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_new_run_state() {
        let state = RunStateData::new("run-123".to_string(), 6);
        assert_eq!(state.state, MatrixState::Init);
        assert_eq!(state.variant_count, 6);
        assert!(state.current.is_none());
    }

    #[test]
    fn test_valid_transitions() {
        let mut state = RunStateData::new("run-123".to_string(), 2);
        state.start().unwrap();
        state.set_current(0, "alpha", VariantPhase::Build);
        state.complete().unwrap();
        assert_eq!(state.state, MatrixState::Done);
        assert!(state.current.is_none());
    }

    #[test]
    fn test_abort_before_start() {
        let mut state = RunStateData::new("run-123".to_string(), 2);
        assert!(state.abort().is_ok());
        assert!(state.state.is_terminal());
    }

    #[test]
    fn test_invalid_transition() {
        let mut state = RunStateData::new("run-123".to_string(), 2);
        // Cannot finish without running
        assert!(state.complete().is_err());

        state.start().unwrap();
        state.abort().unwrap();
        assert!(matches!(
            state.start(),
            Err(RunStateError::InvalidTransition {
                from: MatrixState::Aborted,
                to: MatrixState::Running
            })
        ));
    }

    #[test]
    fn test_serialization() {
        let mut state = RunStateData::new("run-123".to_string(), 2);
        state.start().unwrap();
        state.set_current(1, "beta", VariantPhase::Archive);
        let json = state.to_json().unwrap();

        assert!(json.contains("\"state\": \"RUNNING\""));
        assert!(json.contains("\"phase\": \"ARCHIVE\""));
        assert!(json.contains("\"name\": \"beta\""));
    }

    #[test]
    fn test_write_and_read_dir() {
        let dir = TempDir::new().unwrap();
        let mut state = RunStateData::new("run-123".to_string(), 2);
        state.start().unwrap();
        state.write_to_dir(dir.path()).unwrap();

        let loaded = RunStateData::from_file(&dir.path().join(STATE_FILE)).unwrap();
        assert_eq!(loaded.run_id, "run-123");
        assert_eq!(loaded.state, MatrixState::Running);
        assert!(!dir.path().join("matrix_state.tmp").exists());
    }
}
