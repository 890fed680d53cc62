//! Per-variant phase machine
//!
//! PENDING → ACTIVATE → BUILD → ARCHIVE → RESTORE → {SUCCEEDED | FAILED}
//!
//! RESTORE is entered from every active phase, so the base configuration
//! goes back on disk whether or not the variant got that far.

use serde::{Deserialize, Serialize};

use super::{next_seq, TerminalState};

/// Phase of one variant within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VariantPhase {
    /// Not reached yet
    Pending,
    /// Writing the composed configuration
    Activate,
    /// Running clean + build
    Build,
    /// Copying outputs out of the build tree
    Archive,
    /// Writing the base configuration back
    Restore,
    /// All phases completed
    Succeeded,
    /// A phase failed; the base was restored
    Failed,
    /// Never attempted because an earlier variant aborted the run
    Skipped,
}

impl TerminalState for VariantPhase {
    fn is_terminal(&self) -> bool {
        matches!(
            self,
            VariantPhase::Succeeded | VariantPhase::Failed | VariantPhase::Skipped
        )
    }
}

impl VariantPhase {
    /// Check if transition from this phase to target is valid
    pub fn can_transition_to(&self, target: VariantPhase) -> bool {
        use VariantPhase::*;

        match (self, target) {
            (Pending, Activate) | (Pending, Skipped) => true,

            // Forward progress
            (Activate, Build) | (Build, Archive) | (Archive, Restore) => true,

            // Early restore after a failed phase
            (Activate, Restore) | (Build, Restore) => true,

            (Restore, Succeeded) | (Restore, Failed) => true,

            _ => false,
        }
    }

    /// Phases during which the active configuration may differ from the base
    pub fn holds_variant_config(&self) -> bool {
        matches!(
            self,
            VariantPhase::Activate | VariantPhase::Build | VariantPhase::Archive
        )
    }
}

/// Tracked phase for a single variant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariantStateData {
    /// Variant name
    pub name: String,

    /// Position in build order (0-based)
    pub index: usize,

    /// Current phase
    pub phase: VariantPhase,

    /// Phase that failed, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_in: Option<VariantPhase>,

    /// Monotonic sequence counter for ordering
    pub seq: u64,
}

impl VariantStateData {
    pub fn new(name: String, index: usize) -> Self {
        Self {
            name,
            index,
            phase: VariantPhase::Pending,
            failed_in: None,
            seq: next_seq(),
        }
    }

    /// Move to `target`, returning false if the transition is not allowed
    pub fn advance(&mut self, target: VariantPhase) -> bool {
        if !self.phase.can_transition_to(target) {
            return false;
        }
        self.phase = target;
        self.seq = next_seq();
        true
    }

    /// Record that the current phase failed and move to RESTORE
    pub fn fail_current(&mut self) -> bool {
        let failed = self.phase;
        if self.advance(VariantPhase::Restore) {
            self.failed_in = Some(failed);
            true
        } else {
            false
        }
    }

    /// Leave RESTORE with the right terminal phase
    pub fn finish(&mut self) -> bool {
        let target = if self.failed_in.is_some() {
            VariantPhase::Failed
        } else {
            VariantPhase::Succeeded
        };
        self.advance(target)
    }
}
