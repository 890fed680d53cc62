//! Matrix run state machines
//!
//! - Run states: INIT → RUNNING → {DONE | ABORTED | CANCELLED}
//! - Variant phases: PENDING → ACTIVATE → BUILD → ARCHIVE → RESTORE →
//!   {SUCCEEDED | FAILED}, or PENDING → SKIPPED after an abort

mod run_state;
mod variant_state;

pub use run_state::{CurrentVariant, MatrixState, RunStateData, RunStateError, STATE_FILE};
pub use variant_state::{VariantPhase, VariantStateData};

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};

/// Global sequence counter for ordering state updates
static SEQUENCE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Get the next sequence number for ordering
pub fn next_seq() -> u64 {
    SEQUENCE_COUNTER.fetch_add(1, Ordering::SeqCst)
}

/// Current UTC timestamp
pub fn now_utc() -> DateTime<Utc> {
    Utc::now()
}

/// Check if a state is terminal (no further transitions possible)
pub trait TerminalState {
    fn is_terminal(&self) -> bool;
}
