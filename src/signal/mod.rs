//! Signal handling for interrupting a matrix run (SIGINT/SIGTERM)
//!
//! On the first signal:
//! 1. Set the cancel flag; the child build usually dies from the same SIGINT
//! 2. The orchestrator sees the flag at the next phase boundary
//! 3. It restores the base configuration, persists state and summary
//! 4. Exit with code 80 (CANCELLED)
//!
//! On the second signal the handler writes the base configuration back
//! from the registered restore point and exits immediately.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{error, warn};

use crate::environment::RestorePoint;
use crate::summary::ExitCode;

/// Exit code for cancelled runs
pub const EXIT_CODE_CANCELLED: i32 = ExitCode::Cancelled as i32;

/// Signal handler state
#[derive(Debug, Default)]
pub struct SignalState {
    /// First signal received (cancellation requested)
    cancel_requested: AtomicBool,
    /// Second signal received (immediate exit requested)
    immediate_exit: AtomicBool,
    signal_count: AtomicU8,
    /// Base configuration to write back on immediate exit
    restore_point: Mutex<Option<RestorePoint>>,
}

impl SignalState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }

    /// Check if immediate exit has been requested (double signal)
    pub fn is_immediate_exit(&self) -> bool {
        self.immediate_exit.load(Ordering::SeqCst)
    }

    pub fn signal_count(&self) -> u8 {
        self.signal_count.load(Ordering::SeqCst)
    }

    /// Handle a signal (SIGINT/SIGTERM)
    ///
    /// Returns the action to take
    pub fn handle_signal(&self) -> SignalAction {
        let count = self.signal_count.fetch_add(1, Ordering::SeqCst);

        if count == 0 {
            self.cancel_requested.store(true, Ordering::SeqCst);
            SignalAction::InitiateCancellation
        } else if count == 1 {
            self.immediate_exit.store(true, Ordering::SeqCst);
            SignalAction::ImmediateExit
        } else {
            SignalAction::Ignore
        }
    }

    /// Register the point to restore from on immediate exit
    pub fn set_restore_point(&self, point: RestorePoint) {
        if let Ok(mut slot) = self.restore_point.lock() {
            *slot = Some(point);
        }
    }

    /// Forget the restore point once the run has restored the base itself
    pub fn clear_restore_point(&self) {
        if let Ok(mut slot) = self.restore_point.lock() {
            *slot = None;
        }
    }

    pub fn restore_point(&self) -> Option<RestorePoint> {
        self.restore_point.lock().ok().and_then(|p| p.clone())
    }

    /// Write the base back if a restore point is registered.
    ///
    /// Returns whether a restore was attempted and succeeded.
    pub fn restore_now(&self) -> bool {
        match self.restore_point() {
            Some(point) => match point.restore() {
                Ok(()) => true,
                Err(e) => {
                    error!(error = %e, "failed to restore base configuration");
                    false
                }
            },
            None => false,
        }
    }

    /// Reset the signal state (for testing)
    pub fn reset(&self) {
        self.cancel_requested.store(false, Ordering::SeqCst);
        self.immediate_exit.store(false, Ordering::SeqCst);
        self.signal_count.store(0, Ordering::SeqCst);
        self.clear_restore_point();
    }
}

/// Action to take after receiving a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    /// First signal: cancel at the next phase boundary
    InitiateCancellation,
    /// Second signal: restore and exit now
    ImmediateExit,
    /// Third+ signal: ignore
    Ignore,
}

/// Signal handler that manages the signal state
pub struct SignalHandler {
    state: Arc<SignalState>,
}

impl SignalHandler {
    pub fn new() -> Self {
        Self {
            state: Arc::new(SignalState::new()),
        }
    }

    pub fn with_state(state: Arc<SignalState>) -> Self {
        Self { state }
    }

    pub fn state(&self) -> Arc<SignalState> {
        Arc::clone(&self.state)
    }

    /// Install the process-wide handler.
    ///
    /// Covers SIGINT and SIGTERM. Must be called once at program startup.
    pub fn install(&self) -> Result<(), ctrlc::Error> {
        let state = Arc::clone(&self.state);
        ctrlc::set_handler(move || match state.handle_signal() {
            SignalAction::InitiateCancellation => {
                warn!("interrupt received, stopping after the current step (press again to exit now)");
            }
            SignalAction::ImmediateExit => {
                let restored = state.restore_now();
                eprintln!(
                    "\nSecond interrupt, exiting immediately (base configuration {})",
                    if restored { "restored" } else { "NOT restored, run with --recover" }
                );
                std::process::exit(EXIT_CODE_CANCELLED);
            }
            SignalAction::Ignore => {}
        })
    }
}

impl Default for SignalHandler {
    fn default() -> Self {
        Self::new()
    }
}

/// Read-side view of the signal state used by the orchestrator
#[derive(Clone)]
pub struct CancellationCoordinator {
    state: Arc<SignalState>,
}

impl CancellationCoordinator {
    pub fn new(state: Arc<SignalState>) -> Self {
        Self { state }
    }

    /// Coordinator with private state that no signal can reach
    pub fn detached() -> Self {
        Self::new(Arc::new(SignalState::new()))
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.is_cancel_requested()
    }

    pub fn should_exit_immediately(&self) -> bool {
        self.state.is_immediate_exit()
    }

    /// Hand the base restore point to the signal handler
    pub fn arm(&self, point: RestorePoint) {
        self.state.set_restore_point(point);
    }

    pub fn disarm(&self) {
        self.state.clear_restore_point();
    }

    /// Request cancellation as if a signal had arrived
    pub fn request_cancel(&self) {
        self.state.handle_signal();
    }

    pub fn state(&self) -> Arc<SignalState> {
        Arc::clone(&self.state)
    }
}
