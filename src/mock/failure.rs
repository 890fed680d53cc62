//! Failure injection for the scripted toolchain
//!
//! Supports configurable failure injection for testing error paths.

use std::collections::HashMap;

use crate::toolchain::{BuildStep, StepFailure};

/// Failure configuration for a build step
#[derive(Debug, Clone)]
pub struct FailureConfig {
    /// Exit code reported by the failing step
    pub exit_code: i32,
    /// Fail only on this call (1-based); None = every call
    pub on_call: Option<u32>,
    /// Number of times to fail before succeeding (None = always fail)
    pub fail_count: Option<u32>,
}

impl FailureConfig {
    /// Fail with the given exit code on every call
    pub fn exit_code(code: i32) -> Self {
        Self {
            exit_code: code,
            on_call: None,
            fail_count: None,
        }
    }

    /// Fail only on the N-th call (1-based)
    pub fn on_call(mut self, n: u32) -> Self {
        self.on_call = Some(n);
        self
    }

    /// Set the number of times to fail before succeeding
    pub fn with_fail_count(mut self, count: u32) -> Self {
        self.fail_count = Some(count);
        self
    }

    fn failure(&self) -> StepFailure {
        StepFailure::ExitCode {
            code: self.exit_code,
        }
    }
}

/// Per-step failure injector
#[derive(Debug, Default)]
pub struct FailureInjector {
    configs: HashMap<BuildStep, FailureConfig>,
    /// Call counts per step (for on_call / fail_count tracking)
    call_counts: HashMap<BuildStep, u32>,
}

impl FailureInjector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inject a failure for a step
    pub fn inject(&mut self, step: BuildStep, config: FailureConfig) {
        self.configs.insert(step, config);
    }

    pub fn clear(&mut self) {
        self.configs.clear();
        self.call_counts.clear();
    }

    /// How many times `step` has been checked
    pub fn calls(&self, step: BuildStep) -> u32 {
        self.call_counts.get(&step).copied().unwrap_or(0)
    }

    /// Count a call to `step` and return the failure it should report, if any
    pub fn check(&mut self, step: BuildStep) -> Option<StepFailure> {
        let count = self.call_counts.entry(step).or_insert(0);
        *count += 1;
        let count = *count;

        let config = self.configs.get(&step)?;

        if let Some(n) = config.on_call {
            if count != n {
                return None;
            }
        }

        // Check if we should still fail based on fail_count
        if let Some(fail_limit) = config.fail_count {
            if count > fail_limit {
                return None;
            }
        }

        Some(config.failure())
    }
}
