//! Test doubles for the external toolchain
//!
//! `ScriptedToolchain` implements [`crate::toolchain::Toolchain`] without
//! spawning anything. Failures are injected per step with
//! [`FailureInjector`].

mod failure;
mod toolchain;

pub use failure::{FailureConfig, FailureInjector};
pub use toolchain::{seed_project, synthetic_image, ScriptedToolchain};
