//! Layered configuration
//!
//! Layers, lowest precedence first:
//! 1. Built-in defaults
//! 2. Config file (`-c`, or `lorahub-build.toml` in the project)
//! 3. CLI flags

mod defaults;
mod effective;
mod matrix;
mod merge;

pub use defaults::BuiltinDefaults;
pub use effective::{ConfigError, ConfigOrigin, ConfigSource, EffectiveConfig, CONFIG_FILE};
pub use matrix::{MatrixConfig, ToolchainConfig};
pub use merge::{deep_merge, merge_layers};
