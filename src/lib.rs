//! LoRaHub firmware build matrix
//!
//! Builds the LoRaHub ESP-IDF project once per hardware variant. Each
//! variant's `sdkconfig` fragment is appended to the project's
//! `sdkconfig.defaults`, the tree is rebuilt from clean, and the outputs
//! are archived under the variant's name. The original defaults are
//! written back after every variant and when the run ends, however it
//! ends.

pub mod artifact;
pub mod config;
pub mod environment;
pub mod logging;
pub mod mock;
pub mod pipeline;
pub mod signal;
pub mod state;
pub mod summary;
pub mod toolchain;
pub mod variant;

pub use artifact::{Archiver, BuildOutputSet, OutputFile};
pub use config::{EffectiveConfig, MatrixConfig};
pub use environment::{BuildEnvironment, EnvironmentPaths};
pub use pipeline::{MatrixError, MatrixOptions, MatrixPipeline, MatrixReport};
pub use summary::{ExitCode, MatrixSummary};
pub use toolchain::{IdfToolchain, Toolchain};
pub use variant::{ConfigVariant, VariantRegistry};
