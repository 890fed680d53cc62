//! Build invoker
//!
//! Runs a full clean followed by a full build of the firmware project.
//! The external toolchain is reached through the [`Toolchain`] trait so
//! the orchestrator never depends on a real `idf.py` in tests.
//!
//! Success is decided by process exit status only; no output is parsed.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::variant::ConfigVariant;

/// The two external steps of a rebuild
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStep {
    /// Remove all prior build state
    Clean,
    /// Full build
    Build,
}

impl fmt::Display for BuildStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildStep::Clean => write!(f, "clean"),
            BuildStep::Build => write!(f, "build"),
        }
    }
}

/// Why a single external step did not succeed
#[derive(Debug, thiserror::Error)]
pub enum StepFailure {
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("exited with status {code}")]
    ExitCode { code: i32 },

    #[error("terminated by signal")]
    Signalled,

    #[error("{0}")]
    Scripted(String),
}

impl StepFailure {
    /// Classify a finished process
    pub fn from_status(status: ExitStatus) -> Option<Self> {
        if status.success() {
            None
        } else {
            Some(match status.code() {
                Some(code) => StepFailure::ExitCode { code },
                None => StepFailure::Signalled,
            })
        }
    }
}

/// A rebuild failed for a variant
#[derive(Debug, thiserror::Error)]
#[error("build failed for variant '{variant}' during {step}: {cause}")]
pub struct BuildError {
    pub variant: String,
    pub step: BuildStep,
    #[source]
    pub cause: StepFailure,
}

/// Capability interface over the external build tool
pub trait Toolchain {
    /// Remove all prior build state
    fn run_clean(&mut self) -> Result<(), StepFailure>;

    /// Run a full build against the active configuration
    fn run_build(&mut self) -> Result<(), StepFailure>;

    /// Human-readable description of what each step runs
    fn describe(&self) -> String {
        "external toolchain".to_string()
    }
}

/// Timing of a successful rebuild
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildReport {
    pub clean_ms: u64,
    pub build_ms: u64,
}

impl BuildReport {
    pub fn total_ms(&self) -> u64 {
        self.clean_ms + self.build_ms
    }
}

/// Clean then build. No retries.
pub fn build<T: Toolchain + ?Sized>(
    toolchain: &mut T,
    variant: &ConfigVariant,
) -> Result<BuildReport, BuildError> {
    let fail = |step, cause| BuildError {
        variant: variant.name.clone(),
        step,
        cause,
    };

    info!(variant = %variant.name, "cleaning build tree");
    let start = Instant::now();
    toolchain
        .run_clean()
        .map_err(|cause| fail(BuildStep::Clean, cause))?;
    let clean_ms = start.elapsed().as_millis() as u64;

    info!(variant = %variant.name, "building");
    let start = Instant::now();
    toolchain
        .run_build()
        .map_err(|cause| fail(BuildStep::Build, cause))?;
    let build_ms = start.elapsed().as_millis() as u64;

    debug!(variant = %variant.name, clean_ms, build_ms, "build finished");
    Ok(BuildReport { clean_ms, build_ms })
}

/// ESP-IDF `idf.py` driven as a subprocess
#[derive(Debug, Clone)]
pub struct IdfToolchain {
    program: String,
    clean_args: Vec<String>,
    build_args: Vec<String>,
    project_dir: PathBuf,
}

impl IdfToolchain {
    /// `idf.py fullclean` / `idf.py build` in `project_dir`
    pub fn new(project_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: "idf.py".to_string(),
            clean_args: vec!["fullclean".to_string()],
            build_args: vec!["build".to_string()],
            project_dir: project_dir.into(),
        }
    }

    /// Override the program and argument lists
    pub fn with_commands(
        mut self,
        program: impl Into<String>,
        clean_args: Vec<String>,
        build_args: Vec<String>,
    ) -> Self {
        self.program = program.into();
        self.clean_args = clean_args;
        self.build_args = build_args;
        self
    }

    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    fn run(&self, args: &[String]) -> Result<(), StepFailure> {
        debug!(program = %self.program, ?args, dir = %self.project_dir.display(), "spawning");

        // Blocking wait with inherited stdio: the build may run arbitrarily long
        let status = Command::new(&self.program)
            .args(args)
            .current_dir(&self.project_dir)
            .status()
            .map_err(|source| StepFailure::Spawn {
                program: self.program.clone(),
                source,
            })?;

        match StepFailure::from_status(status) {
            None => Ok(()),
            Some(failure) => Err(failure),
        }
    }
}

impl Toolchain for IdfToolchain {
    fn run_clean(&mut self) -> Result<(), StepFailure> {
        self.run(&self.clean_args)
    }

    fn run_build(&mut self) -> Result<(), StepFailure> {
        self.run(&self.build_args)
    }

    fn describe(&self) -> String {
        format!(
            "{} {} && {} {}",
            self.program,
            self.clean_args.join(" "),
            self.program,
            self.build_args.join(" ")
        )
    }
}
