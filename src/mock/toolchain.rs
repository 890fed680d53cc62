//! Scripted toolchain
//!
//! Stands in for `idf.py`. A successful build writes every declared output
//! and the generated `sdkconfig` into the project, so the orchestrator can
//! run end to end against a temp directory.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use super::failure::{FailureConfig, FailureInjector};
use crate::artifact::BuildOutputSet;
use crate::environment::{BUILD_STATE_FILE, DEFAULTS_FILE};
use crate::signal::CancellationCoordinator;
use crate::toolchain::{BuildStep, StepFailure, Toolchain};

/// Fake toolchain driven by a [`FailureInjector`]
pub struct ScriptedToolchain {
    project_dir: PathBuf,
    build_tree: PathBuf,
    outputs: BuildOutputSet,
    injector: FailureInjector,
    /// Output path (relative to the build tree) left out of every build
    omit: Option<PathBuf>,
    /// Request cancellation on the N-th build (1-based) and die like a child hit by SIGINT
    interrupt_on_build: Option<(u32, CancellationCoordinator)>,
    calls: Vec<BuildStep>,
    /// Active configuration seen by each successful build
    built_configs: Vec<String>,
}

impl ScriptedToolchain {
    /// Fake for an ESP-IDF layout rooted at `project_dir`, building into `build/`
    pub fn new(project_dir: impl Into<PathBuf>, outputs: BuildOutputSet) -> Self {
        let project_dir = project_dir.into();
        Self {
            build_tree: project_dir.join("build"),
            project_dir,
            outputs,
            injector: FailureInjector::new(),
            omit: None,
            interrupt_on_build: None,
            calls: Vec::new(),
            built_configs: Vec::new(),
        }
    }

    pub fn with_build_tree(mut self, build_tree: impl Into<PathBuf>) -> Self {
        self.build_tree = build_tree.into();
        self
    }

    /// Fail `step` as described by `config`
    pub fn failing(mut self, step: BuildStep, config: FailureConfig) -> Self {
        self.injector.inject(step, config);
        self
    }

    /// Report success without producing `relative_path`
    pub fn omitting(mut self, relative_path: impl Into<PathBuf>) -> Self {
        self.omit = Some(relative_path.into());
        self
    }

    pub fn interrupting_build(mut self, n: u32, coordinator: CancellationCoordinator) -> Self {
        self.interrupt_on_build = Some((n, coordinator));
        self
    }

    /// Steps run so far, in order
    pub fn calls(&self) -> &[BuildStep] {
        &self.calls
    }

    pub fn build_count(&self) -> usize {
        self.calls.iter().filter(|s| **s == BuildStep::Build).count()
    }

    pub fn built_configs(&self) -> &[String] {
        &self.built_configs
    }

    fn write_tree(&self, config: &str) -> io::Result<()> {
        for output in self.outputs.files() {
            if self.omit.as_deref() == Some(output.path.as_path()) {
                continue;
            }
            let path = self.build_tree.join(&output.path);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&path, synthetic_image(&output.name, config))?;
        }
        // ESP-IDF regenerates sdkconfig from the defaults during a build
        fs::write(self.project_dir.join(BUILD_STATE_FILE), config)?;
        fs::write(self.build_tree.join("config.env"), config)
    }
}

impl Toolchain for ScriptedToolchain {
    fn run_clean(&mut self) -> Result<(), StepFailure> {
        self.calls.push(BuildStep::Clean);
        if let Some(failure) = self.injector.check(BuildStep::Clean) {
            return Err(failure);
        }
        match fs::remove_dir_all(&self.build_tree) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => {
                Err(StepFailure::Scripted(format!("fullclean: {}", e)))
            }
            _ => Ok(()),
        }
    }

    fn run_build(&mut self) -> Result<(), StepFailure> {
        self.calls.push(BuildStep::Build);
        if let Some(failure) = self.injector.check(BuildStep::Build) {
            return Err(failure);
        }

        if let Some((n, coordinator)) = &self.interrupt_on_build {
            if self.injector.calls(BuildStep::Build) == *n {
                coordinator.request_cancel();
                return Err(StepFailure::Signalled);
            }
        }

        let config = fs::read_to_string(self.project_dir.join(DEFAULTS_FILE))
            .map_err(|e| StepFailure::Scripted(format!("read {}: {}", DEFAULTS_FILE, e)))?;
        self.write_tree(&config)
            .map_err(|e| StepFailure::Scripted(format!("write build tree: {}", e)))?;
        self.built_configs.push(config);
        Ok(())
    }

    fn describe(&self) -> String {
        format!("scripted toolchain in {}", self.project_dir.display())
    }
}

/// Deterministic stand-in for a firmware image
pub fn synthetic_image(name: &str, config: &str) -> String {
    format!("{}\n{}", name, config)
}

/// Project layout with a base `sdkconfig.defaults`, for tests
pub fn seed_project(project_dir: &Path, base: &str) -> io::Result<PathBuf> {
    fs::create_dir_all(project_dir)?;
    let path = project_dir.join(DEFAULTS_FILE);
    fs::write(&path, base)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_successful_build_writes_outputs() {
        let dir = TempDir::new().unwrap();
        seed_project(dir.path(), "CONFIG_BASE=y\n").unwrap();
        let mut tc = ScriptedToolchain::new(dir.path(), BuildOutputSet::default());

        tc.run_clean().unwrap();
        tc.run_build().unwrap();

        for output in BuildOutputSet::default().files() {
            assert!(dir.path().join("build").join(&output.path).is_file());
        }
        assert_eq!(
            fs::read_to_string(dir.path().join("sdkconfig")).unwrap(),
            "CONFIG_BASE=y\n"
        );
        assert_eq!(tc.calls(), &[BuildStep::Clean, BuildStep::Build]);
        assert_eq!(tc.built_configs().len(), 1);
    }

    #[test]
    fn test_clean_removes_tree() {
        let dir = TempDir::new().unwrap();
        seed_project(dir.path(), "").unwrap();
        fs::create_dir_all(dir.path().join("build/stale")).unwrap();

        let mut tc = ScriptedToolchain::new(dir.path(), BuildOutputSet::default());
        tc.run_clean().unwrap();
        assert!(!dir.path().join("build").exists());
    }

    #[test]
    fn test_scripted_failure_on_second_build() {
        let dir = TempDir::new().unwrap();
        seed_project(dir.path(), "").unwrap();
        let mut tc = ScriptedToolchain::new(dir.path(), BuildOutputSet::default())
            .failing(BuildStep::Build, FailureConfig::exit_code(2).on_call(2));

        assert!(tc.run_build().is_ok());
        assert!(matches!(tc.run_build(), Err(StepFailure::ExitCode { code: 2 })));
        assert_eq!(tc.build_count(), 2);
    }

    #[test]
    fn test_omitting_output() {
        let dir = TempDir::new().unwrap();
        seed_project(dir.path(), "").unwrap();
        let mut tc =
            ScriptedToolchain::new(dir.path(), BuildOutputSet::default()).omitting("lorahub.bin");

        tc.run_build().unwrap();
        assert!(!dir.path().join("build/lorahub.bin").exists());
        assert!(dir.path().join("build/bootloader/bootloader.bin").exists());
    }

    #[test]
    fn test_interrupt_sets_cancel_flag() {
        let dir = TempDir::new().unwrap();
        seed_project(dir.path(), "").unwrap();
        let coordinator = CancellationCoordinator::detached();
        let mut tc = ScriptedToolchain::new(dir.path(), BuildOutputSet::default())
            .interrupting_build(1, coordinator.clone());

        assert!(matches!(tc.run_build(), Err(StepFailure::Signalled)));
        assert!(coordinator.is_cancelled());
    }
}
