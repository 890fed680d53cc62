//! Matrix orchestration
//!
//! Drives every selected variant through
//! Activate → Build → Archive → Restore, in registry order:
//! - The base configuration is captured once, before the first variant
//! - It is written back after every variant, whatever happened
//! - The first failing variant stops the run; the rest are skipped
//! - An interrupt stops the run at the next phase boundary
//!
//! Run state goes to `matrix_state.json` and the summary to
//! `matrix_summary.json`, both in the archive root.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::artifact::{ArchiveError, ArchiveReport, ArtifactCopyError, ArtifactError, Archiver, ExportManifest, ExportedFile};
use crate::config::ConfigError;
use crate::environment::{BaseGuard, BuildEnvironment, EnvironmentError};
use crate::signal::CancellationCoordinator;
use crate::state::{RunStateData, RunStateError, VariantPhase, VariantStateData};
use crate::summary::{ExitCode, FailureKind, MatrixSummary, VariantOutcome, SUMMARY_FILE};
use crate::toolchain::{self, BuildError, BuildReport, Toolchain};
use crate::variant::{ConfigVariant, RegistryError, VariantRegistry};

/// Matrix errors
#[derive(Debug, Error)]
pub enum MatrixError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("variant selection error: {0}")]
    Registry(#[from] RegistryError),

    #[error("environment error: {0}")]
    Environment(#[from] EnvironmentError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    #[error(transparent)]
    ArtifactCopy(#[from] ArtifactCopyError),

    #[error("cannot create archive directory {}: {source}", path.display())]
    ArchiveRoot {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("state error: {0}")]
    State(#[from] RunStateError),

    #[error("cancelled at variant '{variant}'")]
    Cancelled { variant: String },

    #[error("variant '{variant}' would write {}, which the build itself uses", path.display())]
    PathCollision { variant: String, path: PathBuf },
}

impl MatrixError {
    pub fn exit_code(&self) -> i32 {
        self.failure_kind().exit_code().as_i32()
    }

    pub fn failure_kind(&self) -> FailureKind {
        match self {
            MatrixError::Config(_) | MatrixError::Registry(_) | MatrixError::PathCollision { .. } => {
                FailureKind::Config
            }
            MatrixError::Environment(_) | MatrixError::State(_) => FailureKind::Environment,
            MatrixError::Build(_) => FailureKind::Build,
            MatrixError::Artifact(_) | MatrixError::ArtifactCopy(_) | MatrixError::ArchiveRoot { .. } => {
                FailureKind::Artifacts
            }
            MatrixError::Cancelled { .. } => FailureKind::Cancelled,
        }
    }
}

impl From<ArchiveError> for MatrixError {
    fn from(e: ArchiveError) -> Self {
        match e {
            ArchiveError::Missing(e) => MatrixError::Artifact(e),
            ArchiveError::Copy(e) => MatrixError::ArtifactCopy(e),
        }
    }
}

/// Result type for matrix operations
pub type MatrixResult<T> = Result<T, MatrixError>;

/// Where a run reads and writes
#[derive(Debug, Clone)]
pub struct MatrixOptions {
    /// Toolchain build tree (`<project>/build`)
    pub build_tree: PathBuf,

    /// Receives `build_<variant>/`, `sdkconfig.<variant>` and run files
    pub archive_root: PathBuf,

    /// Flat directory for `<variant>_<name>` copies
    pub export_dir: Option<PathBuf>,
}

/// Outcome of a run that got past Init
#[derive(Debug)]
pub struct MatrixReport {
    pub summary: MatrixSummary,

    /// The error that stopped the run, if any
    pub error: Option<MatrixError>,

    /// `exports.json`, when anything was exported
    pub manifest_path: Option<PathBuf>,

    /// Total bytes listed in `exports.json`
    pub exported_bytes: u64,
}

impl MatrixReport {
    pub fn exit_code(&self) -> i32 {
        self.summary.exit_code
    }

    pub fn is_success(&self) -> bool {
        self.summary.exit_code == ExitCode::Success.as_i32()
    }
}

/// One variant in a dry-run plan
#[derive(Debug, Clone, Serialize)]
pub struct PlannedVariant {
    pub name: String,
    pub record_path: PathBuf,
    pub archive_dir: PathBuf,
    pub config_copy: PathBuf,
    pub exports: Vec<PathBuf>,
}

/// What a run would do, without doing it
#[derive(Debug, Clone, Serialize)]
pub struct MatrixPlan {
    pub active_config: PathBuf,
    pub backup: PathBuf,
    pub build_tree: PathBuf,
    pub commands: String,
    pub variants: Vec<PlannedVariant>,
}

impl MatrixPlan {
    pub fn render(&self) -> String {
        let mut out = format!(
            "config:  {} (backup: {})\nbuild:   {}\ncommand: {}\n",
            self.active_config.display(),
            self.backup.display(),
            self.build_tree.display(),
            self.commands
        );
        for (i, v) in self.variants.iter().enumerate() {
            out.push_str(&format!("{}. {}\n", i + 1, v.name));
            out.push_str(&format!("     record  {}\n", v.record_path.display()));
            out.push_str(&format!("     archive {}\n", v.archive_dir.display()));
            out.push_str(&format!("     config  {}\n", v.config_copy.display()));
            for export in &v.exports {
                out.push_str(&format!("     export  {}\n", export.display()));
            }
        }
        out
    }
}

/// Sequential, fail-fast build matrix
pub struct MatrixPipeline {
    registry: VariantRegistry,
    environment: BuildEnvironment,
    archiver: Archiver,
    options: MatrixOptions,
    cancellation: CancellationCoordinator,
}

impl MatrixPipeline {
    pub fn new(
        registry: VariantRegistry,
        environment: BuildEnvironment,
        archiver: Archiver,
        options: MatrixOptions,
    ) -> Self {
        Self {
            registry,
            environment,
            archiver,
            options,
            cancellation: CancellationCoordinator::detached(),
        }
    }

    /// Observe (and arm) the given signal state instead of a private one
    pub fn with_cancellation(mut self, cancellation: CancellationCoordinator) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn registry(&self) -> &VariantRegistry {
        &self.registry
    }

    pub fn environment(&self) -> &BuildEnvironment {
        &self.environment
    }

    /// Refuse variants whose record, archive or configuration copy would
    /// land on a file the run reads or maintains.
    pub fn check_layout(&self) -> MatrixResult<()> {
        let paths = self.environment.paths();
        let root = &self.options.archive_root;
        for variant in self.registry.iter() {
            let targets = [
                paths.record_path(&variant.name),
                Archiver::archive_dir(root, &variant.name),
                Archiver::config_copy_path(root, &variant.name),
            ];
            for target in targets {
                if paths.is_reserved(&target) || target == self.options.build_tree {
                    return Err(MatrixError::PathCollision {
                        variant: variant.name.clone(),
                        path: target,
                    });
                }
            }
        }
        Ok(())
    }

    /// Dry-run: compute every path and command without touching anything
    pub fn plan<T: Toolchain + ?Sized>(&self, toolchain: &T) -> MatrixPlan {
        let paths = self.environment.paths();
        let root = &self.options.archive_root;
        let variants = self
            .registry
            .iter()
            .map(|v| PlannedVariant {
                name: v.name.clone(),
                record_path: paths.record_path(&v.name),
                archive_dir: Archiver::archive_dir(root, &v.name),
                config_copy: Archiver::config_copy_path(root, &v.name),
                exports: match &self.options.export_dir {
                    Some(dir) => self
                        .archiver
                        .outputs()
                        .files()
                        .iter()
                        .map(|o| dir.join(format!("{}_{}", v.name, o.name)))
                        .collect(),
                    None => Vec::new(),
                },
            })
            .collect();

        MatrixPlan {
            active_config: paths.active_config.clone(),
            backup: paths.backup.clone(),
            build_tree: self.options.build_tree.clone(),
            commands: toolchain.describe(),
            variants,
        }
    }

    /// Run the whole matrix.
    ///
    /// Returns `Err` only when the run could not start (path collision,
    /// archive root or base snapshot). Variant failures and cancellation are
    /// reported in the returned summary, with the stopping error attached.
    pub fn run<T: Toolchain + ?Sized>(&mut self, toolchain: &mut T) -> MatrixResult<MatrixReport> {
        self.check_layout()?;

        let start_time = Instant::now();
        let run_id = ulid::Ulid::new().to_string().to_lowercase();
        let root = self.options.archive_root.clone();

        fs::create_dir_all(&root).map_err(|source| MatrixError::ArchiveRoot {
            path: root.clone(),
            source,
        })?;

        let mut run_state = RunStateData::new(run_id.clone(), self.registry.len());
        persist(&run_state, &root);

        // Init
        if let Err(e) = self.environment.snapshot_base() {
            error!(error = %e, "cannot capture base configuration, nothing was built");
            run_state.abort()?;
            persist(&run_state, &root);
            return Err(e.into());
        }
        let restore_point = self
            .environment
            .restore_point()
            .ok_or(EnvironmentError::NotCaptured)?;
        self.cancellation.arm(restore_point.clone());
        let _guard = BaseGuard::new(restore_point);

        run_state.start()?;
        persist(&run_state, &root);
        info!(run_id = %run_id, variants = self.registry.len(), "starting build matrix");

        let mut outcomes = Vec::with_capacity(self.registry.len());
        let mut exported: Vec<ExportedFile> = Vec::new();
        let mut stop: Option<MatrixError> = None;

        for (index, variant) in self.registry.iter().enumerate() {
            if stop.is_some() {
                debug!(variant = %variant.name, "skipped");
                outcomes.push(VariantOutcome::skipped(&variant.name, index));
                continue;
            }

            if self.cancellation.is_cancelled() {
                outcomes.push(VariantOutcome::cancelled(&variant.name, index, VariantPhase::Pending, 0));
                stop = Some(MatrixError::Cancelled {
                    variant: variant.name.clone(),
                });
                continue;
            }

            let (outcome, err) = self.run_variant(index, variant, toolchain, &mut run_state, &mut exported);
            outcomes.push(outcome);
            stop = err;
        }

        // Done: the base must be what is on disk now
        let mut base_ok = true;
        if let Err(e) = self.environment.restore_base().and_then(|_| self.environment.verify_base()) {
            error!(error = %e, "base configuration could not be confirmed");
            base_ok = false;
            if stop.is_none() {
                stop = Some(e.into());
            }
        }
        self.cancellation.disarm();

        match &stop {
            None => run_state.complete()?,
            Some(MatrixError::Cancelled { .. }) => run_state.cancel()?,
            Some(_) => run_state.abort()?,
        }
        persist(&run_state, &root);

        let mut summary =
            MatrixSummary::from_outcomes(run_id.clone(), outcomes, start_time.elapsed().as_millis() as u64);
        if !base_ok {
            summary = summary.with_base_unverified();
        }
        if let Err(e) = summary.write_to_file(&root.join(SUMMARY_FILE)) {
            warn!(error = %e, "cannot write {}", SUMMARY_FILE);
        }

        let (manifest_path, exported_bytes) = match self.write_manifest(&run_id, exported) {
            Some((path, bytes)) => (Some(path), bytes),
            None => (None, 0),
        };

        info!(status = ?summary.status, "{}", summary.human_summary);

        Ok(MatrixReport {
            summary,
            error: stop,
            manifest_path,
            exported_bytes,
        })
    }

    /// Activate, build, archive, then always restore
    fn run_variant<T: Toolchain + ?Sized>(
        &self,
        index: usize,
        variant: &ConfigVariant,
        toolchain: &mut T,
        run_state: &mut RunStateData,
        exported: &mut Vec<ExportedFile>,
    ) -> (VariantOutcome, Option<MatrixError>) {
        let started = Instant::now();
        let root = &self.options.archive_root;
        let mut vs = VariantStateData::new(variant.name.clone(), index);

        info!(variant = %variant.name, index, "variant start");
        let result = self.drive(variant, toolchain, &mut vs, run_state);

        // Restore
        let mut failed_phase = vs.phase;
        if result.is_ok() {
            vs.advance(VariantPhase::Restore);
        } else {
            vs.fail_current();
        }
        run_state.set_current(index, &variant.name, vs.phase);
        persist(run_state, root);

        let result = match (result, self.environment.restore_base()) {
            (Ok(reports), Ok(())) => Ok(reports),
            (Ok(_), Err(e)) => {
                vs.failed_in = Some(VariantPhase::Restore);
                failed_phase = VariantPhase::Restore;
                Err(MatrixError::from(e))
            }
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(restore)) => {
                error!(variant = %variant.name, error = %restore, "cannot restore base configuration");
                Err(e)
            }
        };
        vs.finish();

        let duration_ms = started.elapsed().as_millis() as u64;
        match result {
            Ok((build, archive)) => {
                info!(variant = %variant.name, duration_ms, "variant complete");
                exported.extend(archive.exported.iter().cloned());
                let outcome = VariantOutcome::success(
                    &variant.name,
                    index,
                    duration_ms,
                    build.total_ms(),
                    archive.archive_dir,
                )
                .with_exports(archive.exported.len(), archive.warnings);
                (outcome, None)
            }
            Err(e @ MatrixError::Cancelled { .. }) => {
                warn!(variant = %variant.name, phase = ?failed_phase, "cancelled");
                (
                    VariantOutcome::cancelled(&variant.name, index, failed_phase, duration_ms),
                    Some(e),
                )
            }
            Err(e) => {
                error!(variant = %variant.name, phase = ?failed_phase, error = %e, "variant failed");
                let outcome = VariantOutcome::failure(
                    &variant.name,
                    index,
                    e.failure_kind(),
                    failed_phase,
                    e.to_string(),
                    duration_ms,
                );
                (outcome, Some(e))
            }
        }
    }

    fn drive<T: Toolchain + ?Sized>(
        &self,
        variant: &ConfigVariant,
        tc: &mut T,
        vs: &mut VariantStateData,
        run_state: &mut RunStateData,
    ) -> MatrixResult<(BuildReport, ArchiveReport)> {
        let root = &self.options.archive_root;

        self.enter(vs, run_state, VariantPhase::Activate);
        let activation = self.environment.activate(variant)?;
        debug!(record = %activation.record_path.display(), "configuration activated");

        self.check_cancelled(variant)?;
        self.enter(vs, run_state, VariantPhase::Build);
        let build = toolchain::build(tc, variant).map_err(|e| {
            // A child killed by the same SIGINT reports as a build failure
            if self.cancellation.is_cancelled() {
                MatrixError::Cancelled {
                    variant: variant.name.clone(),
                }
            } else {
                MatrixError::Build(e)
            }
        })?;

        self.check_cancelled(variant)?;
        self.enter(vs, run_state, VariantPhase::Archive);
        let archive = self.archiver.archive(
            &variant.name,
            &self.options.build_tree,
            root,
            self.options.export_dir.as_deref(),
        )?;

        Ok((build, archive))
    }

    fn enter(&self, vs: &mut VariantStateData, run_state: &mut RunStateData, phase: VariantPhase) {
        if !vs.advance(phase) {
            warn!(variant = %vs.name, from = ?vs.phase, to = ?phase, "unexpected phase transition");
        }
        run_state.set_current(vs.index, &vs.name, phase);
        persist(run_state, &self.options.archive_root);
    }

    fn check_cancelled(&self, variant: &ConfigVariant) -> MatrixResult<()> {
        if self.cancellation.is_cancelled() {
            return Err(MatrixError::Cancelled {
                variant: variant.name.clone(),
            });
        }
        Ok(())
    }

    fn write_manifest(&self, run_id: &str, exported: Vec<ExportedFile>) -> Option<(PathBuf, u64)> {
        let dir = self.options.export_dir.as_ref()?;
        if exported.is_empty() {
            return None;
        }
        let manifest = ExportManifest::new(run_id.to_string(), exported);
        let bytes = manifest.total_size();
        match manifest.write_to_dir(dir) {
            Ok(path) => {
                debug!(files = manifest.files.len(), bytes, "wrote export manifest");
                Some((path, bytes))
            }
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "cannot write export manifest");
                None
            }
        }
    }
}

/// State file writes are diagnostic; a failure is logged, not fatal
fn persist(state: &RunStateData, root: &Path) {
    if let Err(e) = state.write_to_dir(root) {
        warn!(error = %e, "cannot write run state");
    }
}
