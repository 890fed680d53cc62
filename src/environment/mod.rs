//! Build environment controller
//!
//! Owns the one mutable resource the matrix shares across variants: the
//! active `sdkconfig.defaults` file the toolchain reads. The only mutating
//! operations are [`BuildEnvironment::snapshot_base`],
//! [`BuildEnvironment::activate`] and [`BuildEnvironment::restore_base`].
//!
//! Layout inside the project directory:
//! - `sdkconfig.defaults`: active configuration
//! - `sdkconfig.defaults.base`: backup of the base taken at snapshot time
//! - `sdkconfig`: toolchain build state, cleared on every activation
//! - `sdkconfig.defaults.<variant>`: record of each composed configuration

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::variant::ConfigVariant;

/// Active configuration file name
pub const DEFAULTS_FILE: &str = "sdkconfig.defaults";

/// Backup of the base configuration
pub const BACKUP_FILE: &str = "sdkconfig.defaults.base";

/// Toolchain-generated build state (cached configuration decisions)
pub const BUILD_STATE_FILE: &str = "sdkconfig";

/// Environment errors. All of them are fatal to a run.
#[derive(Debug, thiserror::Error)]
pub enum EnvironmentError {
    #[error("cannot read base configuration {}: {source}", path.display())]
    ReadBase {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot clear build state {}: {source}", path.display())]
    ClearState {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("base configuration already captured")]
    AlreadyCaptured,

    #[error("base configuration has not been captured")]
    NotCaptured,

    #[error("active configuration {} does not match the captured base", path.display())]
    BaseMismatch { path: PathBuf },

    #[error("variant '{variant}' would overwrite {}", path.display())]
    ReservedPath { variant: String, path: PathBuf },
}

/// File locations the controller operates on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentPaths {
    /// The configuration the toolchain reads
    pub active_config: PathBuf,

    /// Where the base configuration is backed up
    pub backup: PathBuf,

    /// Toolchain build-state file cleared before each build
    pub build_state: PathBuf,

    /// Directory receiving `sdkconfig.defaults.<variant>` records
    pub record_dir: PathBuf,
}

impl EnvironmentPaths {
    /// Standard ESP-IDF layout rooted at `project_dir`
    pub fn in_project(project_dir: &Path) -> Self {
        Self {
            active_config: project_dir.join(DEFAULTS_FILE),
            backup: project_dir.join(BACKUP_FILE),
            build_state: project_dir.join(BUILD_STATE_FILE),
            record_dir: project_dir.to_path_buf(),
        }
    }

    /// Path of the composed-configuration record for a variant
    pub fn record_path(&self, variant_name: &str) -> PathBuf {
        self.record_dir
            .join(format!("{}.{}", DEFAULTS_FILE, variant_name))
    }

    /// Whether `path` is one of the files the controller itself manages
    pub fn is_reserved(&self, path: &Path) -> bool {
        path == self.active_config || path == self.backup || path == self.build_state
    }
}

/// The configuration captured at the start of a run
#[derive(Debug, Clone)]
pub struct BaseConfiguration {
    content: Arc<str>,

    /// When the snapshot was taken
    pub captured_at: DateTime<Utc>,

    /// SHA-256 of the captured bytes
    pub sha256: String,
}

impl BaseConfiguration {
    fn new(content: String) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        Self {
            content: Arc::from(content),
            captured_at: Utc::now(),
            sha256: hex::encode(hasher.finalize()),
        }
    }

    pub fn content(&self) -> &str {
        &self.content
    }
}

/// Enough state to put the base configuration back without the controller.
///
/// Handed to the interrupt handler and to [`BaseGuard`].
#[derive(Debug, Clone)]
pub struct RestorePoint {
    path: PathBuf,
    content: Arc<str>,
}

impl RestorePoint {
    /// Write the base content back to the active configuration path
    pub fn restore(&self) -> Result<(), EnvironmentError> {
        write_atomic(&self.path, &self.content)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Restores the base configuration when dropped.
///
/// Covers early returns and unwinding out of the orchestration loop.
/// Restoring is idempotent, so an explicit restore followed by the drop
/// is harmless.
#[derive(Debug)]
pub struct BaseGuard {
    point: RestorePoint,
}

impl BaseGuard {
    pub fn new(point: RestorePoint) -> Self {
        Self { point }
    }
}

impl Drop for BaseGuard {
    fn drop(&mut self) {
        if let Err(e) = self.point.restore() {
            warn!(error = %e, "failed to restore base configuration on scope exit");
        }
    }
}

/// Result of activating a variant
#[derive(Debug, Clone)]
pub struct Activation {
    /// Variant that was activated
    pub variant: String,

    /// Where the composed configuration was recorded
    pub record_path: PathBuf,

    /// Whether a stale build-state file was removed
    pub cleared_build_state: bool,
}

/// Controller over the shared active configuration
#[derive(Debug)]
pub struct BuildEnvironment {
    paths: EnvironmentPaths,
    base: Option<BaseConfiguration>,
}

impl BuildEnvironment {
    pub fn new(paths: EnvironmentPaths) -> Self {
        Self { paths, base: None }
    }

    pub fn paths(&self) -> &EnvironmentPaths {
        &self.paths
    }

    /// The captured base, if [`Self::snapshot_base`] has run
    pub fn base(&self) -> Option<&BaseConfiguration> {
        self.base.as_ref()
    }

    /// Capture the on-disk configuration as the run's base.
    ///
    /// Also writes the backup copy. May only succeed once per controller.
    pub fn snapshot_base(&mut self) -> Result<&BaseConfiguration, EnvironmentError> {
        if self.base.is_some() {
            return Err(EnvironmentError::AlreadyCaptured);
        }

        let content = fs::read_to_string(&self.paths.active_config).map_err(|source| {
            EnvironmentError::ReadBase {
                path: self.paths.active_config.clone(),
                source,
            }
        })?;

        write_atomic(&self.paths.backup, &content)?;

        let base = BaseConfiguration::new(content);
        info!(
            path = %self.paths.active_config.display(),
            sha256 = %base.sha256,
            "captured base configuration"
        );
        Ok(&*self.base.insert(base))
    }

    /// Base content followed by the variant fragment, verbatim
    pub fn compose(&self, variant: &ConfigVariant) -> Result<String, EnvironmentError> {
        let base = self.base.as_ref().ok_or(EnvironmentError::NotCaptured)?;
        let mut composed = String::with_capacity(base.content.len() + variant.fragment.len());
        composed.push_str(&base.content);
        composed.push_str(&variant.fragment);
        Ok(composed)
    }

    /// Make `variant` the active configuration.
    ///
    /// Writes the composed text to the record file and the active path, and
    /// removes the toolchain build-state file so the next build cannot reuse
    /// decisions made for another variant.
    pub fn activate(&self, variant: &ConfigVariant) -> Result<Activation, EnvironmentError> {
        let composed = self.compose(variant)?;

        let record_path = self.paths.record_path(&variant.name);
        if self.paths.is_reserved(&record_path) {
            return Err(EnvironmentError::ReservedPath {
                variant: variant.name.clone(),
                path: record_path,
            });
        }
        write_atomic(&record_path, &composed)?;
        write_atomic(&self.paths.active_config, &composed)?;

        let cleared_build_state = match fs::remove_file(&self.paths.build_state) {
            Ok(()) => true,
            Err(e) if e.kind() == io::ErrorKind::NotFound => false,
            Err(source) => {
                return Err(EnvironmentError::ClearState {
                    path: self.paths.build_state.clone(),
                    source,
                })
            }
        };

        debug!(
            variant = %variant.name,
            record = %record_path.display(),
            cleared_build_state,
            "activated variant configuration"
        );

        Ok(Activation {
            variant: variant.name.clone(),
            record_path,
            cleared_build_state,
        })
    }

    /// Write the base back to the active path.
    ///
    /// Idempotent. A no-op when no base has been captured yet, since
    /// nothing can have been changed.
    pub fn restore_base(&self) -> Result<(), EnvironmentError> {
        match self.restore_point() {
            Some(point) => {
                point.restore()?;
                debug!(path = %point.path().display(), "restored base configuration");
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Confirm the active file holds exactly the base content
    pub fn verify_base(&self) -> Result<(), EnvironmentError> {
        let base = self.base.as_ref().ok_or(EnvironmentError::NotCaptured)?;
        let on_disk = fs::read_to_string(&self.paths.active_config).map_err(|source| {
            EnvironmentError::ReadBase {
                path: self.paths.active_config.clone(),
                source,
            }
        })?;
        if on_disk.as_str() != base.content() {
            return Err(EnvironmentError::BaseMismatch {
                path: self.paths.active_config.clone(),
            });
        }
        Ok(())
    }

    pub fn restore_point(&self) -> Option<RestorePoint> {
        self.base.as_ref().map(|base| RestorePoint {
            path: self.paths.active_config.clone(),
            content: Arc::clone(&base.content),
        })
    }
}

/// Copy the backup over the active configuration.
///
/// Recovery path for runs killed without a chance to clean up.
pub fn recover_from_backup(paths: &EnvironmentPaths) -> Result<(), EnvironmentError> {
    let content =
        fs::read_to_string(&paths.backup).map_err(|source| EnvironmentError::ReadBase {
            path: paths.backup.clone(),
            source,
        })?;
    write_atomic(&paths.active_config, &content)?;
    info!(
        from = %paths.backup.display(),
        to = %paths.active_config.display(),
        "recovered configuration from backup"
    );
    Ok(())
}

/// Per-process counter keeping concurrent writers on separate temp files
static TEMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Staging path for one write to `path`.
///
/// Unique per writer (pid plus counter), so the interrupt handler and the
/// main thread never rename each other's content into place. The leading
/// dot keeps it disjoint from `sdkconfig.defaults.<variant>` records.
fn temp_path_for(path: &Path) -> PathBuf {
    let seq = TEMP_SEQ.fetch_add(1, Ordering::Relaxed);
    let mut temp_name = std::ffi::OsString::from(".");
    temp_name.push(path.file_name().unwrap_or_default());
    temp_name.push(format!(".{}.{}.tmp", process::id(), seq));
    path.with_file_name(temp_name)
}

/// Write-then-rename so a reader never sees a half-written configuration
fn write_atomic(path: &Path, content: &str) -> Result<(), EnvironmentError> {
    let write_err = |source| EnvironmentError::Write {
        path: path.to_path_buf(),
        source,
    };

    let temp_path = temp_path_for(path);

    fs::write(&temp_path, content).map_err(write_err)?;
    fs::rename(&temp_path, path).map_err(|source| {
        let _ = fs::remove_file(&temp_path);
        write_err(source)
    })
}
