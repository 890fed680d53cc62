//! Artifact archiving
//!
//! After a successful build, copies the build tree and the configuration
//! the toolchain actually used into variant-named locations, and optionally
//! exports the flashable images flat into an output directory:
//!
//! - `<archive>/build_<variant>/` full copy of the build tree
//! - `<archive>/sdkconfig.<variant>` configuration used for the build
//! - `<export>/<variant>_<canonical name>` per declared output
//!
//! The live build tree is only ever read.

mod manifest;

pub use manifest::{ExportManifest, ExportedFile, EXPORT_MANIFEST_FILE};

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// A file the build is expected to produce
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputFile {
    /// Path relative to the build tree root
    pub path: PathBuf,

    /// Name used when exporting, prefixed with `<variant>_`
    pub name: String,
}

impl OutputFile {
    pub fn new(path: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            name: name.into(),
        }
    }
}

/// Fixed set of outputs every variant build must produce
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildOutputSet {
    files: Vec<OutputFile>,
}

impl BuildOutputSet {
    pub fn new(files: Vec<OutputFile>) -> Self {
        Self { files }
    }

    pub fn files(&self) -> &[OutputFile] {
        &self.files
    }
}

impl Default for BuildOutputSet {
    /// Bootloader, partition table and application image of an ESP-IDF build
    fn default() -> Self {
        Self::new(vec![
            OutputFile::new("bootloader/bootloader.bin", "bootloader.bin"),
            OutputFile::new("partition_table/partition-table.bin", "partition-table.bin"),
            OutputFile::new("lorahub.bin", "lorahub.bin"),
        ])
    }
}

/// A declared output is missing after a build reported success
#[derive(Debug, thiserror::Error)]
#[error("variant '{variant}': declared output {} is missing", missing_path.display())]
pub struct ArtifactError {
    pub variant: String,
    pub missing_path: PathBuf,
}

/// Copying into the archive or export directory failed
#[derive(Debug, thiserror::Error)]
#[error("variant '{variant}': {context} {}: {source}", path.display())]
pub struct ArtifactCopyError {
    pub variant: String,
    pub context: &'static str,
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

/// Errors that abort archiving of a variant
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error(transparent)]
    Missing(#[from] ArtifactError),

    #[error(transparent)]
    Copy(#[from] ArtifactCopyError),
}

/// What archiving produced for one variant
#[derive(Debug, Clone, Default)]
pub struct ArchiveReport {
    /// `build_<variant>/`
    pub archive_dir: PathBuf,

    /// `sdkconfig.<variant>`
    pub config_copy: PathBuf,

    /// Files placed in the export directory
    pub exported: Vec<ExportedFile>,

    /// Non-fatal export problems
    pub warnings: Vec<String>,
}

/// Copies build outputs out of the shared build tree
#[derive(Debug, Clone)]
pub struct Archiver {
    outputs: BuildOutputSet,
    config_source: PathBuf,
}

impl Archiver {
    /// `config_source` is the configuration file the toolchain generated
    /// for the build (`sdkconfig`).
    pub fn new(outputs: BuildOutputSet, config_source: impl Into<PathBuf>) -> Self {
        Self {
            outputs,
            config_source: config_source.into(),
        }
    }

    pub fn outputs(&self) -> &BuildOutputSet {
        &self.outputs
    }

    /// Archive directory for a variant
    pub fn archive_dir(archive_root: &Path, variant: &str) -> PathBuf {
        archive_root.join(format!("build_{}", variant))
    }

    /// Archived configuration path for a variant
    pub fn config_copy_path(archive_root: &Path, variant: &str) -> PathBuf {
        archive_root.join(format!("sdkconfig.{}", variant))
    }

    /// Archive one variant's build.
    ///
    /// Declared outputs are checked before anything is copied, so a tree
    /// missing an output is never archived. Export failures other than a
    /// missing output are reported as warnings.
    pub fn archive(
        &self,
        variant: &str,
        build_tree: &Path,
        archive_root: &Path,
        export_dir: Option<&Path>,
    ) -> Result<ArchiveReport, ArchiveError> {
        self.verify_outputs(variant, build_tree)?;

        let archive_dir = Self::archive_dir(archive_root, variant);
        replace_tree(build_tree, &archive_dir).map_err(|(path, source)| ArtifactCopyError {
            variant: variant.to_string(),
            context: "cannot archive build tree to",
            path,
            source,
        })?;

        let config_copy = Self::config_copy_path(archive_root, variant);
        fs::copy(&self.config_source, &config_copy).map_err(|source| ArtifactCopyError {
            variant: variant.to_string(),
            context: "cannot archive build configuration",
            path: self.config_source.clone(),
            source,
        })?;

        info!(
            variant,
            archive = %archive_dir.display(),
            config = %config_copy.display(),
            "archived build"
        );

        let mut report = ArchiveReport {
            archive_dir,
            config_copy,
            ..ArchiveReport::default()
        };

        if let Some(export_dir) = export_dir {
            self.export(variant, build_tree, export_dir, &mut report);
        }

        Ok(report)
    }

    fn verify_outputs(&self, variant: &str, build_tree: &Path) -> Result<(), ArtifactError> {
        for output in self.outputs.files() {
            let path = build_tree.join(&output.path);
            if !path.is_file() {
                return Err(ArtifactError {
                    variant: variant.to_string(),
                    missing_path: path,
                });
            }
        }
        Ok(())
    }

    fn export(&self, variant: &str, build_tree: &Path, export_dir: &Path, report: &mut ArchiveReport) {
        if let Err(e) = fs::create_dir_all(export_dir) {
            let err = ArtifactCopyError {
                variant: variant.to_string(),
                context: "cannot create export directory",
                path: export_dir.to_path_buf(),
                source: e,
            };
            warn!(error = %err, "skipping export");
            report.warnings.push(err.to_string());
            return;
        }

        for output in self.outputs.files() {
            let src = build_tree.join(&output.path);
            let dest = export_dir.join(format!("{}_{}", variant, output.name));

            match copy_and_hash(&src, &dest) {
                Ok((size, sha256)) => {
                    debug!(variant, file = %dest.display(), size, "exported");
                    report.exported.push(ExportedFile {
                        variant: variant.to_string(),
                        name: output.name.clone(),
                        path: dest,
                        size,
                        sha256,
                    });
                }
                Err(e) => {
                    let err = ArtifactCopyError {
                        variant: variant.to_string(),
                        context: "cannot export",
                        path: dest,
                        source: e,
                    };
                    warn!(error = %err, "export failed");
                    report.warnings.push(err.to_string());
                }
            }
        }
    }
}

/// Copy `src` to `dest` and return the size and SHA-256 of what was written
fn copy_and_hash(src: &Path, dest: &Path) -> io::Result<(u64, String)> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(src, dest)?;

    let mut hasher = Sha256::new();
    let size = io::copy(&mut File::open(dest)?, &mut hasher)?;
    Ok((size, hex::encode(hasher.finalize())))
}

/// Replace `dest` with a fresh copy of `src`.
///
/// The copy is staged next to `dest` and swapped in, so an earlier archive
/// of the same variant is never merged with the new one.
fn replace_tree(src: &Path, dest: &Path) -> Result<(), (PathBuf, io::Error)> {
    let mut staging_name = dest.file_name().unwrap_or_default().to_os_string();
    staging_name.push(".partial");
    let staging = dest.with_file_name(staging_name);

    remove_dir_if_exists(&staging).map_err(|e| (staging.clone(), e))?;
    copy_tree(src, &staging)?;
    remove_dir_if_exists(dest).map_err(|e| (dest.to_path_buf(), e))?;
    fs::rename(&staging, dest).map_err(|e| (dest.to_path_buf(), e))
}

fn remove_dir_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_dir_all(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

fn copy_tree(src: &Path, dest: &Path) -> Result<(), (PathBuf, io::Error)> {
    fs::create_dir_all(dest).map_err(|e| (dest.to_path_buf(), e))?;

    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(src).to_path_buf();
            (path, io::Error::from(e))
        })?;
        let rel = match entry.path().strip_prefix(src) {
            Ok(rel) if !rel.as_os_str().is_empty() => rel,
            _ => continue,
        };
        let out = dest.join(rel);
        let file_type = entry.file_type();

        let result = if file_type.is_dir() {
            fs::create_dir_all(&out)
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &out)
        } else {
            fs::copy(entry.path(), &out).map(|_| ())
        };
        result.map_err(|e| (out, e))?;
    }

    Ok(())
}

#[cfg(unix)]
fn copy_symlink(src: &Path, dest: &Path) -> io::Result<()> {
    let target = fs::read_link(src)?;
    std::os::unix::fs::symlink(target, dest)
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, dest: &Path) -> io::Result<()> {
    fs::copy(src, dest).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        build: PathBuf,
        archive: PathBuf,
        sdkconfig: PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let build = dir.path().join("build");
        fs::create_dir_all(build.join("bootloader")).unwrap();
        fs::create_dir_all(build.join("partition_table")).unwrap();
        fs::create_dir_all(build.join("esp-idf/main")).unwrap();
        fs::write(build.join("bootloader/bootloader.bin"), b"boot").unwrap();
        fs::write(build.join("partition_table/partition-table.bin"), b"pt").unwrap();
        fs::write(build.join("lorahub.bin"), b"app-image").unwrap();
        fs::write(build.join("esp-idf/main/libmain.a"), b"lib").unwrap();

        let sdkconfig = dir.path().join("sdkconfig");
        fs::write(&sdkconfig, "CONFIG_GENERATED=y\n").unwrap();

        let archive = dir.path().join("archive");
        fs::create_dir_all(&archive).unwrap();

        Fixture {
            build,
            archive,
            sdkconfig,
            _dir: dir,
        }
    }

    fn archiver(f: &Fixture) -> Archiver {
        Archiver::new(BuildOutputSet::default(), &f.sdkconfig)
    }

    #[test]
    fn test_archive_copies_tree_and_config() {
        let f = fixture();
        let report = archiver(&f).archive("alpha", &f.build, &f.archive, None).unwrap();

        assert_eq!(report.archive_dir, f.archive.join("build_alpha"));
        assert!(f.archive.join("build_alpha/esp-idf/main/libmain.a").is_file());
        assert_eq!(
            fs::read(f.archive.join("build_alpha/lorahub.bin")).unwrap(),
            b"app-image"
        );
        assert_eq!(
            fs::read_to_string(f.archive.join("sdkconfig.alpha")).unwrap(),
            "CONFIG_GENERATED=y\n"
        );
        assert!(report.exported.is_empty());
        assert!(!f.archive.join("build_alpha.partial").exists());
    }

    #[test]
    fn test_rearchive_replaces_not_merges() {
        let f = fixture();
        let archiver = archiver(&f);
        archiver.archive("alpha", &f.build, &f.archive, None).unwrap();

        fs::remove_file(f.build.join("esp-idf/main/libmain.a")).unwrap();
        fs::write(f.build.join("lorahub.bin"), b"app-v2").unwrap();
        archiver.archive("alpha", &f.build, &f.archive, None).unwrap();

        assert!(!f.archive.join("build_alpha/esp-idf/main/libmain.a").exists());
        assert_eq!(
            fs::read(f.archive.join("build_alpha/lorahub.bin")).unwrap(),
            b"app-v2"
        );
    }

    #[test]
    fn test_variants_do_not_collide() {
        let f = fixture();
        let archiver = archiver(&f);
        archiver.archive("alpha", &f.build, &f.archive, None).unwrap();

        fs::write(f.build.join("lorahub.bin"), b"beta-image").unwrap();
        archiver.archive("beta", &f.build, &f.archive, None).unwrap();

        assert_eq!(
            fs::read(f.archive.join("build_alpha/lorahub.bin")).unwrap(),
            b"app-image"
        );
        assert_eq!(
            fs::read(f.archive.join("build_beta/lorahub.bin")).unwrap(),
            b"beta-image"
        );
    }

    #[test]
    fn test_export_renames_by_variant() {
        let f = fixture();
        let export = f.archive.join("out/nested");
        let report = archiver(&f)
            .archive("alpha", &f.build, &f.archive, Some(&export))
            .unwrap();

        for name in ["bootloader.bin", "partition-table.bin", "lorahub.bin"] {
            assert!(export.join(format!("alpha_{}", name)).is_file(), "{}", name);
        }
        assert_eq!(report.exported.len(), 3);
        assert!(report.warnings.is_empty());

        let app = report
            .exported
            .iter()
            .find(|e| e.name == "lorahub.bin")
            .unwrap();
        assert_eq!(app.size, 9);
        let expected = hex::encode(Sha256::digest(b"app-image"));
        assert_eq!(app.sha256, expected);
    }

    #[test]
    fn test_missing_output_is_artifact_error() {
        let f = fixture();
        fs::remove_file(f.build.join("partition_table/partition-table.bin")).unwrap();
        let export = f.archive.join("out");

        let err = archiver(&f)
            .archive("alpha", &f.build, &f.archive, Some(&export))
            .unwrap_err();

        match err {
            ArchiveError::Missing(e) => {
                assert_eq!(e.variant, "alpha");
                assert_eq!(
                    e.missing_path,
                    f.build.join("partition_table/partition-table.bin")
                );
            }
            other => panic!("unexpected error: {}", other),
        }
        assert!(!f.archive.join("build_alpha").exists());
        assert!(!export.exists());
    }

    #[test]
    fn test_missing_config_is_copy_error() {
        let f = fixture();
        fs::remove_file(&f.sdkconfig).unwrap();
        let err = archiver(&f).archive("alpha", &f.build, &f.archive, None).unwrap_err();
        assert!(matches!(err, ArchiveError::Copy(_)));
    }

    #[test]
    fn test_uncreatable_export_dir_is_warning() {
        let f = fixture();
        // A regular file where the export directory should go
        let blocker = f.archive.join("blocker");
        fs::write(&blocker, b"").unwrap();
        let export = blocker.join("out");

        let report = archiver(&f)
            .archive("alpha", &f.build, &f.archive, Some(&export))
            .unwrap();

        assert!(f.archive.join("build_alpha").is_dir());
        assert!(report.exported.is_empty());
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].contains("export directory"));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_copied_as_links() {
        let f = fixture();
        std::os::unix::fs::symlink("lorahub.bin", f.build.join("app.bin")).unwrap();
        archiver(&f).archive("alpha", &f.build, &f.archive, None).unwrap();

        let link = f.archive.join("build_alpha/app.bin");
        assert!(fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
        assert_eq!(fs::read_link(&link).unwrap(), PathBuf::from("lorahub.bin"));
    }
}
