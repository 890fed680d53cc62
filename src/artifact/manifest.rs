//! Export manifest (exports.json)
//!
//! Lists every file the matrix exported, with size and SHA-256, so a
//! flashing station can check it is writing what was built.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Schema version for exports.json
pub const SCHEMA_VERSION: u32 = 1;

/// Schema identifier
pub const SCHEMA_ID: &str = "lorahub-build/exports@1";

/// File name written into the export directory
pub const EXPORT_MANIFEST_FILE: &str = "exports.json";

/// One exported file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportedFile {
    /// Variant that produced the file
    pub variant: String,

    /// Canonical output name (without the variant prefix)
    pub name: String,

    /// Where the file was written
    pub path: PathBuf,

    /// Size in bytes
    pub size: u64,

    /// SHA-256 of the exported bytes
    pub sha256: String,
}

/// Export manifest (exports.json)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportManifest {
    pub schema_version: u32,

    pub schema_id: String,

    pub created_at: DateTime<Utc>,

    /// Run that produced the exports
    pub run_id: String,

    /// Exported files, in build order
    pub files: Vec<ExportedFile>,
}

impl ExportManifest {
    pub fn new(run_id: String, files: Vec<ExportedFile>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            schema_id: SCHEMA_ID.to_string(),
            created_at: Utc::now(),
            run_id,
            files,
        }
    }

    /// Files exported for one variant
    pub fn for_variant<'a>(&'a self, variant: &'a str) -> impl Iterator<Item = &'a ExportedFile> {
        self.files.iter().filter(move |f| f.variant == variant)
    }

    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Write as `exports.json` inside `export_dir`
    pub fn write_to_dir(&self, export_dir: &Path) -> io::Result<PathBuf> {
        let json = self.to_json().map_err(|e| {
            io::Error::new(io::ErrorKind::InvalidData, format!("JSON error: {}", e))
        })?;
        let path = export_dir.join(EXPORT_MANIFEST_FILE);
        fs::write(&path, json)?;
        Ok(path)
    }

    pub fn from_file(path: &Path) -> io::Result<Self> {
        let json = fs::read_to_string(path)?;
        serde_json::from_str(&json)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("JSON error: {}", e)))
    }
}
