//! Flashing an exported image set with esptool
//!
//! The build matrix exports `<variant>_bootloader.bin`,
//! `<variant>_lorahub.bin` and `<variant>_partition-table.bin`. This crate
//! turns such a prefix into a single `esptool.py write_flash` invocation.
//! All three files must exist before the tool is spawned.

use std::io;
use std::path::PathBuf;
use std::process::Command;

use tracing::{debug, info};

/// Default flashing tool
pub const DEFAULT_PROGRAM: &str = "esptool.py";

/// Target chip
pub const CHIP: &str = "esp32s3";

/// Default serial baud rate
pub const DEFAULT_BAUD: u32 = 460_800;

/// Flash offset and file suffix for one image, in write order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageSlot {
    pub offset: u32,
    pub suffix: &'static str,
    pub label: &'static str,
}

/// Images written by every flash, in argument order
pub const IMAGE_SLOTS: [ImageSlot; 3] = [
    ImageSlot {
        offset: 0x0,
        suffix: "bootloader.bin",
        label: "Bootloader",
    },
    ImageSlot {
        offset: 0x10000,
        suffix: "lorahub.bin",
        label: "LoraHub",
    },
    ImageSlot {
        offset: 0x8000,
        suffix: "partition-table.bin",
        label: "Partition Table",
    },
];

/// One file to write at one offset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashImage {
    pub slot: ImageSlot,
    pub path: PathBuf,
}

impl FlashImage {
    /// Offset as esptool expects it (`0x0`, `0x10000`, ...)
    pub fn address(&self) -> String {
        format!("{:#x}", self.slot.offset)
    }
}

/// Errors raised while flashing
#[derive(Debug, thiserror::Error)]
pub enum FlashError {
    #[error("missing image file(s): {}", display_paths(.paths))]
    MissingFiles { paths: Vec<PathBuf> },

    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("`{program}` exited with status {code}")]
    ToolFailed { program: String, code: i32 },

    #[error("`{program}` terminated by signal")]
    Signalled { program: String },
}

impl FlashError {
    /// Process exit code for the flasher binary
    pub fn exit_code(&self) -> i32 {
        match self {
            FlashError::MissingFiles { .. } => 1,
            FlashError::Spawn { .. } => 1,
            FlashError::ToolFailed { code, .. } if *code > 0 => *code,
            FlashError::ToolFailed { .. } | FlashError::Signalled { .. } => 1,
        }
    }
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// A fully resolved esptool invocation
#[derive(Debug, Clone)]
pub struct FlashPlan {
    program: String,
    port: String,
    baud: u32,
    images: Vec<FlashImage>,
}

impl FlashPlan {
    /// Plan for the image set exported under `prefix`
    ///
    /// `prefix` may carry a directory, e.g. `out/heltec_v3`.
    pub fn for_prefix(prefix: &str, port: impl Into<String>) -> Self {
        let images = IMAGE_SLOTS
            .iter()
            .map(|slot| FlashImage {
                slot: *slot,
                path: PathBuf::from(format!("{}_{}", prefix, slot.suffix)),
            })
            .collect();

        Self {
            program: DEFAULT_PROGRAM.to_string(),
            port: port.into(),
            baud: DEFAULT_BAUD,
            images,
        }
    }

    pub fn with_baud(mut self, baud: u32) -> Self {
        self.baud = baud;
        self
    }

    /// Use a different esptool executable
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn images(&self) -> &[FlashImage] {
        &self.images
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    pub fn baud(&self) -> u32 {
        self.baud
    }

    /// Arguments passed to the program, in order
    pub fn args(&self) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "--chip".into(),
            CHIP.into(),
            "-p".into(),
            self.port.clone(),
            "-b".into(),
            self.baud.to_string(),
            "--before=default_reset".into(),
            "--after=hard_reset".into(),
            "write_flash".into(),
            "--flash_mode".into(),
            "dio".into(),
            "--flash_freq".into(),
            "80m".into(),
            "--flash_size".into(),
            "2MB".into(),
        ];
        for image in &self.images {
            args.push(image.address());
            args.push(image.path.to_string_lossy().into_owned());
        }
        args
    }

    /// Program followed by its arguments
    pub fn argv(&self) -> Vec<String> {
        let mut argv = vec![self.program.clone()];
        argv.extend(self.args());
        argv
    }

    /// Space-joined command line for display
    pub fn command_line(&self) -> String {
        self.argv().join(" ")
    }

    /// Image files that do not exist
    pub fn missing(&self) -> Vec<PathBuf> {
        self.images
            .iter()
            .filter(|image| !image.path.is_file())
            .map(|image| image.path.clone())
            .collect()
    }

    /// Fail if any image file is absent
    pub fn verify(&self) -> Result<(), FlashError> {
        let paths = self.missing();
        if paths.is_empty() {
            Ok(())
        } else {
            Err(FlashError::MissingFiles { paths })
        }
    }

    /// Verify the images, then run esptool with inherited stdio
    pub fn execute(&self) -> Result<(), FlashError> {
        self.verify()?;

        info!(command = %self.command_line(), "flashing");
        let status = Command::new(&self.program)
            .args(self.args())
            .status()
            .map_err(|source| FlashError::Spawn {
                program: self.program.clone(),
                source,
            })?;
        debug!(?status, "esptool finished");

        if status.success() {
            return Ok(());
        }
        Err(match status.code() {
            Some(code) => FlashError::ToolFailed {
                program: self.program.clone(),
                code,
            },
            None => FlashError::Signalled {
                program: self.program.clone(),
            },
        })
    }
}
