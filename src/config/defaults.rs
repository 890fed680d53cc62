//! Built-in defaults (layer 1)
//!
//! Hardcoded defaults for all configuration values.

use serde::{Deserialize, Serialize};

/// Built-in default configuration values
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuiltinDefaults {
    /// ESP-IDF project root (default: current directory)
    pub project_dir: String,

    /// Build tree, relative to the project (default: "build")
    pub build_dir: String,

    /// Toolchain program (default: "idf.py")
    pub program: String,

    /// Arguments for the clean step (default: ["fullclean"])
    pub clean_args: Vec<String>,

    /// Arguments for the build step (default: ["build"])
    pub build_args: Vec<String>,
}

impl Default for BuiltinDefaults {
    fn default() -> Self {
        Self {
            project_dir: ".".to_string(),
            build_dir: "build".to_string(),
            program: "idf.py".to_string(),
            clean_args: vec!["fullclean".to_string()],
            build_args: vec!["build".to_string()],
        }
    }
}

impl BuiltinDefaults {
    /// Convert to JSON Value for merging
    ///
    /// `archive_dir`, `export_dir`, `variant` and `output` have no builtin
    /// value; leaving them out lets the typed config fall back to the
    /// project directory, no export, and the builtin registry and output set.
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!({
            "project_dir": self.project_dir,
            "build_dir": self.build_dir,
            "toolchain": {
                "program": self.program,
                "clean_args": self.clean_args,
                "build_args": self.build_args
            },
            "only": []
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let defaults = BuiltinDefaults::default();
        assert_eq!(defaults.project_dir, ".");
        assert_eq!(defaults.build_dir, "build");
        assert_eq!(defaults.program, "idf.py");
        assert_eq!(defaults.clean_args, vec!["fullclean"]);
        assert_eq!(defaults.build_args, vec!["build"]);
    }

    #[test]
    fn test_to_value() {
        let value = BuiltinDefaults::default().to_value();

        assert_eq!(value["build_dir"], "build");
        assert_eq!(value["toolchain"]["program"], "idf.py");
        assert_eq!(value["toolchain"]["clean_args"][0], "fullclean");
        assert!(value.get("archive_dir").is_none());
    }
}
