//! Typed view of the merged configuration

use serde::Deserialize;
use std::path::{Path, PathBuf};

use super::effective::ConfigError;
use crate::artifact::{BuildOutputSet, OutputFile};
use crate::environment::EnvironmentPaths;
use crate::toolchain::IdfToolchain;
use crate::variant::{ConfigVariant, RegistryError, VariantRegistry};

/// Toolchain command lines
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ToolchainConfig {
    pub program: String,
    pub clean_args: Vec<String>,
    pub build_args: Vec<String>,
}

/// Everything a matrix run needs, after layering
#[derive(Debug, Clone, Deserialize)]
pub struct MatrixConfig {
    pub project_dir: PathBuf,

    /// Build tree, relative paths resolve against `project_dir`
    pub build_dir: PathBuf,

    /// Where `build_<variant>/` and `sdkconfig.<variant>` go (default: project dir)
    #[serde(default)]
    pub archive_dir: Option<PathBuf>,

    /// Flat export directory for renamed outputs
    #[serde(default)]
    pub export_dir: Option<PathBuf>,

    pub toolchain: ToolchainConfig,

    /// Restrict the run to these variants
    #[serde(default)]
    pub only: Vec<String>,

    /// `[[variant]]` tables replacing the builtin registry
    #[serde(default, rename = "variant")]
    pub variants: Option<Vec<ConfigVariant>>,

    /// `[[output]]` tables replacing the default output set
    #[serde(default, rename = "output")]
    pub outputs: Option<Vec<OutputFile>>,
}

impl MatrixConfig {
    pub fn from_value(value: serde_json::Value) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_value(value)
            .map_err(|e| ConfigError::ParseError(format!("invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.toolchain.program.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "toolchain.program must not be empty".to_string(),
            ));
        }
        if self.toolchain.build_args.is_empty() {
            return Err(ConfigError::ValidationError(
                "toolchain.build_args must not be empty".to_string(),
            ));
        }
        if let Some(outputs) = &self.outputs {
            if outputs.is_empty() {
                return Err(ConfigError::ValidationError(
                    "[[output]] list must not be empty".to_string(),
                ));
            }
            for output in outputs {
                if output.name.is_empty() || output.name.contains(['/', '\\']) {
                    return Err(ConfigError::ValidationError(format!(
                        "output name '{}' must be a plain file name",
                        output.name
                    )));
                }
                if output.path.is_absolute() {
                    return Err(ConfigError::ValidationError(format!(
                        "output path {} must be relative to the build tree",
                        output.path.display()
                    )));
                }
            }
        }
        Ok(())
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.project_dir.join(path)
        }
    }

    pub fn build_tree(&self) -> PathBuf {
        self.resolve(&self.build_dir)
    }

    pub fn archive_root(&self) -> PathBuf {
        match &self.archive_dir {
            Some(dir) => self.resolve(dir),
            None => self.project_dir.clone(),
        }
    }

    pub fn environment_paths(&self) -> EnvironmentPaths {
        EnvironmentPaths::in_project(&self.project_dir)
    }

    /// Configured variants, or the builtin boards, narrowed by `only`
    pub fn registry(&self) -> Result<VariantRegistry, RegistryError> {
        let registry = match &self.variants {
            Some(variants) => VariantRegistry::new(variants.clone())?,
            None => VariantRegistry::builtin(),
        };
        if self.only.is_empty() {
            Ok(registry)
        } else {
            registry.select(&self.only)
        }
    }

    pub fn output_set(&self) -> BuildOutputSet {
        match &self.outputs {
            Some(files) => BuildOutputSet::new(files.clone()),
            None => BuildOutputSet::default(),
        }
    }

    pub fn idf_toolchain(&self) -> IdfToolchain {
        IdfToolchain::new(&self.project_dir).with_commands(
            self.toolchain.program.clone(),
            self.toolchain.clean_args.clone(),
            self.toolchain.build_args.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BuiltinDefaults;
    use serde_json::json;

    fn defaults() -> serde_json::Value {
        BuiltinDefaults::default().to_value()
    }

    #[test]
    fn test_from_defaults() {
        let config = MatrixConfig::from_value(defaults()).unwrap();

        assert_eq!(config.build_tree(), PathBuf::from("./build"));
        assert_eq!(config.archive_root(), PathBuf::from("."));
        assert!(config.export_dir.is_none());
        assert_eq!(config.registry().unwrap().len(), 6);
        assert_eq!(config.output_set(), BuildOutputSet::default());
    }

    #[test]
    fn test_absolute_paths_kept() {
        let value = crate::config::deep_merge(
            defaults(),
            json!({"project_dir": "/p", "build_dir": "/b", "archive_dir": "arch"}),
        );
        let config = MatrixConfig::from_value(value).unwrap();

        assert_eq!(config.build_tree(), PathBuf::from("/b"));
        assert_eq!(config.archive_root(), PathBuf::from("/p/arch"));
        assert_eq!(config.environment_paths().active_config, PathBuf::from("/p/sdkconfig.defaults"));
    }

    #[test]
    fn test_configured_variants_and_only() {
        let value = crate::config::deep_merge(
            defaults(),
            json!({
                "variant": [
                    {"name": "alpha", "fragment": "CONFIG_A=y\n"},
                    {"name": "beta", "fragment": "CONFIG_B=y\n"}
                ],
                "only": ["beta"]
            }),
        );
        let config = MatrixConfig::from_value(value).unwrap();
        assert_eq!(config.registry().unwrap().names(), vec!["beta"]);
    }

    #[test]
    fn test_unknown_only_is_registry_error() {
        let value = crate::config::deep_merge(defaults(), json!({"only": ["nope"]}));
        let config = MatrixConfig::from_value(value).unwrap();
        assert_eq!(
            config.registry().unwrap_err(),
            RegistryError::Unknown { name: "nope".to_string() }
        );
    }

    #[test]
    fn test_rejects_empty_program() {
        let value = crate::config::deep_merge(defaults(), json!({"toolchain": {"program": " "}}));
        let err = MatrixConfig::from_value(value).unwrap_err();
        assert!(err.to_string().contains("toolchain.program"));
    }

    #[test]
    fn test_rejects_output_name_with_separator() {
        let value = crate::config::deep_merge(
            defaults(),
            json!({"output": [{"path": "app.bin", "name": "sub/app.bin"}]}),
        );
        assert!(MatrixConfig::from_value(value).is_err());
    }

    #[test]
    fn test_missing_toolchain_is_parse_error() {
        let err = MatrixConfig::from_value(json!({"project_dir": ".", "build_dir": "build"}))
            .unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }
}
