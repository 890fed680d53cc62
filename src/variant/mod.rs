//! Hardware variant registry
//!
//! The ordered list of named configuration variants the matrix builds.
//! Each variant carries a `sdkconfig` fragment that is appended verbatim
//! to the base `sdkconfig.defaults`. Registry order is the build order.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// A named configuration variant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigVariant {
    /// Unique name, used as archive key and file suffix
    pub name: String,

    /// Text appended verbatim to the base configuration
    pub fragment: String,
}

impl ConfigVariant {
    /// Create a new variant
    pub fn new(name: impl Into<String>, fragment: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fragment: fragment.into(),
        }
    }
}

/// Registry errors
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("variant registry is empty")]
    Empty,

    #[error("invalid variant name '{name}': only [A-Za-z0-9_-] allowed")]
    InvalidName { name: String },

    #[error("duplicate variant name '{name}'")]
    Duplicate { name: String },

    #[error("unknown variant '{name}'")]
    Unknown { name: String },
}

/// Ordered, immutable set of variants
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantRegistry {
    variants: Vec<ConfigVariant>,
}

/// Builtin LoRaHub hardware targets, in build order
const BUILTIN: &[(&str, &str)] = &[
    (
        "heltec_wifi_lora_32_v3",
        "\n# Build options for Heltec WiFi LoRa 32 v3\n\
         CONFIG_HELTEC_WIFI_LORA_32_V3=y\n\
         CONFIG_RADIO_TYPE_SX1262=y\n\
         CONFIG_GATEWAY_DISPLAY=y\n",
    ),
    (
        "semtech_devkit_sx1261",
        "\n# Build options for Semtech devkit with SX1261 radio\n\
         CONFIG_SEMTECH_DEVKIT=y\n\
         CONFIG_RADIO_TYPE_SX1261=y\n\
         CONFIG_GATEWAY_DISPLAY=y\n",
    ),
    (
        "semtech_devkit_sx1262",
        "\n# Build options for Semtech devkit with SX1262 radio\n\
         CONFIG_SEMTECH_DEVKIT=y\n\
         CONFIG_RADIO_TYPE_SX1262=y\n\
         CONFIG_GATEWAY_DISPLAY=y\n",
    ),
    (
        "semtech_devkit_sx1268",
        "\n# Build options for Semtech devkit with SX1268 radio\n\
         CONFIG_SEMTECH_DEVKIT=y\n\
         CONFIG_RADIO_TYPE_SX1268=y\n\
         CONFIG_GATEWAY_DISPLAY=y\n",
    ),
    (
        "semtech_devkit_llcc68",
        "\n# Build options for Semtech devkit with LLCC68 radio\n\
         CONFIG_SEMTECH_DEVKIT=y\n\
         CONFIG_RADIO_TYPE_LLCC68=y\n\
         CONFIG_GATEWAY_DISPLAY=n\n",
    ),
    (
        "semtech_devkit_lr1121",
        "\n# Build options for Semtech devkit with LR1121 radio\n\
         CONFIG_SEMTECH_DEVKIT=y\n\
         CONFIG_RADIO_TYPE_LR1121=y\n\
         CONFIG_GATEWAY_DISPLAY=y\n",
    ),
];

impl VariantRegistry {
    /// Build a registry, validating names and uniqueness
    pub fn new(variants: Vec<ConfigVariant>) -> Result<Self, RegistryError> {
        if variants.is_empty() {
            return Err(RegistryError::Empty);
        }

        let mut seen = HashSet::new();
        for variant in &variants {
            if !is_valid_name(&variant.name) {
                return Err(RegistryError::InvalidName {
                    name: variant.name.clone(),
                });
            }
            if !seen.insert(variant.name.as_str()) {
                return Err(RegistryError::Duplicate {
                    name: variant.name.clone(),
                });
            }
        }

        Ok(Self { variants })
    }

    /// The builtin LoRaHub board/radio matrix
    pub fn builtin() -> Self {
        Self {
            variants: BUILTIN
                .iter()
                .map(|(name, fragment)| ConfigVariant::new(*name, *fragment))
                .collect(),
        }
    }

    /// Iterate variants in build order
    pub fn iter(&self) -> impl Iterator<Item = &ConfigVariant> {
        self.variants.iter()
    }

    pub fn len(&self) -> usize {
        self.variants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variants.is_empty()
    }

    /// Look up a variant by name
    pub fn get(&self, name: &str) -> Option<&ConfigVariant> {
        self.variants.iter().find(|v| v.name == name)
    }

    /// Variant names in build order
    pub fn names(&self) -> Vec<&str> {
        self.variants.iter().map(|v| v.name.as_str()).collect()
    }

    /// Restrict the registry to the named variants.
    ///
    /// The result keeps registry order, not the order of `names`.
    pub fn select<S: AsRef<str>>(&self, names: &[S]) -> Result<Self, RegistryError> {
        for name in names {
            if self.get(name.as_ref()).is_none() {
                return Err(RegistryError::Unknown {
                    name: name.as_ref().to_string(),
                });
            }
        }

        let selected: Vec<ConfigVariant> = self
            .variants
            .iter()
            .filter(|v| names.iter().any(|n| n.as_ref() == v.name))
            .cloned()
            .collect();

        Self::new(selected)
    }
}

fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}
