//! Configuration management for the model factory
//!
//! Supports loading configuration from:
//! - Default values
//! - Config file (models.toml)
//! - Environment variables (MODELS__*)
//!
//! ## Example config file (models.toml):
//! ```toml
//! [factory]
//! name_policy = "name_only"
//! base_path = "./schemas"
//! external_refs = true
//! cache_external = true
//! ```

use config_crate::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::schema::NamePolicy;

/// Main configuration for the model factory
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelsConfig {
    /// Factory settings
    #[serde(default)]
    pub factory: FactoryConfig,
}

/// Schema walking settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactoryConfig {
    /// Which keys name a schema
    #[serde(default)]
    pub name_policy: NamePolicy,

    /// Directory that external `$ref` file parts and schema paths are relative to
    #[serde(default = "default_base_path")]
    pub base_path: PathBuf,

    /// Whether `$ref` may point into other files
    #[serde(default = "default_true")]
    pub external_refs: bool,

    /// Load each external document once per factory
    #[serde(default = "default_true")]
    pub cache_external: bool,
}

fn default_base_path() -> PathBuf {
    PathBuf::from(".")
}

fn default_true() -> bool {
    true
}

impl Default for FactoryConfig {
    fn default() -> Self {
        Self {
            name_policy: NamePolicy::default(),
            base_path: default_base_path(),
            external_refs: true,
            cache_external: true,
        }
    }
}

impl ModelsConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Load configuration from a specific file
    pub fn load_from(config_path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        let config_locations = ["models.toml", ".models.toml", "config/models.toml"];

        for location in config_locations {
            builder = builder.add_source(File::with_name(location).required(false));
        }

        // XDG config directory
        if let Some(config_dir) = directories::ProjectDirs::from("dev", "familiar", "models") {
            let xdg_config = config_dir.config_dir().join("models.toml");
            if xdg_config.exists() {
                builder = builder.add_source(File::from(xdg_config).required(false));
            }
        }

        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // MODELS__FACTORY__NAME_POLICY=legacy
        builder = builder.add_source(
            Environment::with_prefix("MODELS")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Save configuration to a file
    pub fn save(&self, path: &str) -> std::io::Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// The base path, resolved against the working directory when relative
    pub fn base_path(&self) -> PathBuf {
        if self.factory.base_path.is_absolute() {
            self.factory.base_path.clone()
        } else {
            std::env::current_dir()
                .unwrap_or_default()
                .join(&self.factory.base_path)
        }
    }
}
