//! Configuration loader with multi-source merging

use crate::{Paths, TesseraConfig};
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};

/// Configuration loader with builder pattern
pub struct ConfigLoader {
    project_dir: PathBuf,
    env_prefix: String,
    env_source: Option<HashMap<String, String>>,
    include_user_config: bool,
}

impl ConfigLoader {
    /// Create a new config loader with default project directory (current dir)
    pub fn new() -> Self {
        Self {
            project_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            env_prefix: "TESSERA".to_string(),
            env_source: None,
            include_user_config: true,
        }
    }

    /// Set the project directory
    pub fn with_project_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.project_dir = dir.as_ref().to_path_buf();
        self
    }

    /// Set the environment variable prefix (default: "TESSERA")
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Read environment overrides from `vars` instead of the process environment
    pub fn with_env_source(mut self, vars: HashMap<String, String>) -> Self {
        self.env_source = Some(vars);
        self
    }

    /// Skip ~/.config/tessera/config.toml
    pub fn without_user_config(mut self) -> Self {
        self.include_user_config = false;
        self
    }

    /// Load configuration from all sources with proper precedence
    pub fn load(self) -> Result<TesseraConfig> {
        let mut builder = config::Config::builder();

        // 1. Start with built-in defaults
        let defaults = TesseraConfig::default();
        builder = builder.add_source(config::Config::try_from(&defaults)?);

        // 2. User config, then tessera.toml, then tessera.local.toml
        let paths = if self.include_user_config {
            Paths::discover(&self.project_dir)
        } else {
            Paths::project_only(&self.project_dir)
        };
        for file in paths.sources() {
            builder = builder.add_source(
                config::File::from(file)
                    .required(false)
                    .format(config::FileFormat::Toml),
            );
        }

        // 3. Environment variables (TESSERA_SESSION_RETRY__REPLICA_FANOUT=2)
        builder = builder.add_source(
            config::Environment::with_prefix(&self.env_prefix)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("client.preferred_regions")
                .source(self.env_source),
        );

        // Build and deserialize
        let config = builder.build().context("Failed to build configuration")?;

        let tessera_config: TesseraConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        tessera_config
            .validate()
            .context("Configuration failed validation")?;

        Ok(tessera_config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default(self) -> TesseraConfig {
        self.load().unwrap_or_default()
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
