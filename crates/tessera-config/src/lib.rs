//! Configuration management for Tessera
//!
//! Provides hierarchical configuration loading from multiple sources:
//! 1. Environment variables (TESSERA_* prefix, `__` between section and key)
//! 2. tessera.local.toml (gitignored, local overrides)
//! 3. tessera.toml (git-tracked, project config)
//! 4. ~/.config/tessera/config.toml (user defaults)
//! 5. Built-in defaults (lowest precedence)

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

mod error;
mod loader;
mod paths;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use paths::{LOCAL_CONFIG_FILE, PROJECT_CONFIG_FILE, Paths};

/// Main Tessera client configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TesseraConfig {
    pub client: ClientConfig,
    pub session_retry: SessionRetryConfig,
    pub read_many: ReadManyConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Regions in preference order; the first is the local region.
    pub preferred_regions: Vec<String>,
    /// Whether every region accepts writes.
    pub multi_master: bool,
    /// Scope passed to the credential provider on refresh.
    pub credential_scope: String,
    /// Share one session store across clients built from this config.
    pub share_session_store: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            preferred_regions: vec!["local".to_string()],
            multi_master: false,
            credential_scope: "account".to_string(),
            share_session_store: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionRetryConfig {
    pub max_in_region_retry_count: u32,
    pub remote_region_preferred: bool,
    /// Clamped to at least 100 ms when applied.
    pub min_in_region_retry_time_for_writes_ms: u64,
    /// Clamped to at least 1 when applied.
    pub max_retries_in_local_region_when_remote_region_preferred: u32,
    pub replica_fanout: u8,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub overall_budget_ms: u64,
}

impl Default for SessionRetryConfig {
    fn default() -> Self {
        Self {
            max_in_region_retry_count: 1,
            remote_region_preferred: false,
            min_in_region_retry_time_for_writes_ms: 500,
            max_retries_in_local_region_when_remote_region_preferred: 1,
            replica_fanout: 4,
            initial_backoff_ms: 5,
            max_backoff_ms: 500,
            overall_budget_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadManyConfig {
    /// Per-range sub-batches in flight at once.
    pub max_concurrency: usize,
}

impl Default for ReadManyConfig {
    fn default() -> Self {
        Self { max_concurrency: 8 }
    }
}

impl TesseraConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self> {
        ConfigLoader::new().load()
    }

    /// Load configuration from specific project directory
    pub fn load_from_dir(project_dir: impl AsRef<Path>) -> Result<Self> {
        ConfigLoader::new().with_project_dir(project_dir).load()
    }

    /// Checks values that cannot be clamped into something meaningful.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.client.preferred_regions.is_empty() {
            return Err(ConfigError::ValidationError(
                "client.preferred_regions must name at least one region".to_string(),
            ));
        }
        if self.client.preferred_regions.iter().any(|r| r.trim().is_empty()) {
            return Err(ConfigError::ValidationError(
                "client.preferred_regions contains an empty region name".to_string(),
            ));
        }
        if self.read_many.max_concurrency == 0 {
            return Err(ConfigError::ValidationError(
                "read_many.max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.session_retry.overall_budget_ms == 0 {
            return Err(ConfigError::ValidationError(
                "session_retry.overall_budget_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
