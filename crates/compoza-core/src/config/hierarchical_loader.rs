//! Hierarchical configuration loader with precedence
//!
//! Loads configuration from multiple sources with the following precedence (low to high):
//! 1. Embedded defaults (built into binary)
//! 2. User runtime config (~/.compoza/runtime.yaml)
//! 3. Environment variables (COMPOZA_* prefix and registry credentials)
//! 4. CLI flags (handled by caller)

use crate::error::{Error, Result};
use crate::types::{CredentialsConfig, RuntimeConfig};
use camino::{Utf8Path, Utf8PathBuf};
use rust_embed::RustEmbed;
use serde::de::DeserializeOwned;
use std::env;
use std::fs;
use std::str::FromStr;
use tracing::debug;

/// Embedded configuration files
#[derive(RustEmbed)]
#[folder = "$CARGO_MANIFEST_DIR/../../embedded/config/"]
#[prefix = ""]
struct EmbeddedConfigs;

const RUNTIME_CONFIG_FILE: &str = "runtime.yaml";

/// Configuration hierarchy loader
pub struct HierarchicalConfigLoader {
    /// Base directory for configuration files
    config_dir: Utf8PathBuf,
}

impl HierarchicalConfigLoader {
    /// Create a new hierarchical config loader rooted at ~/.compoza
    pub fn new() -> Result<Self> {
        let config_dir = Self::get_config_dir()?;
        Ok(Self { config_dir })
    }

    /// Create a loader with a custom config directory
    pub fn with_dir(config_dir: Utf8PathBuf) -> Self {
        Self { config_dir }
    }

    fn get_config_dir() -> Result<Utf8PathBuf> {
        let home = dirs::home_dir()
            .ok_or_else(|| Error::invalid_config("Could not determine home directory"))?;
        let home = Utf8PathBuf::from_path_buf(home)
            .map_err(|_| Error::invalid_config("Home directory is not valid UTF-8"))?;
        Ok(home.join(".compoza"))
    }

    /// Load runtime configuration with hierarchical precedence
    pub fn load_runtime_config(&self) -> Result<RuntimeConfig> {
        let mut config = Self::load_embedded_config::<RuntimeConfig>("runtime-defaults.yaml")?;

        let runtime_config_path = self.config_dir.join(RUNTIME_CONFIG_FILE);
        if runtime_config_path.exists() {
            debug!("Loading runtime config from {}", runtime_config_path);
            let file_config = self.load_yaml_file::<RuntimeConfig>(&runtime_config_path)?;
            config = Self::merge_runtime_config(config, file_config);
        }

        let config = self.apply_env_overrides(config)?;
        Self::validate(&config)?;
        Ok(config)
    }

    fn validate(config: &RuntimeConfig) -> Result<()> {
        if config.update_check.sweep_interval_secs == 0 {
            return Err(Error::invalid_config(
                "update-check.sweep-interval-secs must be at least 1",
            ));
        }
        if config.tasks.batch_concurrency == 0 {
            return Err(Error::invalid_config(
                "tasks.batch-concurrency must be at least 1",
            ));
        }
        Ok(())
    }

    /// Load an embedded configuration file
    fn load_embedded_config<T: DeserializeOwned>(filename: &str) -> Result<T> {
        let embedded_file = EmbeddedConfigs::get(filename).ok_or_else(|| {
            Error::config_not_found(format!("Embedded config not found: {}", filename))
        })?;

        let content = std::str::from_utf8(&embedded_file.data).map_err(|_| {
            Error::invalid_config(format!("Invalid UTF-8 in embedded config: {}", filename))
        })?;

        serde_yaml_ng::from_str(content).map_err(|e| {
            Error::invalid_config(format!(
                "Failed to parse embedded config {}: {}",
                filename, e
            ))
        })
    }

    fn load_yaml_file<T: DeserializeOwned>(&self, path: &Utf8Path) -> Result<T> {
        let content = fs::read_to_string(path)?;
        serde_yaml_ng::from_str(&content)
            .map_err(|e| Error::invalid_config(format!("Failed to parse {}: {}", path, e)))
    }

    /// Merge two runtime configs (base is overridden by overlay)
    ///
    /// Registry endpoint maps are merged key by key so a user file can add
    /// a mirror without restating the built-in Docker Hub mapping.
    fn merge_runtime_config(base: RuntimeConfig, overlay: RuntimeConfig) -> RuntimeConfig {
        let mut registries = overlay.registries;
        for (host, url) in base.registries.endpoints {
            registries.endpoints.entry(host).or_insert(url);
        }

        RuntimeConfig {
            network: overlay.network,
            update_check: overlay.update_check,
            registries,
            tasks: overlay.tasks,
            credentials: base.credentials,
            self_image: overlay.self_image,
        }
    }

    /// Apply environment variable overrides to runtime config
    fn apply_env_overrides(&self, mut config: RuntimeConfig) -> Result<RuntimeConfig> {
        if let Some(val) = parse_env("COMPOZA_HTTP_TIMEOUT_SECS")? {
            config.network.http_timeout_secs = val;
        }

        if let Some(val) = parse_env("COMPOZA_CACHE_TTL_SECS")? {
            config.update_check.cache_ttl_secs = val;
        }

        if let Some(val) = parse_env("COMPOZA_RECHECK_INTERVAL_SECS")? {
            config.update_check.recheck_interval_secs = val;
        }

        if let Some(val) = parse_env::<usize>("COMPOZA_BATCH_CONCURRENCY")? {
            if val == 0 {
                return Err(Error::invalid_config(
                    "COMPOZA_BATCH_CONCURRENCY must be at least 1",
                ));
            }
            config.tasks.batch_concurrency = val;
        }

        if let Some(val) = non_empty_env("COMPOZA_DOCKER_HUB_API") {
            config.registries.docker_hub_api = val;
        }

        if let Some(val) = non_empty_env("COMPOZA_GITHUB_API") {
            config.registries.github_api = val;
        }

        if let Some(val) = non_empty_env("COMPOZA_IMAGE") {
            config.self_image = val;
        }

        config.credentials = CredentialsConfig {
            dockerhub_username: non_empty_env("DOCKERHUB_USERNAME"),
            dockerhub_token: non_empty_env("DOCKERHUB_TOKEN"),
            ghcr_token: non_empty_env("GHCR_TOKEN"),
        };

        Ok(config)
    }

    /// Get the config directory path
    pub fn config_dir(&self) -> &Utf8Path {
        &self.config_dir
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_env<T: FromStr>(key: &str) -> Result<Option<T>> {
    match non_empty_env(key) {
        Some(val) => val
            .parse()
            .map(Some)
            .map_err(|_| Error::invalid_config(format!("{} must be a valid number", key))),
        None => Ok(None),
    }
}
