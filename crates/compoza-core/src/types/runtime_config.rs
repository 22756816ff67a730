//! Runtime configuration types for operational parameters
//!
//! These types define configuration that controls runtime behavior like
//! update-check cache lifetimes, registry endpoints and task scheduling.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Complete runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RuntimeConfig {
    /// Network and HTTP configuration
    #[serde(default)]
    pub network: NetworkConfig,

    /// Image update check cache settings
    #[serde(default)]
    pub update_check: UpdateCheckConfig,

    /// Registry API endpoints
    #[serde(default)]
    pub registries: RegistryEndpoints,

    /// Background task settings
    #[serde(default)]
    pub tasks: TaskConfig,

    /// Registry credentials, sourced from the environment only
    #[serde(skip)]
    pub credentials: CredentialsConfig,

    /// Image reference this application itself runs from
    #[serde(default = "default_self_image")]
    pub self_image: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            update_check: UpdateCheckConfig::default(),
            registries: RegistryEndpoints::default(),
            tasks: TaskConfig::default(),
            credentials: CredentialsConfig::default(),
            self_image: default_self_image(),
        }
    }
}

fn default_self_image() -> String {
    "ghcr.io/compoza/compoza".to_string()
}

/// Network and HTTP configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct NetworkConfig {
    /// HTTP timeout in seconds
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,

    /// User agent string for HTTP requests
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            http_timeout_secs: default_http_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

impl NetworkConfig {
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

fn default_http_timeout() -> u64 {
    30
}
fn default_user_agent() -> String {
    format!(
        "compoza/{} ({}; {})",
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS,
        std::env::consts::ARCH
    )
}

/// Update check cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct UpdateCheckConfig {
    /// Lifetime of a cached check result
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,

    /// Lifetime (and re-check back-off) of a result written after a 429
    #[serde(default = "default_rate_limited_ttl")]
    pub rate_limited_ttl_secs: u64,

    /// Age after which a still-valid entry is refreshed in the background
    #[serde(default = "default_recheck_interval")]
    pub recheck_interval_secs: u64,

    /// Age after which a pending-check marker is considered stuck
    #[serde(default = "default_pending_timeout")]
    pub pending_timeout_secs: u64,

    /// Interval between cache sweeps
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Fall back to probing every semver tag when manifests carry no version
    #[serde(default)]
    pub tag_scan_fallback: bool,
}

impl Default for UpdateCheckConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: default_cache_ttl(),
            rate_limited_ttl_secs: default_rate_limited_ttl(),
            recheck_interval_secs: default_recheck_interval(),
            pending_timeout_secs: default_pending_timeout(),
            sweep_interval_secs: default_sweep_interval(),
            tag_scan_fallback: false,
        }
    }
}

impl UpdateCheckConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn rate_limited_ttl(&self) -> Duration {
        Duration::from_secs(self.rate_limited_ttl_secs)
    }

    pub fn recheck_interval(&self) -> Duration {
        Duration::from_secs(self.recheck_interval_secs)
    }

    pub fn pending_timeout(&self) -> Duration {
        Duration::from_secs(self.pending_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

fn default_cache_ttl() -> u64 {
    3600 // 1 hour
}
fn default_rate_limited_ttl() -> u64 {
    1800 // 30 minutes
}
fn default_recheck_interval() -> u64 {
    300 // 5 minutes
}
fn default_pending_timeout() -> u64 {
    300 // 5 minutes
}
fn default_sweep_interval() -> u64 {
    60
}

/// Registry API endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RegistryEndpoints {
    /// Docker Hub web API (tags listing)
    #[serde(default = "default_docker_hub_api")]
    pub docker_hub_api: String,

    /// GitHub REST API (container packages)
    #[serde(default = "default_github_api")]
    pub github_api: String,

    /// Registry host to OCI Distribution base URL
    #[serde(default = "default_endpoints")]
    pub endpoints: HashMap<String, String>,
}

impl Default for RegistryEndpoints {
    fn default() -> Self {
        Self {
            docker_hub_api: default_docker_hub_api(),
            github_api: default_github_api(),
            endpoints: default_endpoints(),
        }
    }
}

impl RegistryEndpoints {
    /// Base URL used for OCI Distribution calls against `registry`
    ///
    /// Hosts without an explicit mapping are reached over HTTPS directly.
    pub fn distribution_base(&self, registry: &str) -> String {
        let key = registry.to_ascii_lowercase();
        match self.endpoints.get(&key) {
            Some(base) => base.trim_end_matches('/').to_string(),
            None => format!("https://{}", key),
        }
    }
}

fn default_docker_hub_api() -> String {
    "https://hub.docker.com".to_string()
}
fn default_github_api() -> String {
    "https://api.github.com".to_string()
}
fn default_endpoints() -> HashMap<String, String> {
    let mut endpoints = HashMap::new();
    endpoints.insert(
        "docker.io".to_string(),
        "https://registry-1.docker.io".to_string(),
    );
    endpoints
}

/// Background task configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TaskConfig {
    /// How long an operation must run before its task becomes visible
    #[serde(default = "default_visibility_delay")]
    pub visibility_delay_ms: u64,

    /// Maximum number of projects updated at once by "update all"
    #[serde(default = "default_batch_concurrency")]
    pub batch_concurrency: usize,

    /// How long to wait for a disconnected server to come back
    #[serde(default = "default_reconnect_timeout")]
    pub reconnect_timeout_secs: u64,

    /// Interval between reconnect health checks
    #[serde(default = "default_reconnect_poll")]
    pub reconnect_poll_ms: u64,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            visibility_delay_ms: default_visibility_delay(),
            batch_concurrency: default_batch_concurrency(),
            reconnect_timeout_secs: default_reconnect_timeout(),
            reconnect_poll_ms: default_reconnect_poll(),
        }
    }
}

impl TaskConfig {
    pub fn visibility_delay(&self) -> Duration {
        Duration::from_millis(self.visibility_delay_ms)
    }

    pub fn reconnect_timeout(&self) -> Duration {
        Duration::from_secs(self.reconnect_timeout_secs)
    }

    pub fn reconnect_poll(&self) -> Duration {
        Duration::from_millis(self.reconnect_poll_ms)
    }
}

fn default_visibility_delay() -> u64 {
    500
}
fn default_batch_concurrency() -> usize {
    3
}
fn default_reconnect_timeout() -> u64 {
    120
}
fn default_reconnect_poll() -> u64 {
    2000
}

/// Registry credentials read from the process environment
#[derive(Clone, Default)]
pub struct CredentialsConfig {
    pub dockerhub_username: Option<String>,
    pub dockerhub_token: Option<String>,
    pub ghcr_token: Option<String>,
}

// Tokens must never end up in logs.
impl std::fmt::Debug for CredentialsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialsConfig")
            .field("dockerhub_username", &self.dockerhub_username)
            .field("dockerhub_token", &self.dockerhub_token.as_ref().map(|_| "***"))
            .field("ghcr_token", &self.ghcr_token.as_ref().map(|_| "***"))
            .finish()
    }
}
