//! Wiring of the update engine from runtime configuration

use anyhow::{Context, Result};
use compoza_core::{HierarchicalConfigLoader, RuntimeConfig};
use compoza_image::{
    build_http_client, normalize_image_name, CacheSettings, CredentialProvider, Detached,
    DockerCli, ImageUpdateChecker, RegistryClients, UpdateCache, VersionResolver,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

pub struct AppContext {
    pub config: RuntimeConfig,
    pub http: reqwest::Client,
    pub docker: DockerCli,
    pub checker: ImageUpdateChecker,
    _sweeper: Detached,
}

impl AppContext {
    pub fn load() -> Result<Self> {
        let config = HierarchicalConfigLoader::new()
            .and_then(|loader| loader.load_runtime_config())
            .context("Failed to load runtime configuration")?;

        let http = build_http_client(&config.network)?;
        let credentials = Arc::new(CredentialProvider::new(config.credentials.clone()));
        let registries = RegistryClients::new(http.clone(), config.registries.clone(), credentials);
        let resolver = VersionResolver::new(registries.clone())
            .with_tag_scan_fallback(config.update_check.tag_scan_fallback);
        let cache = Arc::new(UpdateCache::new(CacheSettings::from(&config.update_check)));
        let sweeper = cache.spawn_sweeper();

        let docker = DockerCli::new();
        let checker = ImageUpdateChecker::new(
            Arc::new(docker.clone()),
            registries,
            resolver,
            cache,
        );

        Ok(Self {
            config,
            http,
            docker,
            checker,
            _sweeper: sweeper,
        })
    }

    pub fn cache(&self) -> &Arc<UpdateCache> {
        self.checker.cache()
    }

    /// Images to check: the given names, or those of running containers
    ///
    /// Each name maps to the local image IDs containers were created from.
    pub async fn images_to_check(&self, names: &[String]) -> Result<HashMap<String, HashSet<String>>> {
        if !names.is_empty() {
            return Ok(names
                .iter()
                .map(|n| (n.clone(), HashSet::new()))
                .collect());
        }

        let containers = self
            .docker
            .running_containers()
            .await
            .context("Failed to list running containers")?;

        let mut images: HashMap<String, HashSet<String>> = HashMap::new();
        for container in containers {
            images
                .entry(normalize_image_name(&container.image))
                .or_default()
                .insert(container.image_id);
        }
        Ok(images)
    }
}
