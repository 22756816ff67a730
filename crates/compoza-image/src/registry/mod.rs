//! Registry clients
//!
//! - [`DockerHubClient`]: Docker Hub v2 repository tags API
//! - [`GhcrClient`]: GitHub Packages API (GHCR and lscr.io)
//! - [`OciClient`]: generic OCI Distribution v2 with the bearer-token flow
//! - [`RegistryClients::query_registry`]: consolidated tag/digest/version lookup

mod dockerhub;
mod ghcr;
mod oci;
mod query;
mod token;

pub use dockerhub::DockerHubClient;
pub use ghcr::GhcrClient;
pub use oci::{OciClient, VERSION_ANNOTATIONS};
pub use query::{derive_query_result, RegistryQueryResult, RegistrySource};
pub use token::{BearerChallenge, TokenCache, TOKEN_CACHE_CAPACITY, TOKEN_TTL};

use crate::credentials::CredentialProvider;
use crate::reference::ImageRef;
use anyhow::{Context, Result};
use compoza_core::types::{NetworkConfig, RegistryEndpoints};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Manifest media types, in preference order
pub const MANIFEST_MEDIA_TYPES: [&str; 4] = [
    "application/vnd.oci.image.index.v1+json",
    "application/vnd.docker.distribution.manifest.list.v2+json",
    "application/vnd.oci.image.manifest.v1+json",
    "application/vnd.docker.distribution.manifest.v2+json",
];

/// One entry of a registry's tag list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagInfo {
    pub name: String,
    pub digest: String,
}

impl TagInfo {
    pub fn new(name: impl Into<String>, digest: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            digest: digest.into(),
        }
    }
}

/// Build the shared HTTP client
pub fn build_http_client(network: &NetworkConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(&network.user_agent)
        .timeout(network.http_timeout())
        .build()
        .context("Failed to build HTTP client")
}

/// All registry clients behind one handle
///
/// Cheap to clone; the token cache and credential state are shared.
#[derive(Clone)]
pub struct RegistryClients {
    http: reqwest::Client,
    endpoints: RegistryEndpoints,
    credentials: Arc<CredentialProvider>,
    tokens: Arc<TokenCache>,
    docker_hub: DockerHubClient,
    ghcr: GhcrClient,
}

impl RegistryClients {
    pub fn new(
        http: reqwest::Client,
        endpoints: RegistryEndpoints,
        credentials: Arc<CredentialProvider>,
    ) -> Self {
        let docker_hub = DockerHubClient::new(http.clone(), &endpoints.docker_hub_api);
        let ghcr = GhcrClient::new(http.clone(), &endpoints.github_api, credentials.clone());
        Self {
            http,
            endpoints,
            credentials,
            tokens: Arc::new(TokenCache::default()),
            docker_hub,
            ghcr,
        }
    }

    pub fn docker_hub(&self) -> &DockerHubClient {
        &self.docker_hub
    }

    pub fn ghcr(&self) -> &GhcrClient {
        &self.ghcr
    }

    pub fn credentials(&self) -> &Arc<CredentialProvider> {
        &self.credentials
    }

    /// OCI Distribution client for the registry hosting `image`
    pub fn oci_for(&self, image: &ImageRef) -> OciClient {
        OciClient::new(
            self.http.clone(),
            self.endpoints.distribution_base(&image.registry),
            self.credentials.clone(),
            self.tokens.clone(),
        )
    }
}

/// Next-page URL from an RFC 5988 `Link` header
///
/// Format: `<https://ghcr.io/v2/repo/tags/list?n=100&last=tag>; rel="next"`.
/// Relative URLs are resolved against `base`.
pub(crate) fn parse_link_header(link: &str, base: &str) -> Option<String> {
    for part in link.split(',') {
        let part = part.trim();
        if part.contains("rel=\"next\"") {
            let url = part
                .find('<')
                .map(|start| &part[start + 1..])
                .and_then(|rest| rest.find('>').map(|end| &rest[..end]));
            if let Some(url) = url {
                if url.starts_with('/') {
                    return Some(format!("{}{}", base.trim_end_matches('/'), url));
                }
                return Some(url.to_string());
            }
        }
    }
    None
}
