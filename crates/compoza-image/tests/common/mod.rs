//! Shared helpers for compoza-image integration tests
//!
//! - Registry clients wired to a single wiremock server
//! - Mock mounting helpers for Docker Hub, GitHub Packages and OCI endpoints
//! - A scriptable in-memory `DockerEngine`

#![allow(dead_code)]

use async_trait::async_trait;
use compoza_core::types::{CredentialsConfig, NetworkConfig, RegistryEndpoints};
use compoza_image::{
    build_http_client, CacheSettings, CredentialProvider, DockerEngine, EngineError,
    ImageDetails, ImageUpdateChecker, RegistryClients, UpdateCache, VersionResolver,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const OLD_DIGEST: &str = "sha256:1111111111111111111111111111111111111111111111111111111111111111";
pub const NEW_DIGEST: &str = "sha256:2222222222222222222222222222222222222222222222222222222222222222";
pub const CONFIG_DIGEST: &str = "sha256:3333333333333333333333333333333333333333333333333333333333333333";
pub const AMD64_DIGEST: &str = "sha256:4444444444444444444444444444444444444444444444444444444444444444";

/// Host name routed to the mock server for generic OCI tests
pub const TEST_REGISTRY: &str = "registry.test";

pub fn no_credentials() -> CredentialsConfig {
    CredentialsConfig::default()
}

pub fn ghcr_credentials() -> CredentialsConfig {
    CredentialsConfig {
        ghcr_token: Some("ghp_test".to_string()),
        ..Default::default()
    }
}

/// Endpoints that send every registry family to `server`
pub fn endpoints_for(server: &MockServer) -> RegistryEndpoints {
    let mut endpoints = RegistryEndpoints {
        docker_hub_api: server.uri(),
        github_api: server.uri(),
        endpoints: HashMap::new(),
    };
    for host in ["docker.io", "ghcr.io", "lscr.io", TEST_REGISTRY] {
        endpoints.endpoints.insert(host.to_string(), server.uri());
    }
    endpoints
}

pub fn clients_for(server: &MockServer, credentials: CredentialsConfig) -> RegistryClients {
    let http = build_http_client(&NetworkConfig::default()).unwrap();
    RegistryClients::new(
        http,
        endpoints_for(server),
        Arc::new(CredentialProvider::new(credentials)),
    )
}

pub fn checker_for(
    server: &MockServer,
    engine: Arc<FakeEngine>,
    cache: Arc<UpdateCache>,
) -> ImageUpdateChecker {
    let registries = clients_for(server, no_credentials());
    ImageUpdateChecker::new(
        engine,
        registries.clone(),
        VersionResolver::new(registries),
        cache,
    )
}

pub fn fresh_cache() -> Arc<UpdateCache> {
    Arc::new(UpdateCache::new(CacheSettings::default()))
}

// --- Docker Hub ---

pub fn hub_tag(name: &str, digest: &str) -> Value {
    json!({
        "name": name,
        "digest": digest,
        "images": [
            {"architecture": "arm64", "os": "linux", "digest": format!("{}-arm64", digest)},
            {"architecture": "amd64", "os": "linux", "digest": format!("{}-amd64", digest)}
        ]
    })
}

pub async fn mock_hub_tags(server: &MockServer, namespace: &str, repo: &str, tags: Vec<Value>) {
    Mock::given(method("GET"))
        .and(path(format!("/v2/repositories/{}/{}/tags", namespace, repo)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "count": tags.len(),
            "next": null,
            "results": tags
        })))
        .mount(server)
        .await;
}

// --- GitHub Packages ---

pub fn package_version(digest: &str, tags: &[&str]) -> Value {
    json!({
        "id": 1,
        "name": digest,
        "metadata": {"package_type": "container", "container": {"tags": tags}}
    })
}

pub fn versions_path(owner_kind: &str, owner: &str, package: &str) -> String {
    format!("/{}/{}/packages/container/{}/versions", owner_kind, owner, package)
}

// --- OCI Distribution ---

pub fn image_index(annotations: Value) -> Value {
    json!({
        "schemaVersion": 2,
        "mediaType": "application/vnd.oci.image.index.v1+json",
        "manifests": [
            {
                "mediaType": "application/vnd.oci.image.manifest.v1+json",
                "digest": "sha256:attestation",
                "platform": {"os": "unknown", "architecture": "unknown"}
            },
            {
                "mediaType": "application/vnd.oci.image.manifest.v1+json",
                "digest": AMD64_DIGEST,
                "platform": {"os": "linux", "architecture": "amd64"}
            }
        ],
        "annotations": annotations
    })
}

pub fn image_manifest() -> Value {
    json!({
        "schemaVersion": 2,
        "mediaType": "application/vnd.oci.image.manifest.v1+json",
        "config": {"mediaType": "application/vnd.oci.image.config.v1+json", "digest": CONFIG_DIGEST},
        "layers": []
    })
}

pub async fn mock_manifest(server: &MockServer, repository: &str, reference: &str, body: Value) {
    Mock::given(method("GET"))
        .and(path(format!("/v2/{}/manifests/{}", repository, reference)))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

pub async fn mock_head_digest(server: &MockServer, repository: &str, tag: &str, digest: &str) {
    Mock::given(method("HEAD"))
        .and(path(format!("/v2/{}/manifests/{}", repository, tag)))
        .respond_with(ResponseTemplate::new(200).insert_header("docker-content-digest", digest))
        .mount(server)
        .await;
}

/// `WWW-Authenticate` value pointing at `{server}/{realm_path}`
pub fn bearer_challenge(server: &MockServer, realm_path: &str, repository: &str) -> String {
    format!(
        r#"Bearer realm="{}/{}",service="{}",scope="repository:{}:pull""#,
        server.uri(),
        realm_path.trim_start_matches('/'),
        TEST_REGISTRY,
        repository
    )
}

// --- Docker Engine ---

/// Scripted answer for `distribution_digest`
#[derive(Debug, Clone)]
pub enum Distribution {
    Digest(String),
    RateLimited,
    Unsupported,
}

/// In-memory engine; unknown images are absent
#[derive(Default)]
pub struct FakeEngine {
    images: Mutex<HashMap<String, ImageDetails>>,
    listed: Mutex<HashMap<String, Vec<ImageDetails>>>,
    distribution: Mutex<HashMap<String, Distribution>>,
    pub distribution_calls: Mutex<Vec<String>>,
}

impl FakeEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a local image reachable by `id`
    pub fn with_image(self: Arc<Self>, id: &str, repo_digests: &[&str]) -> Arc<Self> {
        self.images.lock().insert(
            id.to_string(),
            ImageDetails {
                id: id.to_string(),
                repo_tags: vec![],
                repo_digests: repo_digests.iter().map(|d| d.to_string()).collect(),
            },
        );
        self
    }

    /// Register what `image ls --filter reference=<reference>` returns
    pub fn with_listing(self: Arc<Self>, reference: &str, repo_digests: &[&str]) -> Arc<Self> {
        self.listed.lock().insert(
            reference.to_string(),
            vec![ImageDetails {
                id: format!("sha256:listed-{}", reference),
                repo_tags: vec![reference.to_string()],
                repo_digests: repo_digests.iter().map(|d| d.to_string()).collect(),
            }],
        );
        self
    }

    pub fn with_distribution(self: Arc<Self>, image: &str, answer: Distribution) -> Arc<Self> {
        self.distribution.lock().insert(image.to_string(), answer);
        self
    }
}

#[async_trait]
impl DockerEngine for FakeEngine {
    async fn list_images(&self, reference: &str) -> Result<Vec<ImageDetails>, EngineError> {
        Ok(self.listed.lock().get(reference).cloned().unwrap_or_default())
    }

    async fn inspect_image(&self, id: &str) -> Result<Option<ImageDetails>, EngineError> {
        Ok(self.images.lock().get(id).cloned())
    }

    async fn distribution_digest(&self, image: &str) -> Result<Option<String>, EngineError> {
        self.distribution_calls.lock().push(image.to_string());
        match self.distribution.lock().get(image).cloned() {
            Some(Distribution::Digest(digest)) => Ok(Some(digest)),
            Some(Distribution::RateLimited) => Err(EngineError::RateLimited {
                image: image.to_string(),
            }),
            Some(Distribution::Unsupported) | None => Err(EngineError::Unsupported {
                operation: "buildx imagetools inspect".to_string(),
            }),
        }
    }
}
