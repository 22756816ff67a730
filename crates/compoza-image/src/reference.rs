//! Image reference parsing
//!
//! Turns strings like `nginx`, `linuxserver/sonarr:4`, `ghcr.io/org/app:v1`
//! or `registry.local:5000/team/tools/app@sha256:...` into an [`ImageRef`].

use serde::{Deserialize, Serialize};
use std::fmt;

pub const DEFAULT_REGISTRY: &str = "docker.io";
pub const DEFAULT_NAMESPACE: &str = "library";
pub const DEFAULT_TAG: &str = "latest";

/// Structured container image reference
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageRef {
    /// Registry hostname (e.g., "docker.io", "ghcr.io", "localhost:5000")
    pub registry: String,
    /// Path between registry and repository; empty for `registry/repo`
    pub namespace: String,
    /// Final path segment
    pub repository: String,
    /// Tracked tag, "latest" when omitted
    pub tag: String,
    /// Pinned digest; a pinned reference is never update-checked
    pub digest: Option<String>,
}

impl ImageRef {
    /// Parse an image string. Never fails; missing parts take their defaults.
    pub fn parse(image: &str) -> Self {
        let image = image.trim();

        let (rest, digest) = match image.find("@sha256:") {
            Some(idx) => (&image[..idx], Some(image[idx + 1..].to_string())),
            None => (image, None),
        };

        // A colon only introduces a tag when it sits after the last slash,
        // otherwise it is a registry port.
        let last_slash = rest.rfind('/');
        let (path, tag) = match rest.rfind(':') {
            Some(colon) if last_slash.is_none_or(|slash| colon > slash) => {
                (&rest[..colon], rest[colon + 1..].to_string())
            }
            _ => (rest, DEFAULT_TAG.to_string()),
        };
        let tag = if tag.is_empty() {
            DEFAULT_TAG.to_string()
        } else {
            tag
        };

        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let (registry, namespace, repository) = match segments.as_slice() {
            [] => (
                DEFAULT_REGISTRY.to_string(),
                DEFAULT_NAMESPACE.to_string(),
                String::new(),
            ),
            [repo] => (
                DEFAULT_REGISTRY.to_string(),
                DEFAULT_NAMESPACE.to_string(),
                repo.to_string(),
            ),
            [first, repo] if looks_like_registry(first) => {
                (first.to_string(), String::new(), repo.to_string())
            }
            [namespace, repo] => (
                DEFAULT_REGISTRY.to_string(),
                namespace.to_string(),
                repo.to_string(),
            ),
            [registry, middle @ .., repo] => {
                (registry.to_string(), middle.join("/"), repo.to_string())
            }
        };

        Self {
            registry,
            namespace,
            repository,
            tag,
            digest,
        }
    }

    /// Whether the reference is pinned to a digest
    pub fn is_pinned(&self) -> bool {
        self.digest.is_some()
    }

    /// Repository path as used by the Distribution API (`library/nginx`, `org/app`)
    pub fn repository_path(&self) -> String {
        if self.namespace.is_empty() {
            self.repository.clone()
        } else {
            format!("{}/{}", self.namespace, self.repository)
        }
    }

    /// Reference without tag or digest, with default parts omitted
    pub fn name(&self) -> String {
        let mut parts = Vec::with_capacity(3);
        let default_registry = self.registry_type() == RegistryType::DockerHub;
        if !default_registry {
            parts.push(self.registry.as_str());
        }
        if !self.namespace.is_empty() && !(default_registry && self.namespace == DEFAULT_NAMESPACE)
        {
            parts.push(self.namespace.as_str());
        }
        parts.push(self.repository.as_str());
        parts.join("/")
    }

    pub fn registry_type(&self) -> RegistryType {
        RegistryType::classify(&self.registry)
    }

    /// Human-facing page for the image, when the registry has one
    pub fn source_url(&self) -> Option<String> {
        match self.registry_type() {
            RegistryType::DockerHub if self.namespace == DEFAULT_NAMESPACE => {
                Some(format!("https://hub.docker.com/_/{}", self.repository))
            }
            RegistryType::DockerHub => Some(format!(
                "https://hub.docker.com/r/{}/{}",
                self.namespace, self.repository
            )),
            RegistryType::Ghcr | RegistryType::Lscr if !self.namespace.is_empty() => Some(
                format!("https://github.com/{}/{}", self.namespace, self.repository),
            ),
            _ => None,
        }
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name(), self.tag)?;
        if let Some(digest) = &self.digest {
            write!(f, "@{}", digest)?;
        }
        Ok(())
    }
}

/// Parse an image string into an [`ImageRef`]
pub fn parse_image_ref(image: &str) -> ImageRef {
    ImageRef::parse(image)
}

/// Inverse of [`parse_image_ref`], omitting `docker.io` and `library`
pub fn format_image_ref(image: &ImageRef) -> String {
    image.to_string()
}

fn looks_like_registry(segment: &str) -> bool {
    segment.contains('.') || segment.contains(':') || segment == "localhost"
}

/// Strip the Docker Hub prefixes the Engine sometimes reports
///
/// `docker.io/library/nginx:1` and `docker.io/nginx:1` both become `nginx:1`.
pub fn normalize_image_name(image: &str) -> String {
    let image = image.trim();
    if let Some(rest) = image.strip_prefix("docker.io/library/") {
        rest.to_string()
    } else if let Some(rest) = image.strip_prefix("docker.io/") {
        rest.to_string()
    } else {
        image.to_string()
    }
}

/// Registry families with dedicated query support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistryType {
    DockerHub,
    Ghcr,
    Lscr,
    Unknown,
}

impl RegistryType {
    /// Case-insensitive exact match against known hostnames
    pub fn classify(registry: &str) -> Self {
        match registry.to_ascii_lowercase().as_str() {
            "docker.io" | "index.docker.io" | "registry-1.docker.io" | "registry.hub.docker.com" => {
                Self::DockerHub
            }
            "ghcr.io" => Self::Ghcr,
            "lscr.io" => Self::Lscr,
            _ => Self::Unknown,
        }
    }
}

pub fn get_registry_type(registry: &str) -> RegistryType {
    RegistryType::classify(registry)
}

pub fn is_docker_hub(image: &str) -> bool {
    ImageRef::parse(image).registry_type() == RegistryType::DockerHub
}

pub fn is_ghcr(image: &str) -> bool {
    ImageRef::parse(image).registry_type() == RegistryType::Ghcr
}
