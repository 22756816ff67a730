//! Generic OCI Distribution v2 client
//!
//! Requests go out with a cached bearer token when one exists for the
//! repository. A 401 carrying a `WWW-Authenticate: Bearer` challenge triggers
//! exactly one token fetch from the challenge realm and exactly one retry.

use super::token::{BearerChallenge, TokenCache};
use super::{parse_link_header, TagInfo, MANIFEST_MEDIA_TYPES};
use crate::credentials::{registry_for_token_endpoint, CredentialProvider};
use crate::error::{RegistryError, RegistryResult};
use crate::version::{is_semver_like, sort_by_specificity};
use futures::stream::{self, StreamExt};
use reqwest::header::{ACCEPT, LINK, WWW_AUTHENTICATE};
use reqwest::{Method, Response, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Annotation/label keys carrying a human version, most trusted first
pub const VERSION_ANNOTATIONS: [&str; 3] = [
    "org.opencontainers.image.version",
    "org.label-schema.version",
    "version",
];

const TAG_PAGE_SIZE: usize = 100;
const MAX_TAG_PAGES: usize = 10;
const MAX_LISTED_TAGS: usize = 50;
const TAG_LOOKUP_CONCURRENCY: usize = 8;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TagsList {
    #[serde(default)]
    tags: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
struct Descriptor {
    digest: String,
    #[serde(default)]
    platform: Option<DescriptorPlatform>,
    #[serde(default)]
    annotations: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
struct DescriptorPlatform {
    #[serde(default)]
    os: String,
    #[serde(default)]
    architecture: String,
}

#[derive(Debug, Deserialize)]
struct ImageIndex {
    manifests: Vec<Descriptor>,
    #[serde(default)]
    annotations: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct ImageManifest {
    config: Descriptor,
    #[serde(default)]
    annotations: HashMap<String, String>,
}

/// Manifest list / OCI index, or a single-platform manifest
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Manifest {
    Index(ImageIndex),
    Image(ImageManifest),
}

impl Manifest {
    fn annotations(&self) -> &HashMap<String, String> {
        match self {
            Manifest::Index(index) => &index.annotations,
            Manifest::Image(image) => &image.annotations,
        }
    }
}

impl ImageIndex {
    /// linux/amd64 or the first real platform (attestations report "unknown")
    fn preferred_platform(&self) -> Option<&Descriptor> {
        let real = || {
            self.manifests.iter().filter(|m| {
                m.platform
                    .as_ref()
                    .is_none_or(|p| p.os != "unknown" && p.architecture != "unknown")
            })
        };
        real()
            .find(|m| {
                m.platform
                    .as_ref()
                    .is_some_and(|p| p.os == "linux" && p.architecture == "amd64")
            })
            .or_else(|| real().next())
    }
}

#[derive(Debug, Deserialize)]
struct ConfigBlob {
    #[serde(default)]
    config: Option<ConfigDetail>,
}

#[derive(Debug, Deserialize)]
struct ConfigDetail {
    #[serde(default, rename = "Labels")]
    labels: Option<HashMap<String, String>>,
}

fn version_from_annotations(annotations: &HashMap<String, String>) -> Option<String> {
    VERSION_ANNOTATIONS
        .iter()
        .filter_map(|key| annotations.get(*key))
        .map(|v| v.trim())
        .find(|v| !v.is_empty())
        .map(str::to_string)
}

/// Client for one registry's `/v2/` API
#[derive(Clone)]
pub struct OciClient {
    http: reqwest::Client,
    base_url: String,
    credentials: Arc<CredentialProvider>,
    tokens: Arc<TokenCache>,
}

impl OciClient {
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        credentials: Arc<CredentialProvider>,
        tokens: Arc<TokenCache>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
            tokens,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn token_key(&self, repository: &str) -> String {
        format!("{}/{}", self.base_url, repository)
    }

    async fn send(
        &self,
        method: &Method,
        url: &str,
        accept: Option<&str>,
        token: Option<&str>,
    ) -> RegistryResult<Response> {
        let mut request = self.http.request(method.clone(), url);
        if let Some(accept) = accept {
            request = request.header(ACCEPT, accept);
        }
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        Ok(request.send().await?)
    }

    /// Perform a request, answering one bearer challenge if the registry issues it
    async fn fetch_with_auth(
        &self,
        method: Method,
        url: &str,
        accept: Option<&str>,
        repository: &str,
    ) -> RegistryResult<Response> {
        let key = self.token_key(repository);
        let cached = self.tokens.get(&key);

        let response = self.send(&method, url, accept, cached.as_deref()).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let Some(challenge) = response
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|h| h.to_str().ok())
            .and_then(BearerChallenge::parse)
        else {
            return Ok(response);
        };

        let token = self.fetch_token(&challenge, repository).await?;
        self.tokens.insert(key, token.clone());

        self.send(&method, url, accept, Some(&token)).await
    }

    async fn fetch_token(
        &self,
        challenge: &BearerChallenge,
        repository: &str,
    ) -> RegistryResult<String> {
        let url = challenge
            .token_url(&format!("repository:{}:pull", repository))
            .map_err(|e| RegistryError::Parse(format!("invalid token realm: {}", e)))?;
        debug!("Requesting registry token from: {}", challenge.realm);

        let creds = self
            .credentials
            .get_credentials_for_token_endpoint(&challenge.realm);

        let mut request = self.http.get(url.clone());
        if let Some(creds) = &creds {
            request = request.basic_auth(&creds.username, Some(&creds.token));
        }
        let mut response = request.send().await?;

        if creds.is_some()
            && matches!(
                response.status(),
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
            )
        {
            self.credentials
                .disable_registry_credentials(registry_for_token_endpoint(&challenge.realm));
            response = self.http.get(url.clone()).send().await?;
        }

        let status = response.status();
        if !status.is_success() {
            return Err(RegistryError::from_status(status, url.as_str()));
        }

        let body: TokenResponse = response.json().await?;
        body.token
            .or(body.access_token)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| RegistryError::Parse("token response carried no token".to_string()))
    }

    /// Digest the registry currently serves for `tag`
    ///
    /// `Ok(None)` on any non-success status except 429, which is reported so
    /// the caller can back off.
    pub async fn get_digest_for_tag(
        &self,
        repository: &str,
        tag: &str,
    ) -> RegistryResult<Option<String>> {
        let url = format!("{}/v2/{}/manifests/{}", self.base_url, repository, tag);
        let accept = MANIFEST_MEDIA_TYPES.join(", ");
        debug!("Resolving digest via HEAD {}", url);

        let response = self
            .fetch_with_auth(Method::HEAD, &url, Some(&accept), repository)
            .await?;
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(RegistryError::RateLimited { url });
        }
        if !status.is_success() {
            debug!("HEAD {} returned {}", url, status);
            return Ok(None);
        }

        Ok(response
            .headers()
            .get("docker-content-digest")
            .and_then(|h| h.to_str().ok())
            .map(str::to_string))
    }

    async fn get_manifest(&self, repository: &str, reference: &str) -> RegistryResult<Option<Manifest>> {
        let url = format!("{}/v2/{}/manifests/{}", self.base_url, repository, reference);
        let accept = MANIFEST_MEDIA_TYPES.join(", ");

        let response = self
            .fetch_with_auth(Method::GET, &url, Some(&accept), repository)
            .await?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(RegistryError::from_status(status, url));
        }

        let body = response.bytes().await?;
        match serde_json::from_slice::<Manifest>(&body) {
            Ok(manifest) => Ok(Some(manifest)),
            Err(e) => {
                warn!("Unrecognised manifest at {}: {}", url, e);
                Ok(None)
            }
        }
    }

    async fn labels_from_config(
        &self,
        repository: &str,
        config_digest: &str,
    ) -> RegistryResult<Option<String>> {
        let url = format!("{}/v2/{}/blobs/{}", self.base_url, repository, config_digest);
        let response = self
            .fetch_with_auth(Method::GET, &url, None, repository)
            .await?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(RegistryError::from_status(status, url));
        }

        let blob: ConfigBlob = match response.json().await {
            Ok(blob) => blob,
            Err(e) => {
                warn!("Unreadable config blob at {}: {}", url, e);
                return Ok(None);
            }
        };
        Ok(blob
            .config
            .and_then(|c| c.labels)
            .and_then(|labels| version_from_annotations(&labels)))
    }

    /// Human version recorded for a manifest digest
    ///
    /// Looks at the manifest's annotations, then each index entry's
    /// annotations, then the preferred platform manifest and its config
    /// labels. `Ok(None)` when nothing is recorded anywhere.
    pub async fn get_version_from_digest(
        &self,
        repository: &str,
        digest: &str,
    ) -> RegistryResult<Option<String>> {
        let Some(manifest) = self.get_manifest(repository, digest).await? else {
            return Ok(None);
        };

        if let Some(version) = version_from_annotations(manifest.annotations()) {
            trace!("Version {} from top-level annotations of {}", version, digest);
            return Ok(Some(version));
        }

        let image = match manifest {
            Manifest::Image(image) => image,
            Manifest::Index(index) => {
                if let Some(version) = index
                    .manifests
                    .iter()
                    .find_map(|m| version_from_annotations(&m.annotations))
                {
                    return Ok(Some(version));
                }

                let Some(platform) = index.preferred_platform() else {
                    return Ok(None);
                };
                match self.get_manifest(repository, &platform.digest).await? {
                    Some(Manifest::Image(image)) => {
                        if let Some(version) = version_from_annotations(&image.annotations) {
                            return Ok(Some(version));
                        }
                        image
                    }
                    _ => return Ok(None),
                }
            }
        };

        self.labels_from_config(repository, &image.config.digest)
            .await
    }

    /// Semver-like tags with their digests, most specific first
    ///
    /// Lists every tag (up to ten pages), keeps the 50 most specific version
    /// tags and looks up each one's digest. This costs one request per tag.
    pub async fn list_tags(&self, repository: &str) -> RegistryResult<Vec<TagInfo>> {
        let mut url = format!(
            "{}/v2/{}/tags/list?n={}",
            self.base_url, repository, TAG_PAGE_SIZE
        );
        let mut names = Vec::new();

        for _ in 0..MAX_TAG_PAGES {
            debug!("Listing tags from: {}", url);
            let response = self
                .fetch_with_auth(Method::GET, &url, None, repository)
                .await?;
            let status = response.status();
            if status == StatusCode::NOT_FOUND {
                break;
            }
            if !status.is_success() {
                return Err(RegistryError::from_status(status, url));
            }

            let next = response
                .headers()
                .get(LINK)
                .and_then(|h| h.to_str().ok())
                .and_then(|link| parse_link_header(link, &self.base_url));

            let page: TagsList = response.json().await?;
            names.extend(page.tags.unwrap_or_default());

            match next {
                Some(next) => url = next,
                None => break,
            }
        }

        names.retain(|t| is_semver_like(t));
        sort_by_specificity(&mut names);
        names.truncate(MAX_LISTED_TAGS);
        trace!("Resolving {} version tags of {}", names.len(), repository);

        let found: Vec<Option<TagInfo>> = stream::iter(names)
            .map(|name| async move {
                match self.get_digest_for_tag(repository, &name).await {
                    Ok(Some(digest)) => Some(TagInfo::new(name, digest)),
                    Ok(None) => None,
                    Err(e) => {
                        debug!("Skipping tag {}: {}", name, e);
                        None
                    }
                }
            })
            .buffered(TAG_LOOKUP_CONCURRENCY)
            .collect()
            .await;

        Ok(found.into_iter().flatten().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_from_annotations_priority() {
        let mut annotations = HashMap::new();
        annotations.insert("version".to_string(), "3".to_string());
        annotations.insert(
            "org.opencontainers.image.version".to_string(),
            "3.1.4".to_string(),
        );
        assert_eq!(version_from_annotations(&annotations).as_deref(), Some("3.1.4"));

        annotations.remove("org.opencontainers.image.version");
        assert_eq!(version_from_annotations(&annotations).as_deref(), Some("3"));
    }

    #[test]
    fn test_version_from_annotations_skips_blank() {
        let mut annotations = HashMap::new();
        annotations.insert("org.opencontainers.image.version".to_string(), " ".to_string());
        annotations.insert("org.label-schema.version".to_string(), "2.0".to_string());
        assert_eq!(version_from_annotations(&annotations).as_deref(), Some("2.0"));
    }

    #[test]
    fn test_manifest_shape_detection() {
        let index: Manifest = serde_json::from_str(
            r#"{"schemaVersion":2,"manifests":[{"digest":"sha256:a","platform":{"os":"linux","architecture":"arm64"}},{"digest":"sha256:b","platform":{"os":"linux","architecture":"amd64"}}]}"#,
        )
        .unwrap();
        match index {
            Manifest::Index(index) => {
                assert_eq!(index.preferred_platform().unwrap().digest, "sha256:b");
            }
            Manifest::Image(_) => panic!("expected index"),
        }

        let image: Manifest = serde_json::from_str(
            r#"{"schemaVersion":2,"config":{"digest":"sha256:cfg"},"layers":[]}"#,
        )
        .unwrap();
        assert!(matches!(image, Manifest::Image(_)));
    }

    #[test]
    fn test_preferred_platform_skips_attestations() {
        let index: ImageIndex = serde_json::from_str(
            r#"{"manifests":[{"digest":"sha256:att","platform":{"os":"unknown","architecture":"unknown"}},{"digest":"sha256:arm","platform":{"os":"linux","architecture":"arm64"}}]}"#,
        )
        .unwrap();
        assert_eq!(index.preferred_platform().unwrap().digest, "sha256:arm");
    }
}
