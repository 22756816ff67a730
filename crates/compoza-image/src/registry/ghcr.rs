//! GitHub Packages API for container images hosted on GHCR (and mirrored on lscr.io)
//!
//! Every package version is one manifest digest carrying zero or more tags,
//! which gives a tag -> digest map in a handful of requests.

use super::{parse_link_header, TagInfo};
use crate::credentials::CredentialProvider;
use crate::error::{RegistryError, RegistryResult};
use crate::reference::RegistryType;
use reqwest::header::{ACCEPT, LINK};
use reqwest::StatusCode;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

const PER_PAGE: usize = 100;
const MAX_PAGES: usize = 10;

#[derive(Debug, Deserialize)]
struct PackageVersion {
    /// The manifest digest
    name: String,
    #[serde(default)]
    metadata: Option<VersionMetadata>,
}

#[derive(Debug, Deserialize)]
struct VersionMetadata {
    #[serde(default)]
    container: Option<ContainerMetadata>,
}

#[derive(Debug, Deserialize)]
struct ContainerMetadata {
    #[serde(default)]
    tags: Vec<String>,
}

impl PackageVersion {
    fn tags(&self) -> &[String] {
        self.metadata
            .as_ref()
            .and_then(|m| m.container.as_ref())
            .map(|c| c.tags.as_slice())
            .unwrap_or(&[])
    }
}

/// Owner kind in the Packages API path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Owner {
    Org,
    User,
}

impl Owner {
    fn path(self) -> &'static str {
        match self {
            Owner::Org => "orgs",
            Owner::User => "users",
        }
    }
}

/// Outcome of listing one owner's package versions
enum Listing {
    Found(Vec<TagInfo>),
    NotFound,
}

/// Client for `api.github.com/{orgs|users}/{ns}/packages/container/{repo}/versions`
#[derive(Clone)]
pub struct GhcrClient {
    http: reqwest::Client,
    base_url: String,
    credentials: Arc<CredentialProvider>,
}

impl GhcrClient {
    pub fn new(http: reqwest::Client, base_url: &str, credentials: Arc<CredentialProvider>) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
        }
    }

    /// Tag -> digest pairs for a package
    ///
    /// Tries the organisation endpoint first and the user endpoint on 404.
    /// Stops paging as soon as `tracked_tag` and `current_digest` have both
    /// been seen. Returns `None` when no token is configured (the Packages
    /// API requires one) or the package is unknown under both owners. A 401
    /// or 403 disables the GHCR token for the session and returns what was gathered.
    pub async fn list_tag_digests(
        &self,
        namespace: &str,
        repo: &str,
        tracked_tag: &str,
        current_digest: Option<&str>,
    ) -> RegistryResult<Option<Vec<TagInfo>>> {
        let Some(creds) = self.credentials.for_registry(RegistryType::Ghcr) else {
            debug!("No GHCR token configured, skipping packages API for {}/{}", namespace, repo);
            return Ok(None);
        };

        for owner in [Owner::Org, Owner::User] {
            match self
                .list_owner(owner, namespace, repo, &creds.token, tracked_tag, current_digest)
                .await?
            {
                Listing::Found(tags) => return Ok(Some(tags)),
                Listing::NotFound => {
                    debug!("Package {}/{} not found under /{}", namespace, repo, owner.path());
                }
            }
        }
        Ok(None)
    }

    async fn list_owner(
        &self,
        owner: Owner,
        namespace: &str,
        repo: &str,
        token: &str,
        tracked_tag: &str,
        current_digest: Option<&str>,
    ) -> RegistryResult<Listing> {
        let package = repo.replace('/', "%2F");
        let mut url = format!(
            "{}/{}/{}/packages/container/{}/versions?per_page={}",
            self.base_url,
            owner.path(),
            namespace,
            package,
            PER_PAGE
        );
        let mut tags = Vec::new();
        let mut seen_tag = false;
        let mut seen_digest = current_digest.is_none();

        for page in 0..MAX_PAGES {
            debug!("Listing GHCR package versions from: {}", url);
            let response = self
                .http
                .get(&url)
                .bearer_auth(token)
                .header(ACCEPT, "application/vnd.github+json")
                .send()
                .await?;
            let status = response.status();

            if status == StatusCode::NOT_FOUND && page == 0 {
                return Ok(Listing::NotFound);
            }
            if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
                warn!("GHCR token rejected while listing {}/{}", namespace, repo);
                self.credentials
                    .disable_registry_credentials(RegistryType::Ghcr);
                return Ok(Listing::Found(tags));
            }
            if !status.is_success() {
                return Err(RegistryError::from_status(status, url));
            }

            let next = response
                .headers()
                .get(LINK)
                .and_then(|h| h.to_str().ok())
                .and_then(|link| parse_link_header(link, &self.base_url));

            let versions: Vec<PackageVersion> = response.json().await?;
            for version in &versions {
                if Some(version.name.as_str()) == current_digest {
                    seen_digest = true;
                }
                for tag in version.tags() {
                    if tag == tracked_tag {
                        seen_tag = true;
                    }
                    tags.push(TagInfo::new(tag, &version.name));
                }
            }

            if seen_tag && seen_digest {
                debug!("Found tracked tag and local digest after {} page(s)", page + 1);
                break;
            }
            match next {
                Some(next) => url = next,
                None => break,
            }
        }

        Ok(Listing::Found(tags))
    }
}
