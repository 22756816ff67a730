//! Docker Hub v2 repository tags API

use super::TagInfo;
use crate::error::{RegistryError, RegistryResult};
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, trace};

const PAGE_SIZE: usize = 100;
const MAX_TAGS: usize = 200;
const MAX_PAGES: usize = 2;

#[derive(Debug, Deserialize)]
struct TagsPage {
    #[serde(default)]
    next: Option<String>,
    #[serde(default)]
    results: Vec<HubTag>,
}

#[derive(Debug, Clone, Deserialize)]
struct HubTag {
    name: String,
    /// Manifest list digest, what `RepoDigests` records locally
    #[serde(default)]
    digest: Option<String>,
    #[serde(default)]
    images: Vec<HubImage>,
}

#[derive(Debug, Clone, Deserialize)]
struct HubImage {
    #[serde(default)]
    architecture: Option<String>,
    #[serde(default)]
    os: Option<String>,
    #[serde(default)]
    digest: Option<String>,
}

impl HubTag {
    /// linux/amd64, then any linux image, then whatever comes first
    fn platform_digest(&self) -> Option<&str> {
        let with_digest = || self.images.iter().filter(|i| i.digest.is_some());

        with_digest()
            .find(|i| i.os.as_deref() == Some("linux") && i.architecture.as_deref() == Some("amd64"))
            .or_else(|| with_digest().find(|i| i.os.as_deref() == Some("linux")))
            .or_else(|| with_digest().next())
            .and_then(|i| i.digest.as_deref())
    }

    fn index_digest(&self) -> Option<&str> {
        self.digest.as_deref().or_else(|| self.platform_digest())
    }
}

/// Client for `hub.docker.com/v2/repositories/{ns}/{repo}/tags`
#[derive(Clone)]
pub struct DockerHubClient {
    http: reqwest::Client,
    base_url: String,
}

impl DockerHubClient {
    pub fn new(http: reqwest::Client, base_url: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Tags with their linux/amd64 digest, newest first, capped at 200
    ///
    /// An unknown repository yields an empty list.
    pub async fn list_tags(&self, namespace: &str, repo: &str) -> RegistryResult<Vec<TagInfo>> {
        let tags = self.fetch_pages(namespace, repo, usize::MAX).await?;
        Ok(tags
            .iter()
            .filter_map(|t| t.platform_digest().map(|d| TagInfo::new(&t.name, d)))
            .collect())
    }

    /// Tags with the digest a local pull records (manifest list when present)
    ///
    /// Limited to two pages; `None` when the repository does not exist.
    pub async fn list_tag_digests(
        &self,
        namespace: &str,
        repo: &str,
    ) -> RegistryResult<Option<Vec<TagInfo>>> {
        let tags = self.fetch_pages(namespace, repo, MAX_PAGES).await?;
        if tags.is_empty() {
            return Ok(None);
        }
        Ok(Some(
            tags.iter()
                .filter_map(|t| t.index_digest().map(|d| TagInfo::new(&t.name, d)))
                .collect(),
        ))
    }

    async fn fetch_pages(
        &self,
        namespace: &str,
        repo: &str,
        max_pages: usize,
    ) -> RegistryResult<Vec<HubTag>> {
        let mut url = format!(
            "{}/v2/repositories/{}/{}/tags?page_size={}",
            self.base_url, namespace, repo, PAGE_SIZE
        );
        let mut tags = Vec::new();
        let mut pages = 0;

        loop {
            debug!("Listing Docker Hub tags from: {}", url);
            let response = self.http.get(&url).send().await?;
            let status = response.status();

            if status == StatusCode::NOT_FOUND {
                return Ok(Vec::new());
            }
            if !status.is_success() {
                return Err(RegistryError::from_status(status, url));
            }

            let page: TagsPage = response.json().await?;
            tags.extend(page.results);
            pages += 1;

            if tags.len() >= MAX_TAGS || pages >= max_pages {
                break;
            }
            match page.next {
                Some(next) if !next.is_empty() => url = next,
                _ => break,
            }
        }

        tags.truncate(MAX_TAGS);
        trace!("Docker Hub returned {} tags for {}/{}", tags.len(), namespace, repo);
        Ok(tags)
    }
}
