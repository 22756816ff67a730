//! Consolidated registry query
//!
//! One paginated tag -> digest listing answers every question the checker
//! has: the digest behind the tracked tag, whether that differs from what
//! is running, and which version tags describe both digests.

use super::{RegistryClients, TagInfo};
use crate::error::RegistryResult;
use crate::reference::{ImageRef, RegistryType};
use crate::version::{best_semver_tag, sort_by_specificity};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Which tag listing produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistrySource {
    DockerHub,
    Ghcr,
}

/// Everything derived from one tag listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryQueryResult {
    pub latest_digest: String,
    pub update_available: bool,
    pub current_version: Option<String>,
    pub latest_version: Option<String>,
    /// Tags at the latest digest (or the current one when none), most specific first
    pub matched_tags: Vec<String>,
    pub source: RegistrySource,
}

fn tags_at<'a>(tags: &'a [TagInfo], digest: &'a str) -> impl Iterator<Item = &'a str> {
    tags.iter()
        .filter(move |t| t.digest == digest)
        .map(|t| t.name.as_str())
}

/// Derive a query result from a tag listing
///
/// `None` when the tracked tag is absent, so the caller can fall back to a
/// per-tag manifest lookup.
pub fn derive_query_result(
    tags: &[TagInfo],
    tracked_tag: &str,
    current_digest: Option<&str>,
    source: RegistrySource,
) -> Option<RegistryQueryResult> {
    let latest_digest = tags.iter().find(|t| t.name == tracked_tag)?.digest.clone();

    let update_available = current_digest.is_some_and(|current| current != latest_digest);
    let current_version = current_digest.and_then(|current| best_semver_tag(tags_at(tags, current)));
    let latest_version = best_semver_tag(tags_at(tags, &latest_digest));

    let mut matched_tags: Vec<String> = tags_at(tags, &latest_digest).map(str::to_string).collect();
    if matched_tags.is_empty() {
        if let Some(current) = current_digest {
            matched_tags = tags_at(tags, current).map(str::to_string).collect();
        }
    }
    matched_tags.dedup();
    sort_by_specificity(&mut matched_tags);

    Some(RegistryQueryResult {
        latest_digest,
        update_available,
        current_version,
        latest_version,
        matched_tags,
        source,
    })
}

impl RegistryClients {
    /// Fast path: tag, digest and versions from one listing
    ///
    /// Only Docker Hub and GitHub-hosted registries (ghcr.io, lscr.io) have a
    /// listing API that carries digests; everything else gets `Ok(None)`.
    pub async fn query_registry(
        &self,
        image_name: &str,
        current_digest: Option<&str>,
    ) -> RegistryResult<Option<RegistryQueryResult>> {
        let image = ImageRef::parse(image_name);

        let (tags, source) = match image.registry_type() {
            RegistryType::DockerHub => {
                let Some(tags) = self
                    .docker_hub()
                    .list_tag_digests(&image.namespace, &image.repository)
                    .await?
                else {
                    return Ok(None);
                };
                (tags, RegistrySource::DockerHub)
            }
            RegistryType::Ghcr | RegistryType::Lscr => {
                // Packages API owners are single path segments; deeper
                // namespaces become part of the package name.
                let (owner, package) = match image.namespace.split_once('/') {
                    Some((owner, rest)) => (owner.to_string(), format!("{}/{}", rest, image.repository)),
                    None if image.namespace.is_empty() => return Ok(None),
                    None => (image.namespace.clone(), image.repository.clone()),
                };
                let Some(tags) = self
                    .ghcr()
                    .list_tag_digests(&owner, &package, &image.tag, current_digest)
                    .await?
                else {
                    return Ok(None);
                };
                (tags, RegistrySource::Ghcr)
            }
            RegistryType::Unknown => return Ok(None),
        };

        let result = derive_query_result(&tags, &image.tag, current_digest, source);
        if result.is_none() {
            debug!(
                "Tag {} not among {} listed tags for {}, falling back",
                image.tag,
                tags.len(),
                image.name()
            );
        }
        Ok(result)
    }
}
