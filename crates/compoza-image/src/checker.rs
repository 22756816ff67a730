//! Image update checker
//!
//! Combines local digest discovery, the update cache, the registry clients
//! and the version resolver into one result per image. Cached results are
//! returned immediately; stale ones are refreshed in the background.

use crate::cache::{CachedUpdate, CheckStatus, UpdateCache, VersionStatus};
use crate::detached::{spawn_detached, Detached};
use crate::engine::{DockerEngine, ImageDetails};
use crate::reference::{normalize_image_name, ImageRef};
use crate::registry::RegistryClients;
use crate::resolver::VersionResolver;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// One image's update status as handed to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageUpdateInfo {
    #[serde(flatten)]
    pub update: CachedUpdate,
    /// Served from cache rather than checked during this call
    pub from_cache: bool,
}

impl ImageUpdateInfo {
    fn fresh(update: CachedUpdate) -> Self {
        Self {
            update,
            from_cache: false,
        }
    }

    fn cached(update: CachedUpdate) -> Self {
        Self {
            update,
            from_cache: true,
        }
    }
}

/// Latest digest from the fallback path
#[derive(Debug, Default)]
struct LatestDigest {
    digest: Option<String>,
    rate_limited: bool,
}

#[derive(Clone)]
pub struct ImageUpdateChecker {
    engine: Arc<dyn DockerEngine>,
    registries: RegistryClients,
    resolver: VersionResolver,
    cache: Arc<UpdateCache>,
}

impl ImageUpdateChecker {
    pub fn new(
        engine: Arc<dyn DockerEngine>,
        registries: RegistryClients,
        resolver: VersionResolver,
        cache: Arc<UpdateCache>,
    ) -> Self {
        Self {
            engine,
            registries,
            resolver,
            cache,
        }
    }

    pub fn cache(&self) -> &Arc<UpdateCache> {
        &self.cache
    }

    /// Check every image concurrently
    ///
    /// `images` maps an image name to the IDs of local images that running
    /// containers were created from. Names are normalized first, so
    /// `docker.io/library/nginx` and `nginx` are one image. A failure for one
    /// image yields an `error` entry and never affects the others.
    pub async fn check_image_updates(
        &self,
        images: HashMap<String, HashSet<String>>,
    ) -> Vec<ImageUpdateInfo> {
        let mut normalized: HashMap<String, HashSet<String>> = HashMap::new();
        for (name, ids) in images {
            normalized
                .entry(normalize_image_name(&name))
                .or_default()
                .extend(ids);
        }

        let results = futures::future::join_all(
            normalized
                .into_iter()
                .map(|(image, ids)| self.check_image(image, ids)),
        )
        .await;

        let updates = results.iter().filter(|r| r.update.update_available).count();
        let cached = results.iter().filter(|r| r.from_cache).count();
        info!(
            "Checked {} image(s): {} update(s) available, {} served from cache",
            results.len(),
            updates,
            cached
        );
        results
    }

    async fn check_image(&self, image: String, image_ids: HashSet<String>) -> ImageUpdateInfo {
        let reference = ImageRef::parse(&image);

        if reference.is_pinned() {
            debug!("{} is pinned to a digest, never outdated", image);
            let mut entry = CachedUpdate::new(&image, CheckStatus::Checked);
            entry.current_digest = reference.digest.clone();
            entry.source_url = reference.source_url();
            self.cache.set_cached_update(entry.clone(), None);
            return ImageUpdateInfo::fresh(entry);
        }

        if let Some(cached) = self.cache.get_cached_update(&image) {
            if self.cache.begin_check(&image) {
                debug!("Serving stale entry for {} while refreshing", image);
                self.spawn_refresh(image, image_ids);
            }
            return ImageUpdateInfo::cached(cached);
        }

        if !self.cache.begin_check(&image) {
            debug!("{} is already being checked", image);
            let mut placeholder = CachedUpdate::new(&image, CheckStatus::Unknown);
            placeholder.source_url = reference.source_url();
            return ImageUpdateInfo::fresh(placeholder);
        }

        ImageUpdateInfo::fresh(self.run_check(&image, &image_ids).await)
    }

    fn spawn_refresh(&self, image: String, image_ids: HashSet<String>) -> Detached {
        let checker = self.clone();
        spawn_detached(format!("refresh {}", image), async move {
            checker.run_check(&image, &image_ids).await;
            Ok(())
        })
    }

    /// Check `image` against its registry; the caller holds the pending marker
    async fn run_check(&self, image: &str, image_ids: &HashSet<String>) -> CachedUpdate {
        let outcome = self.check_registry(image, image_ids).await;
        self.cache.mark_check_complete(image);

        match outcome {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Update check for {} failed: {:#}", image, e);
                let mut entry = CachedUpdate::new(image, CheckStatus::Error);
                entry.source_url = ImageRef::parse(image).source_url();
                self.cache.set_cached_update(entry.clone(), None);
                entry
            }
        }
    }

    async fn check_registry(
        &self,
        image: &str,
        image_ids: &HashSet<String>,
    ) -> Result<CachedUpdate> {
        let reference = ImageRef::parse(image);
        let LocalDigests {
            primary: primary_digest,
            all: local_digests,
        } = self.discover_local_digests(&reference, image_ids).await;
        debug!("{} has {} local digest(s)", image, local_digests.len());

        let mut rate_limited = false;
        match self
            .registries
            .query_registry(image, primary_digest.as_deref())
            .await
        {
            Ok(Some(result)) => {
                let mut entry = CachedUpdate::new(image, status_for(&local_digests));
                entry.source_url = reference.source_url();
                entry.latest_digest = Some(result.latest_digest.clone());
                entry.matched_tags = result.matched_tags;
                entry.version_status = VersionStatus::Resolved;

                if local_digests.contains(&result.latest_digest) {
                    // Another local container already runs the newest digest
                    entry.update_available = false;
                    entry.current_digest = Some(result.latest_digest);
                    entry.current_version = result.latest_version.clone();
                } else {
                    entry.update_available = !local_digests.is_empty();
                    entry.current_digest = primary_digest;
                    entry.current_version = result.current_version;
                }
                entry.latest_version = result.latest_version;

                self.cache.set_cached_update(entry.clone(), None);
                return Ok(entry);
            }
            Ok(None) => debug!("No consolidated answer for {}, using digest lookup", image),
            Err(e) => {
                rate_limited = e.is_rate_limited();
                debug!("Consolidated query for {} failed: {}", image, e);
            }
        }

        let latest = self.get_latest_digest(&reference).await?;
        rate_limited |= latest.rate_limited;

        let mut entry = CachedUpdate::new(image, CheckStatus::Unknown);
        entry.source_url = reference.source_url();
        entry.rate_limited = rate_limited;

        if let Some(latest_digest) = latest.digest {
            entry.status = status_for(&local_digests);
            entry.update_available =
                !local_digests.is_empty() && !local_digests.contains(&latest_digest);
            entry.current_digest = if local_digests.contains(&latest_digest) {
                Some(latest_digest.clone())
            } else {
                primary_digest
            };
            entry.latest_digest = Some(latest_digest);
            entry.version_status = VersionStatus::Pending;
        } else {
            entry.current_digest = primary_digest;
        }

        let ttl = rate_limited.then_some(self.cache.settings().rate_limited_ttl);
        if rate_limited {
            warn!("Registry rate limit hit for {}, backing off", image);
        }
        self.cache.set_cached_update(entry.clone(), ttl);

        if entry.version_status == VersionStatus::Pending {
            self.spawn_version_resolution(reference, &entry);
        }
        Ok(entry)
    }

    fn spawn_version_resolution(&self, reference: ImageRef, entry: &CachedUpdate) -> Detached {
        let resolver = self.resolver.clone();
        let cache = self.cache.clone();
        let image = entry.image.clone();
        let current = entry.current_digest.clone();
        let latest = entry.latest_digest.clone();

        spawn_detached(format!("resolve versions {}", image), async move {
            let versions = resolver
                .resolve_versions(&reference, current.as_deref(), latest.as_deref())
                .await;
            if versions.current_version.is_none() && versions.latest_version.is_none() {
                debug!("No version information found for {}", image);
                cache.mark_version_resolution_failed(&image);
            } else {
                cache.update_cached_versions(
                    &image,
                    versions.current_version,
                    versions.latest_version,
                );
            }
            Ok(())
        })
    }

    /// Digest the registry currently serves for the tracked tag
    ///
    /// The engine is asked first since it may hold registry auth; a direct
    /// OCI lookup follows when it can't answer. Rate limits, rejected
    /// credentials and missing repositories leave the digest unknown; any
    /// other registry failure is an error.
    async fn get_latest_digest(&self, reference: &ImageRef) -> Result<LatestDigest> {
        let mut latest = LatestDigest::default();
        let tagged = reference.to_string();

        match self.engine.distribution_digest(&tagged).await {
            Ok(Some(digest)) => {
                latest.digest = Some(digest);
                return Ok(latest);
            }
            Ok(None) => {}
            Err(e) => {
                latest.rate_limited = e.is_rate_limited();
                debug!("Engine could not resolve {}: {}", tagged, e);
            }
        }

        let oci = self.registries.oci_for(reference);
        match oci
            .get_digest_for_tag(&reference.repository_path(), &reference.tag)
            .await
        {
            Ok(digest) => latest.digest = digest,
            Err(e) if e.is_rate_limited() => latest.rate_limited = true,
            Err(e) if e.is_auth_failure() || e.is_not_found() => {
                debug!("Registry has no answer for {}: {}", tagged, e);
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to resolve latest digest of {}", tagged))
            }
        }
        Ok(latest)
    }

    /// Every digest a local image for this repository was pulled as
    ///
    /// The primary digest is the first one found on a container's image,
    /// visiting image IDs in sorted order.
    async fn discover_local_digests(
        &self,
        reference: &ImageRef,
        image_ids: &HashSet<String>,
    ) -> LocalDigests {
        let name = reference.name();
        let mut digests = LocalDigests::default();

        let mut ids: Vec<&String> = image_ids.iter().collect();
        ids.sort();
        for id in ids {
            match self.engine.inspect_image(id).await {
                Ok(Some(details)) => digests.extend(repo_digests_for(&details, &name)),
                Ok(None) => debug!("Image {} no longer exists locally", id),
                Err(e) => debug!("Failed to inspect {}: {}", id, e),
            }
        }
        if !digests.all.is_empty() {
            return digests;
        }

        let tagged = reference.to_string();
        match self.engine.list_images(&tagged).await {
            Ok(images) => {
                for details in &images {
                    digests.extend(repo_digests_for(details, &name));
                }
            }
            Err(e) => debug!("Failed to list images for {}: {}", tagged, e),
        }
        if !digests.all.is_empty() {
            return digests;
        }

        match self.engine.inspect_image(&tagged).await {
            Ok(Some(details)) => digests.extend(repo_digests_for(&details, &name)),
            Ok(None) => debug!("{} is not present locally", tagged),
            Err(e) => debug!("Failed to inspect {}: {}", tagged, e),
        }
        digests
    }

    /// Wait until version resolution for `images` settles or `timeout` passes
    pub async fn wait_for_versions(&self, images: &[String], timeout: Duration) -> Vec<CachedUpdate> {
        let poll = Duration::from_millis(250);
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let entries: Vec<CachedUpdate> = images
                .iter()
                .filter_map(|image| self.cache.get_cached_update(&normalize_image_name(image)))
                .collect();
            let pending = entries
                .iter()
                .any(|e| e.version_status == VersionStatus::Pending);
            if !pending || tokio::time::Instant::now() >= deadline {
                return entries;
            }
            tokio::time::sleep(poll).await;
        }
    }
}

#[derive(Debug, Default)]
struct LocalDigests {
    primary: Option<String>,
    all: BTreeSet<String>,
}

impl LocalDigests {
    fn extend(&mut self, digests: Vec<String>) {
        if self.primary.is_none() {
            self.primary = digests.first().cloned();
        }
        self.all.extend(digests);
    }
}

fn status_for(local_digests: &BTreeSet<String>) -> CheckStatus {
    if local_digests.is_empty() {
        CheckStatus::Unknown
    } else {
        CheckStatus::Checked
    }
}

/// Digests from `RepoDigests`, preferring entries for `name`
fn repo_digests_for(details: &ImageDetails, name: &str) -> Vec<String> {
    let parsed: Vec<(&str, &str)> = details
        .repo_digests
        .iter()
        .filter_map(|entry| entry.split_once('@'))
        .collect();

    let matching: Vec<String> = parsed
        .iter()
        .filter(|(repo, _)| ImageRef::parse(repo).name() == name)
        .map(|(_, digest)| digest.to_string())
        .collect();
    if !matching.is_empty() {
        return matching;
    }
    parsed
        .first()
        .map(|(_, digest)| vec![digest.to_string()])
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repo_digests_prefers_matching_repository() {
        let details = ImageDetails {
            id: "sha256:img".to_string(),
            repo_tags: vec![],
            repo_digests: vec![
                "mirror.local/nginx@sha256:mirror".to_string(),
                "nginx@sha256:hub".to_string(),
                "docker.io/library/nginx@sha256:hub2".to_string(),
            ],
        };
        assert_eq!(
            repo_digests_for(&details, "nginx"),
            vec!["sha256:hub".to_string(), "sha256:hub2".to_string()]
        );
    }

    #[test]
    fn test_repo_digests_falls_back_to_first() {
        let details = ImageDetails {
            id: "sha256:img".to_string(),
            repo_tags: vec![],
            repo_digests: vec!["retagged/app@sha256:one".to_string()],
        };
        assert_eq!(repo_digests_for(&details, "nginx"), vec!["sha256:one".to_string()]);
    }

    #[test]
    fn test_status_for_local_digests() {
        assert_eq!(status_for(&BTreeSet::new()), CheckStatus::Unknown);
        assert_eq!(
            status_for(&BTreeSet::from(["sha256:a".to_string()])),
            CheckStatus::Checked
        );
    }
}
