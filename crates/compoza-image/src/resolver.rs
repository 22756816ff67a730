//! Digest to human version resolution

use crate::reference::ImageRef;
use crate::registry::RegistryClients;
use crate::version::{best_semver_tag, is_semver_like};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Human versions for the running and the upstream digest
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedVersions {
    pub current_version: Option<String>,
    pub latest_version: Option<String>,
}

/// Maps digests to version strings
#[derive(Clone)]
pub struct VersionResolver {
    registries: RegistryClients,
    tag_scan_fallback: bool,
}

impl VersionResolver {
    pub fn new(registries: RegistryClients) -> Self {
        Self {
            registries,
            tag_scan_fallback: false,
        }
    }

    /// Also scan the registry's version tags when annotations say nothing
    pub fn with_tag_scan_fallback(mut self, enabled: bool) -> Self {
        self.tag_scan_fallback = enabled;
        self
    }

    /// Resolve versions for both digests
    ///
    /// A semver-like tracked tag is its own answer. Otherwise both digests are
    /// looked up concurrently in manifest annotations and config labels. A
    /// failed lookup leaves that side empty; only transport problems are logged.
    pub async fn resolve_versions(
        &self,
        image: &ImageRef,
        current_digest: Option<&str>,
        latest_digest: Option<&str>,
    ) -> ResolvedVersions {
        if is_semver_like(&image.tag) {
            return ResolvedVersions {
                current_version: Some(image.tag.clone()),
                latest_version: Some(image.tag.clone()),
            };
        }

        let oci = self.registries.oci_for(image);
        let repository = image.repository_path();

        let lookup = |digest: Option<&str>| {
            let oci = oci.clone();
            let repository = repository.clone();
            let digest = digest.map(str::to_string);
            async move {
                let digest = digest?;
                match oci.get_version_from_digest(&repository, &digest).await {
                    Ok(version) => version,
                    Err(e) => {
                        warn!("Version lookup for {}@{} failed: {}", repository, digest, e);
                        None
                    }
                }
            }
        };

        let (current_version, latest_version) =
            futures::join!(lookup(current_digest), lookup(latest_digest));
        let mut versions = ResolvedVersions {
            current_version,
            latest_version,
        };

        let missing = (current_digest.is_some() && versions.current_version.is_none())
            || (latest_digest.is_some() && versions.latest_version.is_none());
        if missing && self.tag_scan_fallback {
            self.fill_from_tag_scan(image, current_digest, latest_digest, &mut versions)
                .await;
        }

        debug!(
            "Resolved {}: current={:?} latest={:?}",
            image, versions.current_version, versions.latest_version
        );
        versions
    }

    async fn fill_from_tag_scan(
        &self,
        image: &ImageRef,
        current_digest: Option<&str>,
        latest_digest: Option<&str>,
        versions: &mut ResolvedVersions,
    ) {
        let tags = match self
            .registries
            .oci_for(image)
            .list_tags(&image.repository_path())
            .await
        {
            Ok(tags) => tags,
            Err(e) => {
                warn!("Tag scan for {} failed: {}", image.name(), e);
                return;
            }
        };

        let best_at = |digest: &str| {
            best_semver_tag(
                tags.iter()
                    .filter(|t| t.digest == digest)
                    .map(|t| t.name.as_str()),
            )
        };

        if versions.current_version.is_none() {
            versions.current_version = current_digest.and_then(best_at);
        }
        if versions.latest_version.is_none() {
            versions.latest_version = latest_digest.and_then(best_at);
        }
    }
}
