//! # compoza-image
//!
//! Image update detection for Compoza:
//! - Image reference parsing and registry classification
//! - Per-registry credentials with session-scoped disabling
//! - Docker Hub, GitHub Packages and OCI Distribution clients
//! - Digest to version resolution
//! - An in-memory update cache with in-flight tracking
//! - The [`ImageUpdateChecker`] that ties them together
//!
//! ## Example
//!
//! ```no_run
//! use compoza_image::{
//!     build_http_client, CacheSettings, CredentialProvider, DockerCli, ImageUpdateChecker,
//!     RegistryClients, UpdateCache, VersionResolver,
//! };
//! use compoza_core::RuntimeConfig;
//! use std::collections::{HashMap, HashSet};
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = RuntimeConfig::default();
//! let http = build_http_client(&config.network)?;
//! let credentials = Arc::new(CredentialProvider::new(config.credentials.clone()));
//! let registries = RegistryClients::new(http, config.registries.clone(), credentials);
//! let cache = Arc::new(UpdateCache::new(CacheSettings::from(&config.update_check)));
//!
//! let checker = ImageUpdateChecker::new(
//!     Arc::new(DockerCli::new()),
//!     registries.clone(),
//!     VersionResolver::new(registries),
//!     cache,
//! );
//!
//! let images = HashMap::from([("nginx:latest".to_string(), HashSet::new())]);
//! for info in checker.check_image_updates(images).await {
//!     println!("{}: update available = {}", info.update.image, info.update.update_available);
//! }
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod checker;
pub mod credentials;
pub mod detached;
pub mod engine;
pub mod error;
pub mod reference;
pub mod registry;
pub mod resolver;
pub mod version;

pub use cache::{CacheSettings, CachedUpdate, CheckStatus, Clock, UpdateCache, VersionStatus};
pub use checker::{ImageUpdateChecker, ImageUpdateInfo};
pub use credentials::{CredentialProvider, RegistryCredentials};
pub use detached::{spawn_detached, Detached};
pub use engine::{DockerCli, DockerEngine, ImageDetails, RunningContainer, COMPOSE_PROJECT_LABEL};
pub use error::{EngineError, RegistryError, RegistryResult};
pub use reference::{
    format_image_ref, get_registry_type, normalize_image_name, parse_image_ref, ImageRef,
    RegistryType,
};
pub use registry::{
    build_http_client, DockerHubClient, GhcrClient, OciClient, RegistryClients,
    RegistryQueryResult, RegistrySource, TagInfo,
};
pub use resolver::{ResolvedVersions, VersionResolver};
pub use version::{best_semver_tag, is_semver_like, sort_by_specificity};
