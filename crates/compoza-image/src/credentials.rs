//! Per-registry credential resolution
//!
//! Credentials come from process configuration (environment variables) and
//! can't change while the process runs. Once a registry rejects them with a
//! 401 they are switched off for the rest of the session so the token
//! endpoint isn't hammered with a known-bad secret.

use crate::reference::{ImageRef, RegistryType};
use compoza_core::types::CredentialsConfig;
use parking_lot::Mutex;
use std::collections::HashSet;
use tracing::warn;

/// Username paired with a GHCR token; GitHub ignores it but Basic auth needs one
pub const GHCR_SENTINEL_USERNAME: &str = "token";

/// Resolved credentials for one registry
#[derive(Clone, PartialEq, Eq)]
pub struct RegistryCredentials {
    pub username: String,
    pub token: String,
}

impl std::fmt::Debug for RegistryCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryCredentials")
            .field("username", &self.username)
            .field("token", &"***")
            .finish()
    }
}

/// Resolves credentials per image or token endpoint
#[derive(Debug, Default)]
pub struct CredentialProvider {
    config: CredentialsConfig,
    disabled: Mutex<HashSet<RegistryType>>,
}

impl CredentialProvider {
    pub fn new(config: CredentialsConfig) -> Self {
        Self {
            config,
            disabled: Mutex::new(HashSet::new()),
        }
    }

    /// Credentials for the registry hosting `image`, if configured and not disabled
    pub fn get_registry_credentials(&self, image: &str) -> Option<RegistryCredentials> {
        self.for_registry(ImageRef::parse(image).registry_type())
    }

    /// Credentials for a token-issuing URL taken from a `WWW-Authenticate` realm
    pub fn get_credentials_for_token_endpoint(&self, url: &str) -> Option<RegistryCredentials> {
        self.for_registry(registry_for_token_endpoint(url))
    }

    /// Credentials for a registry family
    pub fn for_registry(&self, registry: RegistryType) -> Option<RegistryCredentials> {
        if self.is_disabled(registry) {
            return None;
        }

        match registry {
            RegistryType::DockerHub => {
                let username = self.config.dockerhub_username.as_ref()?;
                let token = self.config.dockerhub_token.as_ref()?;
                Some(RegistryCredentials {
                    username: username.clone(),
                    token: token.clone(),
                })
            }
            // lscr.io images are GitHub packages, so the GHCR token applies
            RegistryType::Ghcr | RegistryType::Lscr => {
                let token = self.config.ghcr_token.as_ref()?;
                Some(RegistryCredentials {
                    username: GHCR_SENTINEL_USERNAME.to_string(),
                    token: token.clone(),
                })
            }
            RegistryType::Unknown => None,
        }
    }

    /// Stop using credentials for `registry` for the rest of the process
    pub fn disable_registry_credentials(&self, registry: RegistryType) {
        let family = credential_family(registry);
        if self.disabled.lock().insert(family) {
            warn!(
                "Credentials for {:?} were rejected; continuing anonymously for this session",
                family
            );
        }
    }

    pub fn is_disabled(&self, registry: RegistryType) -> bool {
        self.disabled.lock().contains(&credential_family(registry))
    }
}

/// Registry family issuing tokens at `url`
pub fn registry_for_token_endpoint(url: &str) -> RegistryType {
    let url = url.to_ascii_lowercase();
    if url.contains("auth.docker.io") || url.contains("docker.com") {
        RegistryType::DockerHub
    } else if url.contains("ghcr.io") {
        RegistryType::Ghcr
    } else {
        RegistryType::Unknown
    }
}

// GHCR and lscr share one token, so they share one disabled flag.
fn credential_family(registry: RegistryType) -> RegistryType {
    match registry {
        RegistryType::Lscr => RegistryType::Ghcr,
        other => other,
    }
}
