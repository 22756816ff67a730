//! Docker Engine collaborator
//!
//! The checker needs three things from the local engine: images matching a
//! reference, an image's `RepoDigests`, and the digest the engine's own
//! registry session sees for a tag. [`DockerCli`] answers them by running
//! the `docker` client.

use crate::error::EngineError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, trace};

/// Compose project label set by `docker compose`
pub const COMPOSE_PROJECT_LABEL: &str = "com.docker.compose.project";

/// Local image metadata relevant to update checks
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDetails {
    pub id: String,
    pub repo_tags: Vec<String>,
    /// `repo@sha256:...` entries recorded when the image was pulled
    pub repo_digests: Vec<String>,
}

/// A running container and the image it was created from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunningContainer {
    pub id: String,
    pub name: String,
    /// Image reference from the container config (`nginx:latest`)
    pub image: String,
    /// Resolved image ID (`sha256:...`)
    pub image_id: String,
    pub labels: HashMap<String, String>,
}

impl RunningContainer {
    pub fn compose_project(&self) -> Option<&str> {
        self.labels.get(COMPOSE_PROJECT_LABEL).map(String::as_str)
    }
}

#[async_trait]
pub trait DockerEngine: Send + Sync {
    /// Images matching a reference filter
    async fn list_images(&self, reference: &str) -> Result<Vec<ImageDetails>, EngineError>;

    /// Inspect an image by ID or name; `None` when it does not exist locally
    async fn inspect_image(&self, id: &str) -> Result<Option<ImageDetails>, EngineError>;

    /// Manifest digest currently published for `image`, as seen by the engine
    async fn distribution_digest(&self, image: &str) -> Result<Option<String>, EngineError>;
}

/// [`DockerEngine`] backed by the `docker` command
#[derive(Debug, Clone)]
pub struct DockerCli {
    program: String,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectedImage {
    id: String,
    #[serde(default)]
    repo_tags: Option<Vec<String>>,
    #[serde(default)]
    repo_digests: Option<Vec<String>>,
}

impl From<InspectedImage> for ImageDetails {
    fn from(image: InspectedImage) -> Self {
        Self {
            id: image.id,
            repo_tags: image.repo_tags.unwrap_or_default(),
            repo_digests: image.repo_digests.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListedImage {
    #[serde(rename = "ID")]
    id: String,
    repository: String,
    tag: String,
    #[serde(default)]
    digest: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectedContainer {
    id: String,
    name: String,
    image: String,
    config: ContainerConfig,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerConfig {
    image: String,
    #[serde(default)]
    labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
struct ImagetoolsManifest {
    digest: String,
}

fn is_missing(value: &str) -> bool {
    value.is_empty() || value == "<none>"
}

/// Map docker's stderr to an error kind
fn classify_failure(command: &str, subject: &str, stderr: &str) -> EngineError {
    let lower = stderr.to_ascii_lowercase();
    if lower.contains("toomanyrequests") || lower.contains("429") || lower.contains("rate limit") {
        EngineError::RateLimited {
            image: subject.to_string(),
        }
    } else if lower.contains("unauthorized")
        || lower.contains("denied")
        || lower.contains("authentication required")
    {
        EngineError::Unauthorized {
            image: subject.to_string(),
        }
    } else if lower.contains("is not a docker command") || lower.contains("unknown command") {
        EngineError::Unsupported {
            operation: command.to_string(),
        }
    } else {
        EngineError::CommandFailed {
            command: command.to_string(),
            stderr: stderr.trim().to_string(),
        }
    }
}

fn is_no_such_image(stderr: &str) -> bool {
    let lower = stderr.to_ascii_lowercase();
    lower.contains("no such image") || lower.contains("no such object")
}

impl DockerCli {
    pub fn new() -> Self {
        Self {
            program: "docker".to_string(),
        }
    }

    /// Use a different client binary (e.g. `podman`)
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Client binary in use
    pub fn program(&self) -> &str {
        &self.program
    }

    async fn run(&self, args: &[&str]) -> Result<std::process::Output, EngineError> {
        debug!("Running: {} {}", self.program, args.join(" "));
        let output = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;
        Ok(output)
    }

    /// Containers currently running, with their compose labels
    pub async fn running_containers(&self) -> Result<Vec<RunningContainer>, EngineError> {
        let output = self.run(&["ps", "-q", "--no-trunc"]).await?;
        if !output.status.success() {
            return Err(classify_failure(
                "ps",
                "containers",
                &String::from_utf8_lossy(&output.stderr),
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let ids: Vec<&str> = stdout.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut args = vec!["container", "inspect"];
        args.extend(ids);
        let output = self.run(&args).await?;
        if !output.status.success() {
            return Err(classify_failure(
                "container inspect",
                "containers",
                &String::from_utf8_lossy(&output.stderr),
            ));
        }

        let containers: Vec<InspectedContainer> = serde_json::from_slice(&output.stdout)?;
        Ok(containers
            .into_iter()
            .map(|c| RunningContainer {
                id: c.id,
                name: c.name.trim_start_matches('/').to_string(),
                image: c.config.image,
                image_id: c.image,
                labels: c.config.labels.unwrap_or_default(),
            })
            .collect())
    }
}

#[async_trait]
impl DockerEngine for DockerCli {
    async fn list_images(&self, reference: &str) -> Result<Vec<ImageDetails>, EngineError> {
        let filter = format!("reference={}", reference);
        let output = self
            .run(&[
                "image",
                "ls",
                "--no-trunc",
                "--digests",
                "--filter",
                &filter,
                "--format",
                "{{json .}}",
            ])
            .await?;
        if !output.status.success() {
            return Err(classify_failure(
                "image ls",
                reference,
                &String::from_utf8_lossy(&output.stderr),
            ));
        }

        let mut images = Vec::new();
        for line in String::from_utf8_lossy(&output.stdout).lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let listed: ListedImage = serde_json::from_str(line)?;
            trace!("Listed image {} {}:{}", listed.id, listed.repository, listed.tag);

            let mut details = ImageDetails {
                id: listed.id,
                ..Default::default()
            };
            if !is_missing(&listed.tag) {
                details
                    .repo_tags
                    .push(format!("{}:{}", listed.repository, listed.tag));
            }
            if !is_missing(&listed.digest) {
                details
                    .repo_digests
                    .push(format!("{}@{}", listed.repository, listed.digest));
            }
            images.push(details);
        }
        Ok(images)
    }

    async fn inspect_image(&self, id: &str) -> Result<Option<ImageDetails>, EngineError> {
        let output = self.run(&["image", "inspect", id]).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if is_no_such_image(&stderr) {
                return Ok(None);
            }
            return Err(classify_failure("image inspect", id, &stderr));
        }

        let images: Vec<InspectedImage> = serde_json::from_slice(&output.stdout)?;
        Ok(images.into_iter().next().map(ImageDetails::from))
    }

    async fn distribution_digest(&self, image: &str) -> Result<Option<String>, EngineError> {
        let output = self
            .run(&[
                "buildx",
                "imagetools",
                "inspect",
                image,
                "--format",
                "{{json .Manifest}}",
            ])
            .await?;
        if !output.status.success() {
            return Err(classify_failure(
                "buildx imagetools inspect",
                image,
                &String::from_utf8_lossy(&output.stderr),
            ));
        }

        let manifest: ImagetoolsManifest = serde_json::from_slice(&output.stdout)?;
        Ok(Some(manifest.digest).filter(|d| !d.is_empty()))
    }
}
