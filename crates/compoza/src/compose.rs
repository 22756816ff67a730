//! Compose projects on the local engine

use anyhow::{Context, Result};
use async_trait::async_trait;
use compoza_image::{normalize_image_name, DockerCli, ImageRef, RunningContainer, UpdateCache};
use compoza_tasks::{
    BackgroundOperationRunner, Operation, OperationError, ProjectUpdater, SelfProjectLocator,
    TaskContext,
};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

pub const PROJECT_UPDATE_KIND: &str = "project-update";

pub fn update_label(project: &str) -> String {
    format!("Updating {}", project)
}

/// Running containers keyed by compose project
pub fn group_by_project(
    containers: Vec<RunningContainer>,
) -> BTreeMap<String, Vec<RunningContainer>> {
    let mut projects: BTreeMap<String, Vec<RunningContainer>> = BTreeMap::new();
    for container in containers {
        if let Some(project) = container.compose_project().map(str::to_string) {
            projects.entry(project).or_default().push(container);
        }
    }
    projects
}

/// Project of the first container running `self_image`, ignoring tags
pub fn find_self_project(containers: &[RunningContainer], self_image: &str) -> Option<String> {
    let wanted = ImageRef::parse(self_image).name();
    containers
        .iter()
        .filter(|c| ImageRef::parse(&c.image).name() == wanted)
        .find_map(|c| c.compose_project().map(str::to_string))
}

/// Normalized image names used by a project's containers
pub fn project_images(containers: &[RunningContainer]) -> Vec<String> {
    containers
        .iter()
        .map(|c| normalize_image_name(&c.image))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectUpdateSummary {
    pub project: String,
    pub images: Vec<String>,
    pub pulled_only: bool,
}

/// `docker compose pull` and `up -d` for one project
pub struct LocalComposeUpdate {
    docker: DockerCli,
    cache: Arc<UpdateCache>,
    pull_only: bool,
}

impl LocalComposeUpdate {
    pub fn new(docker: DockerCli, cache: Arc<UpdateCache>, pull_only: bool) -> Self {
        Self {
            docker,
            cache,
            pull_only,
        }
    }

    async fn compose(&self, project: &str, args: &[&str], ctx: &TaskContext) -> Result<(), OperationError> {
        let mut full = vec!["compose", "-p", project];
        full.extend_from_slice(args);
        debug!("Running: {} {}", self.docker.program(), full.join(" "));

        let mut child = Command::new(self.docker.program())
            .args(&full)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to start {} compose", self.docker.program()))?;

        let mut stdout = BufReader::new(child.stdout.take().context("stdout not captured")?).lines();
        let mut stderr = BufReader::new(child.stderr.take().context("stderr not captured")?).lines();
        let (mut stdout_done, mut stderr_done) = (false, false);

        // Compose reports progress on stderr
        while !(stdout_done && stderr_done) {
            tokio::select! {
                _ = ctx.token().cancelled() => {
                    let _ = child.kill().await;
                    return Err(OperationError::Cancelled);
                }
                line = stdout.next_line(), if !stdout_done => match line.context("Failed to read compose output")? {
                    Some(line) => ctx.append_output(line),
                    None => stdout_done = true,
                },
                line = stderr.next_line(), if !stderr_done => match line.context("Failed to read compose output")? {
                    Some(line) => ctx.append_output(line),
                    None => stderr_done = true,
                },
            }
        }

        let status = child.wait().await.context("Failed to wait for compose")?;
        if !status.success() {
            return Err(OperationError::failed(format!(
                "compose {} failed ({})",
                args.join(" "),
                status
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Operation for LocalComposeUpdate {
    type Args = String;
    type Output = ProjectUpdateSummary;

    fn kind(&self) -> &'static str {
        PROJECT_UPDATE_KIND
    }

    fn label(&self, project: &String) -> String {
        update_label(project)
    }

    async fn run(&self, project: &String, ctx: &TaskContext) -> Result<ProjectUpdateSummary, OperationError> {
        let images = match self.docker.running_containers().await {
            Ok(containers) => group_by_project(containers)
                .remove(project.as_str())
                .map(|c| project_images(&c))
                .unwrap_or_default(),
            Err(e) => {
                warn!("Could not list containers of {}: {}", project, e);
                Vec::new()
            }
        };

        ctx.set_progress(5);
        self.compose(project, &["pull"], ctx).await?;
        ctx.set_progress(60);
        if !self.pull_only {
            self.compose(project, &["up", "-d"], ctx).await?;
        }

        Ok(ProjectUpdateSummary {
            project: project.clone(),
            images,
            pulled_only: self.pull_only,
        })
    }

    async fn on_success(&self, _project: &String, summary: &ProjectUpdateSummary) -> Result<()> {
        // The next check must compare against the freshly pulled digests
        self.cache.clear_cached_updates(Some(&summary.images));
        Ok(())
    }
}

/// Adapts a runner to the batch coordinator
pub struct RunnerUpdater<O: Operation<Args = String>> {
    runner: BackgroundOperationRunner<O>,
}

impl<O: Operation<Args = String>> RunnerUpdater<O> {
    pub fn new(runner: BackgroundOperationRunner<O>) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl<O: Operation<Args = String>> ProjectUpdater for RunnerUpdater<O> {
    async fn update_project(&self, name: &str) -> Result<()> {
        if self.runner.execute(name.to_string()).await {
            return Ok(());
        }
        let label = self.runner.operation().label(&name.to_string());
        let message = self
            .runner
            .tasks()
            .snapshot()
            .into_iter()
            .rev()
            .find(|t| t.label == label)
            .and_then(|t| t.error)
            .unwrap_or_else(|| "update failed".to_string());
        anyhow::bail!(message)
    }
}

/// Finds the project whose containers run this application's image
pub struct DockerSelfLocator {
    docker: DockerCli,
    self_image: String,
}

impl DockerSelfLocator {
    pub fn new(docker: DockerCli, self_image: impl Into<String>) -> Self {
        Self {
            docker,
            self_image: self_image.into(),
        }
    }
}

#[async_trait]
impl SelfProjectLocator for DockerSelfLocator {
    async fn self_project(&self) -> Result<Option<String>> {
        let containers = self
            .docker
            .running_containers()
            .await
            .context("Failed to list running containers")?;
        Ok(find_self_project(&containers, &self.self_image))
    }
}
