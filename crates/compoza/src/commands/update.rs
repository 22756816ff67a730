//! Project update commands

use anyhow::{bail, Context, Result};
use compoza_tasks::{
    BackgroundOperationRunner, BatchReport, BatchUpdateCoordinator, ProjectOutcome,
    ProjectUpdater, RunnerSettings, TaskList,
};
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use url::Url;

use crate::cli::{UpdateAllArgs, UpdateArgs};
use crate::compose::{
    group_by_project, project_images, DockerSelfLocator, LocalComposeUpdate, RunnerUpdater,
};
use crate::context::AppContext;
use crate::output;
use crate::remote::RemoteProjectUpdate;

pub async fn run(args: UpdateArgs) -> Result<()> {
    let ctx = AppContext::load()?;
    run_batch(&ctx, &args.projects, args.remote, args.pull_only).await
}

pub async fn run_all(args: UpdateAllArgs) -> Result<()> {
    let ctx = AppContext::load()?;
    let projects = if args.projects.is_empty() {
        projects_with_updates(&ctx).await?
    } else {
        args.projects
    };

    if projects.is_empty() {
        output::success("All projects are up to date");
        return Ok(());
    }
    run_batch(&ctx, &projects, args.remote, false).await
}

/// Running projects using at least one image with an update
async fn projects_with_updates(ctx: &AppContext) -> Result<Vec<String>> {
    let images = ctx.images_to_check(&[]).await?;
    let outdated: HashSet<String> = ctx
        .checker
        .check_image_updates(images)
        .await
        .into_iter()
        .filter(|r| r.update.update_available)
        .map(|r| r.update.image)
        .collect();

    let containers = ctx
        .docker
        .running_containers()
        .await
        .context("Failed to list running containers")?;

    Ok(group_by_project(containers)
        .into_iter()
        .filter(|(_, containers)| {
            project_images(containers)
                .iter()
                .any(|image| outdated.contains(image))
        })
        .map(|(project, _)| project)
        .collect())
}

fn updater(
    ctx: &AppContext,
    tasks: &TaskList,
    remote: Option<Url>,
    pull_only: bool,
) -> Arc<dyn ProjectUpdater> {
    let settings = RunnerSettings::from(&ctx.config.tasks);
    match remote {
        Some(base) => {
            let operation = RemoteProjectUpdate::new(ctx.http.clone(), base, &ctx.config.tasks);
            Arc::new(RunnerUpdater::new(BackgroundOperationRunner::new(
                operation,
                tasks.clone(),
                settings,
            )))
        }
        None => {
            let operation =
                LocalComposeUpdate::new(ctx.docker.clone(), ctx.cache().clone(), pull_only);
            Arc::new(RunnerUpdater::new(BackgroundOperationRunner::new(
                operation,
                tasks.clone(),
                settings,
            )))
        }
    }
}

async fn run_batch(
    ctx: &AppContext,
    projects: &[String],
    remote: Option<Url>,
    pull_only: bool,
) -> Result<()> {
    let tasks = TaskList::new();
    let cancel = CancellationToken::new();
    let printer = tokio::spawn(output::follow_tasks(tasks.subscribe()));

    let interrupt = {
        let tasks = tasks.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling running updates");
                cancel.cancel();
                for task in tasks.snapshot() {
                    tasks.cancel(task.id);
                }
            }
        })
    };

    let coordinator = BatchUpdateCoordinator::new(
        updater(ctx, &tasks, remote, pull_only),
        Arc::new(DockerSelfLocator::new(
            ctx.docker.clone(),
            ctx.config.self_image.clone(),
        )),
        ctx.config.tasks.batch_concurrency,
    );
    let report = coordinator.start(projects, &cancel).await;

    interrupt.abort();
    printer.abort();
    print_report(&report)
}

fn print_report(report: &BatchReport) -> Result<()> {
    output::header("Update results");
    for result in &report.outcomes {
        match &result.outcome {
            ProjectOutcome::Updated => output::success(&result.project),
            ProjectOutcome::Failed(message) => {
                output::error(&format!("{}: {}", result.project, message))
            }
            ProjectOutcome::Cancelled => {
                output::warning(&format!("{}: cancelled", result.project))
            }
        }
    }

    let failed = report.failed();
    if failed > 0 {
        bail!("{} project(s) failed to update", failed);
    }
    if report.cancelled() > 0 {
        bail!("Update cancelled");
    }
    Ok(())
}
