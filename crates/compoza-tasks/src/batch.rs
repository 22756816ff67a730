//! Batch project updates
//!
//! Non-self projects run through a rolling window of at most
//! `concurrency` in-flight updates. The project hosting this application
//! runs alone and last, because recreating it tears down whatever is
//! driving the rest of the batch.

use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default in-flight ceiling for batch updates
pub const DEFAULT_BATCH_CONCURRENCY: usize = 3;

#[async_trait]
pub trait ProjectUpdater: Send + Sync {
    async fn update_project(&self, name: &str) -> anyhow::Result<()>;
}

/// Finds the compose project this application runs in, if any
#[async_trait]
pub trait SelfProjectLocator: Send + Sync {
    async fn self_project(&self) -> anyhow::Result<Option<String>>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "message", rename_all = "lowercase")]
pub enum ProjectOutcome {
    Updated,
    Failed(String),
    Cancelled,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectResult {
    pub project: String,
    pub outcome: ProjectOutcome,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    /// In completion order, self project last
    pub outcomes: Vec<ProjectResult>,
    pub self_project: Option<String>,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.count(|o| matches!(o, ProjectOutcome::Updated))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, ProjectOutcome::Failed(_)))
    }

    pub fn cancelled(&self) -> usize {
        self.count(|o| matches!(o, ProjectOutcome::Cancelled))
    }

    fn count(&self, pred: impl Fn(&ProjectOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|r| pred(&r.outcome)).count()
    }
}

pub struct BatchUpdateCoordinator {
    updater: Arc<dyn ProjectUpdater>,
    locator: Arc<dyn SelfProjectLocator>,
    concurrency: usize,
}

impl BatchUpdateCoordinator {
    pub fn new(
        updater: Arc<dyn ProjectUpdater>,
        locator: Arc<dyn SelfProjectLocator>,
        concurrency: usize,
    ) -> Self {
        Self {
            updater,
            locator,
            concurrency: concurrency.max(1),
        }
    }

    /// Update every named project once
    ///
    /// Failures are independent. After `cancel` fires no further projects
    /// are started; those never admitted are reported as cancelled.
    pub async fn start(&self, names: &[String], cancel: &CancellationToken) -> BatchReport {
        let mut seen = HashSet::new();
        let names: Vec<&str> = names
            .iter()
            .map(String::as_str)
            .filter(|n| seen.insert(*n))
            .collect();

        let self_project = match self.locator.self_project().await {
            Ok(found) => found,
            Err(e) => {
                warn!("Could not determine the hosting project: {:#}", e);
                None
            }
        };
        let self_name = self_project
            .as_deref()
            .filter(|s| names.contains(s));

        let others: Vec<&str> = names
            .iter()
            .copied()
            .filter(|n| Some(*n) != self_name)
            .collect();
        info!(
            "Updating {} project(s){}",
            names.len(),
            self_name
                .map(|s| format!(", {} last", s))
                .unwrap_or_default()
        );

        let mut outcomes = Vec::with_capacity(names.len());
        let mut pending = others.into_iter();
        let mut in_flight = FuturesUnordered::new();

        loop {
            while in_flight.len() < self.concurrency && !cancel.is_cancelled() {
                let Some(name) = pending.next() else { break };
                in_flight.push(self.run_one(name));
            }
            match in_flight.next().await {
                Some(result) => outcomes.push(result),
                None => break,
            }
        }

        for name in pending {
            outcomes.push(ProjectResult {
                project: name.to_string(),
                outcome: ProjectOutcome::Cancelled,
            });
        }

        if let Some(name) = self_name {
            if cancel.is_cancelled() {
                outcomes.push(ProjectResult {
                    project: name.to_string(),
                    outcome: ProjectOutcome::Cancelled,
                });
            } else {
                debug!("All other projects settled, updating {}", name);
                outcomes.push(self.run_one(name).await);
            }
        }

        BatchReport {
            outcomes,
            self_project,
        }
    }

    async fn run_one(&self, name: &str) -> ProjectResult {
        let outcome = match self.updater.update_project(name).await {
            Ok(()) => ProjectOutcome::Updated,
            Err(e) => {
                warn!("Update of {} failed: {:#}", name, e);
                ProjectOutcome::Failed(format!("{:#}", e))
            }
        };
        ProjectResult {
            project: name.to_string(),
            outcome,
        }
    }
}
