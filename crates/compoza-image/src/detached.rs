//! Supervised fire-and-forget tasks
//!
//! Background refreshes and sweeps have no caller waiting on them. Spawning
//! them through [`spawn_detached`] makes that explicit in the type and makes
//! sure their failures end up in the log instead of vanishing.

use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Handle to a task nobody awaits
///
/// Dropping it leaves the task running. It can only be aborted or polled
/// for liveness; its outcome is reported through tracing.
#[derive(Debug)]
pub struct Detached {
    label: String,
    handle: JoinHandle<()>,
}

impl Detached {
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn abort(&self) {
        self.handle.abort();
    }
}

/// Spawn `future` under a supervisor that logs errors and panics
///
/// Panics are only caught when the build unwinds. Release builds set
/// `panic = "abort"`, so a panic there still ends the process.
pub fn spawn_detached<F>(label: impl Into<String>, future: F) -> Detached
where
    F: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    let label = label.into();
    let task_label = label.clone();

    let handle = tokio::spawn(async move {
        match AssertUnwindSafe(future).catch_unwind().await {
            Ok(Ok(())) => debug!("Background task '{}' finished", task_label),
            Ok(Err(e)) => warn!("Background task '{}' failed: {:#}", task_label, e),
            Err(_) => error!("Background task '{}' panicked", task_label),
        }
    });

    Detached { label, handle }
}
