//! Shared fakes for task runner and batch tests

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use compoza_tasks::{Operation, OperationError, ProjectUpdater, SelfProjectLocator, TaskContext};
use futures::stream;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// What a scripted operation does when run
#[derive(Debug, Clone)]
pub enum Step {
    Succeed(Duration),
    Fail(Duration, &'static str),
    Disconnect,
    HangUntilCancelled,
    Stream(Vec<&'static str>),
}

#[derive(Default)]
pub struct ScriptedOperation {
    pub hooks: Arc<Mutex<Vec<String>>>,
    pub reconnect_fails: bool,
    pub success_hook_fails: bool,
}

#[async_trait]
impl Operation for ScriptedOperation {
    type Args = Step;
    type Output = String;

    fn kind(&self) -> &'static str {
        "project-update"
    }

    fn label(&self, _args: &Step) -> String {
        "Updating web".to_string()
    }

    async fn run(&self, step: &Step, ctx: &TaskContext) -> Result<String, OperationError> {
        match step {
            Step::Succeed(after) => {
                ctx.append_output("Pulling web");
                tokio::time::sleep(*after).await;
                Ok("done".to_string())
            }
            Step::Fail(after, message) => {
                tokio::time::sleep(*after).await;
                Err(OperationError::failed(message))
            }
            Step::Disconnect => {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Err(OperationError::network("connection reset by peer"))
            }
            Step::HangUntilCancelled => {
                ctx.token().cancelled().await;
                Err(OperationError::Cancelled)
            }
            Step::Stream(parts) => {
                let chunks: Vec<Result<Bytes, std::io::Error>> = parts
                    .iter()
                    .map(|p| Ok(Bytes::from_static(p.as_bytes())))
                    .collect();
                let result = ctx.consume_event_stream(stream::iter(chunks)).await?;
                Ok(result.map(|v| v.to_string()).unwrap_or_default())
            }
        }
    }

    async fn reconnect(&self, _step: &Step, _ctx: &TaskContext) -> Result<String, OperationError> {
        self.hooks.lock().push("reconnect".to_string());
        tokio::time::sleep(Duration::from_secs(2)).await;
        if self.reconnect_fails {
            Err(OperationError::failed("server did not come back"))
        } else {
            Ok("reconnected".to_string())
        }
    }

    async fn on_success(&self, _step: &Step, output: &String) -> anyhow::Result<()> {
        self.hooks.lock().push(format!("on_success: {}", output));
        if self.success_hook_fails {
            anyhow::bail!("cache refresh failed");
        }
        Ok(())
    }

    async fn on_error(&self, _step: &Step, error: &OperationError) {
        self.hooks.lock().push(format!("on_error: {}", error));
    }
}

/// Records start/end order and the in-flight high-water mark
#[derive(Default)]
pub struct RecordingUpdater {
    pub log: Mutex<Vec<String>>,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub failing: HashSet<String>,
    pub durations_ms: Vec<(String, u64)>,
    /// Fired when the named project starts
    pub cancel_on: Option<(String, CancellationToken)>,
}

impl RecordingUpdater {
    pub fn failing(mut self, name: &str) -> Self {
        self.failing.insert(name.to_string());
        self
    }

    pub fn taking(mut self, name: &str, ms: u64) -> Self {
        self.durations_ms.push((name.to_string(), ms));
        self
    }

    pub fn position(&self, entry: &str) -> usize {
        self.log
            .lock()
            .iter()
            .position(|e| e == entry)
            .unwrap_or_else(|| panic!("{} not in log", entry))
    }
}

#[async_trait]
impl ProjectUpdater for RecordingUpdater {
    async fn update_project(&self, name: &str) -> anyhow::Result<()> {
        self.log.lock().push(format!("start:{}", name));
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some((trigger, token)) = &self.cancel_on {
            if trigger == name {
                token.cancel();
            }
        }

        let ms = self
            .durations_ms
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, ms)| *ms)
            .unwrap_or(100);
        tokio::time::sleep(Duration::from_millis(ms)).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.log.lock().push(format!("end:{}", name));
        if self.failing.contains(name) {
            anyhow::bail!("compose up failed for {}", name);
        }
        Ok(())
    }
}

pub struct FixedLocator(pub Option<&'static str>);

#[async_trait]
impl SelfProjectLocator for FixedLocator {
    async fn self_project(&self) -> anyhow::Result<Option<String>> {
        Ok(self.0.map(str::to_string))
    }
}

pub struct BrokenLocator;

#[async_trait]
impl SelfProjectLocator for BrokenLocator {
    async fn self_project(&self) -> anyhow::Result<Option<String>> {
        anyhow::bail!("docker daemon not reachable")
    }
}

pub fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|n| n.to_string()).collect()
}
