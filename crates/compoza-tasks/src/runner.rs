//! Background operation runner
//!
//! Wraps any [`Operation`] as a cancellable, observable [`Task`]:
//!
//! 1. The task is registered hidden and only becomes visible once the
//!    operation has run longer than the visibility delay.
//! 2. The operation reports progress and output through a [`TaskContext`].
//! 3. A network failure moves the task to `disconnected` and hands over to
//!    [`Operation::reconnect`] instead of failing outright.
//! 4. Cancellation ends the task with the message "Cancelled" and skips the
//!    error hook.

use crate::error::OperationError;
use crate::sse::{SseDecoder, StreamEvent};
use crate::task::{Task, TaskId, TaskList, TaskStatus};
use async_trait::async_trait;
use bytes::Bytes;
use compoza_core::types::TaskConfig;
use futures::{Stream, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Handle given to a running operation
#[derive(Clone)]
pub struct TaskContext {
    id: TaskId,
    tasks: TaskList,
    token: CancellationToken,
}

impl TaskContext {
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn set_progress(&self, percent: u8) {
        self.tasks
            .update(self.id, |t| t.progress = Some(percent.min(100)));
    }

    pub fn append_output(&self, line: impl Into<String>) {
        let line = line.into();
        self.tasks.update(self.id, |t| t.output.push(line));
    }

    /// Drive an SSE body to completion
    ///
    /// Output and progress events update the task. `done` returns its result
    /// and `error` fails the operation. A transport error or a stream that
    /// ends before `done` counts as a lost connection.
    pub async fn consume_event_stream<S, E>(
        &self,
        stream: S,
    ) -> Result<Option<serde_json::Value>, OperationError>
    where
        S: Stream<Item = Result<Bytes, E>> + Send,
        E: std::fmt::Display + Send,
    {
        let mut stream = std::pin::pin!(stream);
        let mut decoder = SseDecoder::new();

        loop {
            let chunk = tokio::select! {
                biased;
                _ = self.token.cancelled() => return Err(OperationError::Cancelled),
                chunk = stream.next() => chunk,
            };

            let events = match chunk {
                Some(Ok(bytes)) => decoder.push(&bytes),
                Some(Err(e)) => return Err(OperationError::network(e.to_string())),
                None => match decoder.finish() {
                    Some(event) => vec![event],
                    None => {
                        return Err(OperationError::network(
                            "event stream ended before completion",
                        ))
                    }
                },
            };

            for event in events {
                match event {
                    StreamEvent::Output { data } => self.append_output(data),
                    StreamEvent::Progress { percent } => self.set_progress(percent),
                    StreamEvent::Done { result } => return Ok(result),
                    StreamEvent::Error { message } => return Err(OperationError::failed(message)),
                }
            }
        }
    }
}

/// A long-running unit of work the runner can host
#[async_trait]
pub trait Operation: Send + Sync + 'static {
    type Args: Send + Sync + 'static;
    type Output: Serialize + Send + Sync + 'static;

    /// Task type shown to observers (e.g. "project-update")
    fn kind(&self) -> &'static str;

    fn label(&self, args: &Self::Args) -> String;

    async fn run(&self, args: &Self::Args, ctx: &TaskContext)
        -> Result<Self::Output, OperationError>;

    /// Recover after the connection dropped mid-operation
    async fn reconnect(
        &self,
        _args: &Self::Args,
        _ctx: &TaskContext,
    ) -> Result<Self::Output, OperationError> {
        Err(OperationError::network("operation cannot resume after a disconnect"))
    }

    /// Runs after success; a failure here never changes the reported outcome
    async fn on_success(&self, _args: &Self::Args, _output: &Self::Output) -> anyhow::Result<()> {
        Ok(())
    }

    /// Runs after a failure that was not a cancellation
    async fn on_error(&self, _args: &Self::Args, _error: &OperationError) {}
}

/// Runner timing
#[derive(Debug, Clone, Copy)]
pub struct RunnerSettings {
    pub visibility_delay: Duration,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self::from(&TaskConfig::default())
    }
}

impl From<&TaskConfig> for RunnerSettings {
    fn from(config: &TaskConfig) -> Self {
        Self {
            visibility_delay: config.visibility_delay(),
        }
    }
}

/// Aborts the wrapped task when dropped
struct AbortOnDrop(tokio::task::JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

pub struct BackgroundOperationRunner<O: Operation> {
    operation: Arc<O>,
    tasks: TaskList,
    settings: RunnerSettings,
}

impl<O: Operation> Clone for BackgroundOperationRunner<O> {
    fn clone(&self) -> Self {
        Self {
            operation: self.operation.clone(),
            tasks: self.tasks.clone(),
            settings: self.settings,
        }
    }
}

impl<O: Operation> BackgroundOperationRunner<O> {
    pub fn new(operation: O, tasks: TaskList, settings: RunnerSettings) -> Self {
        Self {
            operation: Arc::new(operation),
            tasks,
            settings,
        }
    }

    pub fn tasks(&self) -> &TaskList {
        &self.tasks
    }

    pub fn operation(&self) -> &O {
        &self.operation
    }

    /// Run the operation as a task; true when it completed successfully
    pub async fn execute(&self, args: O::Args) -> bool {
        let token = CancellationToken::new();
        let label = self.operation.label(&args);
        let id = self
            .tasks
            .add(Task::new(self.operation.kind(), label.clone()), token.clone());
        debug!("Started task {} ({})", label, id);

        let reveal = {
            let tasks = self.tasks.clone();
            let delay = self.settings.visibility_delay;
            AbortOnDrop(tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                tasks.update(id, |t| {
                    if !t.status.is_terminal() {
                        t.hidden = false;
                    }
                });
            }))
        };

        let ctx = TaskContext {
            id,
            tasks: self.tasks.clone(),
            token: token.clone(),
        };

        let mut outcome = self.guarded(&token, self.operation.run(&args, &ctx)).await;
        if let Err(OperationError::Network(reason)) = &outcome {
            info!("Lost connection during {}: {}; waiting to reconnect", label, reason);
            self.tasks.update(id, |t| {
                t.status = TaskStatus::Disconnected;
                t.hidden = false;
            });
            outcome = self
                .guarded(&token, self.operation.reconnect(&args, &ctx))
                .await;
        }
        drop(reveal);

        let succeeded = match outcome {
            Ok(output) => {
                let result = serde_json::to_value(&output).ok();
                self.tasks.update(id, |t| {
                    t.status = TaskStatus::Complete;
                    t.progress = Some(100);
                    t.result = result;
                });
                info!("{} completed", label);
                if let Err(e) = self.operation.on_success(&args, &output).await {
                    debug!("Success hook for {} failed: {:#}", label, e);
                }
                true
            }
            Err(OperationError::Cancelled) => {
                self.tasks.update(id, |t| {
                    t.status = TaskStatus::Error;
                    t.error = Some(OperationError::Cancelled.to_string());
                });
                debug!("{} cancelled", label);
                false
            }
            Err(e) => {
                let message = format!("{:#}", e);
                self.tasks.update(id, |t| {
                    t.status = TaskStatus::Error;
                    t.error = Some(message.clone());
                    t.hidden = false;
                });
                warn!("{} failed: {}", label, message);
                self.operation.on_error(&args, &e).await;
                false
            }
        };

        self.tasks.release_cancel(id);
        succeeded
    }

    async fn guarded<F>(&self, token: &CancellationToken, work: F) -> Result<O::Output, OperationError>
    where
        F: std::future::Future<Output = Result<O::Output, OperationError>>,
    {
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(OperationError::Cancelled),
            result = work => match result {
                // Work that noticed the token itself reports it as a cancellation
                Err(_) if token.is_cancelled() => Err(OperationError::Cancelled),
                other => other,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn context() -> TaskContext {
        let tasks = TaskList::new();
        let token = CancellationToken::new();
        let id = tasks.add(Task::new("test", "test"), token.clone());
        TaskContext { id, tasks, token }
    }

    fn chunks(parts: &[&'static str]) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Send {
        stream::iter(
            parts
                .iter()
                .map(|p| Ok(Bytes::from_static(p.as_bytes())))
                .collect::<Vec<_>>(),
        )
    }

    #[tokio::test]
    async fn test_event_stream_updates_task() {
        let ctx = context();
        let result = ctx
            .consume_event_stream(chunks(&[
                "data: {\"type\":\"output\",\"data\":\"Pulling\"}\n",
                "data: {\"type\":\"progress\",\"percent\":50}\ndata: {\"type\":\"done\",\"result\":{\"ok\":true}}\n",
            ]))
            .await
            .unwrap();

        assert_eq!(result, Some(serde_json::json!({"ok": true})));
        let task = ctx.tasks.get(ctx.id).unwrap();
        assert_eq!(task.output, vec!["Pulling"]);
        assert_eq!(task.progress, Some(50));
    }

    #[tokio::test]
    async fn test_event_stream_error_event_fails() {
        let ctx = context();
        let err = ctx
            .consume_event_stream(chunks(&[
                "data: {\"type\":\"error\",\"message\":\"manifest unknown\"}\n",
            ]))
            .await
            .unwrap_err();
        assert!(!err.is_network());
        assert_eq!(err.to_string(), "manifest unknown");
    }

    #[tokio::test]
    async fn test_truncated_stream_is_a_disconnect() {
        let ctx = context();
        let err = ctx
            .consume_event_stream(chunks(&["data: {\"type\":\"output\",\"data\":\"Recreating\"}\n"]))
            .await
            .unwrap_err();
        assert!(err.is_network());
    }

    #[tokio::test]
    async fn test_cancelled_stream() {
        let ctx = context();
        ctx.token().cancel();
        let err = ctx
            .consume_event_stream(stream::pending::<Result<Bytes, std::io::Error>>())
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }
}
