//! Project updates driven through a running Compoza server
//!
//! The server streams `data:` events while it pulls and recreates. Updating
//! the project that hosts the server drops the stream midway, so a lost
//! connection is followed by polling the health endpoint until the new
//! container answers.

use anyhow::Context;
use async_trait::async_trait;
use compoza_core::types::TaskConfig;
use compoza_tasks::{Operation, OperationError, TaskContext};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;
use url::Url;

use crate::compose::{update_label, PROJECT_UPDATE_KIND};

pub struct RemoteProjectUpdate {
    http: reqwest::Client,
    base: Url,
    reconnect_timeout: Duration,
    reconnect_poll: Duration,
}

fn transport_error(e: reqwest::Error) -> OperationError {
    if e.is_connect() || e.is_request() || e.is_timeout() || e.is_body() {
        OperationError::network(e.to_string())
    } else {
        OperationError::Failed(anyhow::Error::new(e))
    }
}

impl RemoteProjectUpdate {
    pub fn new(http: reqwest::Client, mut base: Url, tasks: &TaskConfig) -> Self {
        // Joined paths are relative to the server root given by the user
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Self {
            http,
            base,
            reconnect_timeout: tasks.reconnect_timeout(),
            reconnect_poll: tasks.reconnect_poll(),
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url, OperationError> {
        let url = self
            .base
            .join(path)
            .with_context(|| format!("Invalid server URL {}", self.base))?;
        Ok(url)
    }

    async fn is_healthy(&self, url: &Url) -> bool {
        match self.http.get(url.clone()).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!("Health check failed: {}", e);
                false
            }
        }
    }
}

#[async_trait]
impl Operation for RemoteProjectUpdate {
    type Args = String;
    type Output = Value;

    fn kind(&self) -> &'static str {
        PROJECT_UPDATE_KIND
    }

    fn label(&self, project: &String) -> String {
        update_label(project)
    }

    async fn run(&self, project: &String, ctx: &TaskContext) -> Result<Value, OperationError> {
        let url = self.endpoint(&format!("api/projects/{}/update", project))?;
        debug!("POST {}", url);

        let response = self.http.post(url).send().await.map_err(transport_error)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OperationError::failed(format!(
                "server rejected update of {} ({}): {}",
                project,
                status,
                body.trim()
            )));
        }

        let result = ctx.consume_event_stream(response.bytes_stream()).await?;
        Ok(result.unwrap_or(Value::Null))
    }

    async fn reconnect(&self, project: &String, ctx: &TaskContext) -> Result<Value, OperationError> {
        let health = self.endpoint("api/health")?;
        let deadline = Instant::now() + self.reconnect_timeout;

        while Instant::now() < deadline {
            tokio::time::sleep(self.reconnect_poll).await;
            if self.is_healthy(&health).await {
                ctx.append_output("Server is back");
                return Ok(json!({ "project": project, "reconnected": true }));
            }
        }

        Err(OperationError::failed(format!(
            "server did not come back within {}s",
            self.reconnect_timeout.as_secs()
        )))
    }
}
