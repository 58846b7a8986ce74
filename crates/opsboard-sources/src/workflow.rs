use chrono::{DateTime, Utc};
use opsboard_client::stream::{ReconnectPolicy, RunEvent, StreamHub, StreamRequest, Subscription};
use opsboard_client::{ApiClient, RequestConfig, TypedError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::{Page, path_segment};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
    #[serde(other)]
    Unknown,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Unknown => "unknown",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRun {
    pub id: String,
    pub workflow: String,
    pub status: RunStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triggered_by: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub params: Map<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunFilter {
    pub workflow: Option<String>,
    pub status: Option<RunStatus>,
    pub limit: Option<u32>,
    pub cursor: Option<String>,
}

/// Request to start a workflow run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRun {
    pub workflow: String,
    #[serde(default)]
    pub params: Map<String, Value>,
    /// Sent as the `idempotency-key` header, not in the body.
    #[serde(skip)]
    pub idempotency_key: Option<String>,
}

impl SubmitRun {
    pub fn new(workflow: impl Into<String>) -> Self {
        Self {
            workflow: workflow.into(),
            params: Map::new(),
            idempotency_key: None,
        }
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

/// Payload of a `log` stream event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    #[serde(default = "default_level")]
    pub level: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
}

fn default_level() -> String {
    "info".to_string()
}

impl LogLine {
    pub fn from_event(event: &RunEvent) -> Result<Self, serde_json::Error> {
        event.payload_as()
    }
}

/// Workflow runs and their live streams.
#[derive(Clone)]
pub struct WorkflowSource {
    client: ApiClient,
    hub: StreamHub,
    reconnect: Option<ReconnectPolicy>,
}

impl WorkflowSource {
    pub fn new(client: ApiClient, hub: StreamHub) -> Self {
        Self {
            client,
            hub,
            reconnect: None,
        }
    }

    /// Streams opened from this source reconnect with `policy`.
    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = Some(policy);
        self
    }

    pub async fn list_runs(&self, filter: &RunFilter) -> Result<Page<WorkflowRun>, TypedError> {
        let config = RequestConfig::get("/workflows/runs")
            .query_opt("workflow", filter.workflow.as_deref())
            .query_opt("status", filter.status.map(|s| s.as_str()))
            .query_opt("limit", filter.limit)
            .query_opt("cursor", filter.cursor.as_deref());
        self.client.send_json(config).await
    }

    pub async fn get_run(&self, id: &str) -> Result<WorkflowRun, TypedError> {
        let id = path_segment("run", id)?;
        self.client.get_json(&format!("/workflows/runs/{id}")).await
    }

    pub async fn cancel_run(&self, id: &str) -> Result<WorkflowRun, TypedError> {
        let id = path_segment("run", id)?;
        let run: WorkflowRun = self
            .client
            .send_json(RequestConfig::post(format!("/workflows/runs/{id}/cancel")))
            .await?;
        info!(
            event = "workflow.run_cancelled",
            domain = "workflow",
            run_id = %run.id,
            status = run.status.as_str()
        );
        Ok(run)
    }

    pub async fn submit_run(&self, request: &SubmitRun) -> Result<WorkflowRun, TypedError> {
        let mut config = RequestConfig::post("/workflows/runs").json(request)?;
        if let Some(key) = &request.idempotency_key {
            config = config.header("idempotency-key", key)?;
        }
        let run: WorkflowRun = self.client.send_json(config).await?;
        info!(
            event = "workflow.run_submitted",
            domain = "workflow",
            run_id = %run.id,
            workflow = %run.workflow
        );
        Ok(run)
    }

    /// Live log lines for a run. Replaces any log stream already open for it.
    pub async fn stream_logs(&self, run_id: &str) -> Result<Subscription, TypedError> {
        self.open_stream(run_id, "logs").await
    }

    /// Live lifecycle events for a run. Replaces any event stream already
    /// open for it.
    pub async fn stream_events(&self, run_id: &str) -> Result<Subscription, TypedError> {
        self.open_stream(run_id, "events").await
    }

    /// Closes both streams of a run, if open.
    pub async fn close_streams(&self, run_id: &str) {
        for channel in ["logs", "events"] {
            self.hub.unsubscribe(&stream_key(run_id, channel)).await;
        }
    }

    async fn open_stream(&self, run_id: &str, channel: &str) -> Result<Subscription, TypedError> {
        let id = path_segment("run", run_id)?;
        let request = StreamRequest::new(
            stream_key(id, channel),
            format!("/workflows/runs/{id}/{channel}/stream"),
        );
        debug!(event = "workflow.stream_requested", domain = "workflow", run_id = id, channel);
        Ok(match &self.reconnect {
            Some(policy) => self.hub.subscribe_reconnecting(request, policy.clone()).await,
            None => self.hub.subscribe(request).await,
        })
    }
}

fn stream_key(run_id: &str, channel: &str) -> String {
    format!("{}:{channel}", run_id.trim())
}
