//! Typed data sources for the opsboard dashboard.
//!
//! Each source is a thin caller of the shared [`ApiClient`]: it shapes the
//! request, lets the client unwrap the envelope and classify failures, and
//! returns domain types. Sources are cheap to clone and hold no global state.

use std::sync::Arc;

use opsboard_client::stream::{SseEventSource, StreamHub};
use opsboard_client::{ApiClient, ClientConfig, ConfigError, ErrorKind, TypedError};
use serde::{Deserialize, Serialize};

/// Audit summary and findings.
pub mod audit;
/// Release listing, drafting and publishing.
pub mod release;
/// Backend health and build information.
pub mod system;
/// Workflow runs and their live log/event streams.
pub mod workflow;

pub use audit::{AuditSource, AuditSummary, AuditTotals, Finding, FindingFilter, Severity};
pub use release::{Release, ReleaseDraft, ReleaseFilter, ReleaseSource, ReleaseStatus};
pub use system::{ComponentHealth, HealthReport, HealthState, SystemInfo, SystemSource};
pub use workflow::{LogLine, RunFilter, RunStatus, SubmitRun, WorkflowRun, WorkflowSource};

/// One page of a cursor-paginated listing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
}

/// Every data source, built over one client and one stream registry.
#[derive(Clone)]
pub struct DataSources {
    pub audit: AuditSource,
    pub releases: ReleaseSource,
    pub system: SystemSource,
    pub workflows: WorkflowSource,
}

impl DataSources {
    pub fn new(client: ApiClient, hub: StreamHub) -> Self {
        Self {
            audit: AuditSource::new(client.clone()),
            releases: ReleaseSource::new(client.clone()),
            system: SystemSource::new(client.clone()),
            workflows: WorkflowSource::new(client, hub),
        }
    }

    /// Builds the default client and SSE stream source from `config`.
    pub fn from_config(config: ClientConfig) -> Result<Self, ConfigError> {
        let hub = StreamHub::new(Arc::new(SseEventSource::new(config.clone())?));
        let client = ApiClient::builder(config).build()?;
        Ok(Self::new(client, hub))
    }
}

/// Validates an identifier before it is interpolated into a path.
pub(crate) fn path_segment<'a>(what: &str, id: &'a str) -> Result<&'a str, TypedError> {
    let id = id.trim();
    if id.is_empty() || id.contains(['/', '?', '#']) || id == "." || id == ".." {
        return Err(TypedError::new(
            ErrorKind::ValidationError,
            format!("invalid {what} id {id:?}"),
        ));
    }
    Ok(id)
}
