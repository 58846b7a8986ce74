use std::collections::BTreeMap;

use opsboard_client::{ApiClient, TypedError};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Ok,
    Degraded,
    Down,
    #[serde(other)]
    Unknown,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentHealth {
    pub status: HealthState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: HealthState,
    /// Per-component checks keyed by component name.
    #[serde(default)]
    pub checks: BTreeMap<String, ComponentHealth>,
}

impl HealthReport {
    /// Names of components not reporting `ok`.
    pub fn unhealthy(&self) -> Vec<&str> {
        self.checks
            .iter()
            .filter(|(_, c)| c.status != HealthState::Ok)
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemInfo {
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uptime_seconds: Option<u64>,
    #[serde(default)]
    pub features: Vec<String>,
}

#[derive(Clone)]
pub struct SystemSource {
    client: ApiClient,
}

impl SystemSource {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    pub async fn health(&self) -> Result<HealthReport, TypedError> {
        self.client.get_json("/system/health").await
    }

    pub async fn info(&self) -> Result<SystemInfo, TypedError> {
        self.client.get_json("/system/info").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{CannedTransport, client, ok};
    use opsboard_client::ErrorKind;
    use serde_json::json;

    #[tokio::test]
    async fn health_lists_unhealthy_components() {
        let transport = CannedTransport::new(vec![ok(json!({
            "status": "degraded",
            "checks": {
                "db": { "status": "ok", "latencyMs": 3.5 },
                "queue": { "status": "down", "message": "broker unreachable" }
            }
        }))]);
        let report = SystemSource::new(client(transport)).health().await.expect("health");
        assert_eq!(report.status, HealthState::Degraded);
        assert_eq!(report.unhealthy(), vec!["queue"]);
    }

    #[tokio::test]
    async fn info_shape_mismatch_is_server_error() {
        let transport = CannedTransport::new(vec![ok(json!({ "commit": "abc123" }))]);
        let err = SystemSource::new(client(transport)).info().await.expect_err("decode");
        assert_eq!(err.kind, ErrorKind::ServerError);
    }
}
