use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use opsboard_client::{ApiClient, RequestConfig, TypedError};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Page, path_segment};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Info,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
            Self::Info => "info",
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditTotals {
    pub packages: u64,
    #[serde(default)]
    pub findings: u64,
    #[serde(default)]
    pub vulnerable_packages: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditSummary {
    pub totals: AuditTotals,
    #[serde(default)]
    pub by_severity: BTreeMap<Severity, u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Finding {
    pub id: String,
    pub package: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub severity: Severity,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advisory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detected_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FindingFilter {
    pub severity: Option<Severity>,
    pub package: Option<String>,
    pub limit: Option<u32>,
    pub cursor: Option<String>,
}

impl FindingFilter {
    fn apply(&self, config: RequestConfig) -> RequestConfig {
        config
            .query_opt("severity", self.severity.map(|s| s.as_str()))
            .query_opt("package", self.package.as_deref())
            .query_opt("limit", self.limit)
            .query_opt("cursor", self.cursor.as_deref())
    }
}

/// Dependency audit results.
#[derive(Clone)]
pub struct AuditSource {
    client: ApiClient,
}

impl AuditSource {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    pub async fn summary(&self) -> Result<AuditSummary, TypedError> {
        self.client.get_json("/audit/summary").await
    }

    pub async fn list_findings(&self, filter: &FindingFilter) -> Result<Page<Finding>, TypedError> {
        let config = filter.apply(RequestConfig::get("/audit/findings"));
        let page: Page<Finding> = self.client.send_json(config).await?;
        debug!(event = "audit.findings_listed", domain = "audit", count = page.items.len());
        Ok(page)
    }

    pub async fn get_finding(&self, id: &str) -> Result<Finding, TypedError> {
        let id = path_segment("finding", id)?;
        self.client.get_json(&format!("/audit/findings/{id}")).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{CannedTransport, client, ok};
    use opsboard_client::ErrorKind;
    use serde_json::json;

    #[tokio::test]
    async fn summary_unwraps_envelope_data() {
        let transport = CannedTransport::new(vec![ok(json!({ "totals": { "packages": 3 } }))]);
        let audit = AuditSource::new(client(transport.clone()));
        let summary = audit.summary().await.expect("summary");
        assert_eq!(summary.totals.packages, 3);
        assert!(summary.by_severity.is_empty());
        assert_eq!(transport.last().url, "https://ops.example.com/api/v1/audit/summary");
    }

    #[tokio::test]
    async fn findings_filter_becomes_query() {
        let transport = CannedTransport::new(vec![ok(json!({
            "items": [{
                "id": "f-1",
                "package": "openssl",
                "severity": "high",
                "title": "buffer overflow"
            }],
            "nextCursor": "c-2"
        }))]);
        let audit = AuditSource::new(client(transport.clone()));
        let filter = FindingFilter {
            severity: Some(Severity::High),
            limit: Some(25),
            ..FindingFilter::default()
        };
        let page = audit.list_findings(&filter).await.expect("page");
        assert_eq!(page.items[0].severity, Severity::High);
        assert_eq!(page.next_cursor.as_deref(), Some("c-2"));
        assert_eq!(
            transport.last().query,
            vec![
                ("severity".to_string(), "high".to_string()),
                ("limit".to_string(), "25".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn missing_finding_is_not_found() {
        let transport = CannedTransport::new(vec![(
            404,
            json!({
                "ok": false,
                "error": { "code": "E_NOT_FOUND", "message": "no such finding" }
            }),
        )]);
        let audit = AuditSource::new(client(transport));
        let err = audit.get_finding("f-404").await.expect_err("missing");
        assert_eq!(err.kind, ErrorKind::NotFound);
        assert_eq!(err.message, "no such finding");
    }
}
