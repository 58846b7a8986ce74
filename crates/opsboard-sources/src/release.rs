use chrono::{DateTime, Utc};
use opsboard_client::{ApiClient, RequestConfig, TypedError};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{Page, path_segment};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReleaseStatus {
    Draft,
    Published,
    Archived,
    #[serde(other)]
    Unknown,
}

impl ReleaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Published => "published",
            Self::Archived => "archived",
            Self::Unknown => "unknown",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Release {
    pub id: String,
    pub version: String,
    pub title: String,
    pub status: ReleaseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
}

/// Body of a release creation request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseDraft {
    pub version: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReleaseFilter {
    pub status: Option<ReleaseStatus>,
    pub limit: Option<u32>,
    pub cursor: Option<String>,
}

#[derive(Clone)]
pub struct ReleaseSource {
    client: ApiClient,
}

impl ReleaseSource {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    pub async fn list_releases(&self, filter: &ReleaseFilter) -> Result<Page<Release>, TypedError> {
        let config = RequestConfig::get("/releases")
            .query_opt("status", filter.status.map(|s| s.as_str()))
            .query_opt("limit", filter.limit)
            .query_opt("cursor", filter.cursor.as_deref());
        self.client.send_json(config).await
    }

    pub async fn get_release(&self, id: &str) -> Result<Release, TypedError> {
        let id = path_segment("release", id)?;
        self.client.get_json(&format!("/releases/{id}")).await
    }

    pub async fn create_release(&self, draft: &ReleaseDraft) -> Result<Release, TypedError> {
        let release: Release = self.client.post_json("/releases", draft).await?;
        info!(
            event = "release.created",
            domain = "release",
            id = %release.id,
            version = %release.version
        );
        Ok(release)
    }

    pub async fn publish_release(&self, id: &str) -> Result<Release, TypedError> {
        let id = path_segment("release", id)?;
        let release: Release = self
            .client
            .send_json(RequestConfig::post(format!("/releases/{id}/publish")))
            .await?;
        info!(event = "release.published", domain = "release", id = %release.id);
        Ok(release)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{CannedTransport, client, ok};
    use opsboard_client::ErrorKind;
    use reqwest::Method;
    use serde_json::json;

    fn release_json(status: &str) -> serde_json::Value {
        json!({
            "id": "rel-1",
            "version": "2.4.0",
            "title": "Spring release",
            "status": status,
            "createdAt": "2024-04-02T08:00:00Z"
        })
    }

    #[tokio::test]
    async fn create_posts_draft_as_json() {
        let transport = CannedTransport::new(vec![ok(release_json("draft"))]);
        let releases = ReleaseSource::new(client(transport.clone()));
        let draft = ReleaseDraft {
            version: "2.4.0".into(),
            title: "Spring release".into(),
            notes: None,
        };
        let release = releases.create_release(&draft).await.expect("release");
        assert_eq!(release.status, ReleaseStatus::Draft);

        let sent = transport.last();
        assert_eq!(sent.method, Method::POST);
        assert!(sent.url.ends_with("/api/v1/releases"));
        assert_eq!(transport.last_body(), json!({ "version": "2.4.0", "title": "Spring release" }));
    }

    #[tokio::test]
    async fn publish_conflict_is_classified() {
        let transport = CannedTransport::new(vec![(
            409,
            json!({
                "ok": false,
                "error": { "code": "E_CONFLICT", "message": "already published" }
            }),
        )]);
        let releases = ReleaseSource::new(client(transport.clone()));
        let err = releases.publish_release("rel-1").await.expect_err("conflict");
        assert_eq!(err.kind, ErrorKind::Conflict);
        assert_eq!(err.code.as_deref(), Some("E_CONFLICT"));
        assert!(transport.last().url.ends_with("/releases/rel-1/publish"));
    }

    #[tokio::test]
    async fn unknown_status_does_not_fail_decoding() {
        let transport =
            CannedTransport::new(vec![ok(json!({ "items": [release_json("staged")] }))]);
        let releases = ReleaseSource::new(client(transport));
        let page = releases
            .list_releases(&ReleaseFilter::default())
            .await
            .expect("page");
        assert_eq!(page.items[0].status, ReleaseStatus::Unknown);
    }
}
