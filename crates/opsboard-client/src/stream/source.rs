use reqwest::header::{ACCEPT, CACHE_CONTROL, HeaderName, HeaderValue};
use tracing::debug;

use crate::config::ClientConfig;
use crate::envelope::Envelope;
use crate::errors::{
    ConfigError, ErrorKind, TransportError, TypedError, map_error, map_transport_error,
};

use super::sse::{FrameStream, frame_stream};

/// Identifies one live stream and where to resume it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamRequest {
    /// Registry key; one live connection per key.
    pub key: String,
    /// API path of the stream endpoint, relative to the client base path.
    pub path: String,
    /// Cursor sent as `Last-Event-ID` when resuming.
    pub last_event_id: Option<String>,
}

impl StreamRequest {
    pub fn new(key: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            path: path.into(),
            last_event_id: None,
        }
    }

    pub fn resume_from(mut self, last_event_id: impl Into<String>) -> Self {
        self.last_event_id = Some(last_event_id.into());
        self
    }
}

/// Opens push connections. The production implementation speaks SSE over
/// reqwest; tests script frames directly.
#[async_trait::async_trait]
pub trait EventSource: Send + Sync {
    async fn connect(&self, request: &StreamRequest) -> Result<FrameStream, TypedError>;
}

const LAST_EVENT_ID: HeaderName = HeaderName::from_static("last-event-id");

/// Server-sent events over HTTP.
pub struct SseEventSource {
    client: reqwest::Client,
    config: ClientConfig,
    request_id_header: HeaderName,
}

impl SseEventSource {
    pub fn new(config: ClientConfig) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| ConfigError::Client(e.to_string()))?;
        Self::with_client(client, config)
    }

    pub fn with_client(client: reqwest::Client, config: ClientConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let request_id_header =
            HeaderName::from_bytes(config.request_id_header.as_bytes()).map_err(|e| {
                ConfigError::Invalid {
                    key: "request_id_header",
                    message: e.to_string(),
                }
            })?;
        Ok(Self {
            client,
            config,
            request_id_header,
        })
    }
}

#[async_trait::async_trait]
impl EventSource for SseEventSource {
    async fn connect(&self, request: &StreamRequest) -> Result<FrameStream, TypedError> {
        let url = self.config.url_for(&request.path);
        let request_id = uuid::Uuid::new_v4().to_string();
        let mut builder = self
            .client
            .get(&url)
            .header(ACCEPT, HeaderValue::from_static("text/event-stream"))
            .header(CACHE_CONTROL, HeaderValue::from_static("no-cache"))
            .header(self.request_id_header.clone(), request_id.as_str());
        if let Some(cursor) = &request.last_event_id {
            builder = builder.header(LAST_EVENT_ID, cursor.as_str());
        }
        debug!(
            event = "stream.connecting",
            domain = "stream",
            key = %request.key,
            request_id = %request_id,
            resume = request.last_event_id.is_some()
        );

        let response = builder
            .send()
            .await
            .map_err(|e| {
                map_transport_error(&TransportError::from(e)).with_request_id(request_id.clone())
            })?;
        let status = response.status();
        if !status.is_success() {
            let body = response.bytes().await.unwrap_or_default();
            let detail = Envelope::detect_bytes(&body).and_then(|d| d.failure().cloned());
            return Err(map_error(status, detail.as_ref(), None).with_request_id(request_id));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();
        if !content_type.starts_with("text/event-stream") {
            return Err(TypedError::new(
                ErrorKind::ServerError,
                format!("stream endpoint answered with content type {content_type:?}"),
            )
            .with_status(status.as_u16())
            .with_request_id(request_id));
        }

        Ok(frame_stream(response.bytes_stream()))
    }
}
