use bytes::Bytes;
use reqwest::header::{CONTENT_TYPE, HeaderMap};
use reqwest::{Method, StatusCode};
use tracing::debug;

use crate::config::ClientConfig;
use crate::envelope::{EnvelopeMeta, is_json_content_type};
use crate::errors::{ConfigError, TransportError};

/// Fully resolved outbound request handed to a [`Transport`].
#[derive(Clone, Debug)]
pub struct TransportRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub query: Vec<(String, String)>,
    pub body: Option<Bytes>,
}

/// Response body as it moves through response interceptors.
#[derive(Clone, Debug, PartialEq)]
pub enum ResponseBody {
    /// Bytes exactly as the transport received them.
    Raw(Bytes),
    /// A success envelope already unwrapped by an interceptor.
    Unwrapped {
        data: serde_json::Value,
        meta: Option<EnvelopeMeta>,
    },
}

/// Transport response. Cloning is cheap and never drains the body.
#[derive(Clone, Debug)]
pub struct TransportResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: ResponseBody,
}

impl TransportResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: ResponseBody::Raw(body.into()),
        }
    }

    /// Builds a JSON response; convenient for fakes.
    pub fn json(status: StatusCode, value: &serde_json::Value) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            reqwest::header::HeaderValue::from_static("application/json"),
        );
        let body = serde_json::to_vec(value).unwrap_or_default();
        Self::new(status, headers, body)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
    }

    pub fn is_json(&self) -> bool {
        self.content_type().is_some_and(is_json_content_type)
    }

    pub fn is_event_stream(&self) -> bool {
        self.content_type()
            .is_some_and(|ct| ct.trim_start().to_ascii_lowercase().starts_with("text/event-stream"))
    }

    /// Raw body bytes, if the body has not been unwrapped.
    pub fn raw_bytes(&self) -> Option<&Bytes> {
        match &self.body {
            ResponseBody::Raw(bytes) => Some(bytes),
            ResponseBody::Unwrapped { .. } => None,
        }
    }

    /// Short printable excerpt of a raw body, for error messages.
    pub(crate) fn body_preview(&self) -> Option<String> {
        let bytes = self.raw_bytes()?;
        if bytes.is_empty() {
            return None;
        }
        let text = String::from_utf8_lossy(&bytes[..bytes.len().min(256)]);
        Some(text.trim().to_string())
    }
}

/// Executes one HTTP round trip. Implemented by the production reqwest
/// transport and by fakes in tests.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: TransportRequest) -> Result<TransportResponse, TransportError>;
}

/// Production transport backed by `reqwest`.
///
/// Only the connect timeout is configured; whole-call timeouts are the
/// caller's business.
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(config: &ClientConfig) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| ConfigError::Client(e.to_string()))?;
        Ok(Self { client })
    }

    /// Wraps an existing client (shared connection pool).
    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }
}

#[async_trait::async_trait]
impl Transport for ReqwestTransport {
    async fn execute(
        &self,
        request: TransportRequest,
    ) -> Result<TransportResponse, TransportError> {
        let mut builder = self
            .client
            .request(request.method.clone(), &request.url)
            .headers(request.headers);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?;
        debug!(
            event = "http.response_received",
            domain = "http",
            method = %request.method,
            status = status.as_u16(),
            response_bytes = body.len() as u64
        );
        Ok(TransportResponse::new(status, headers, body))
    }
}
