//! Ordered request/response/error hooks run by the client around every call.

use std::sync::Arc;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::{debug, warn};

use crate::envelope::{Detected, Envelope};
use crate::errors::{InterceptorError, TypedError};
use crate::request::RequestConfig;
use crate::transport::{ResponseBody, TransportResponse};

/// Transforms an outgoing request.
#[async_trait::async_trait]
pub trait RequestInterceptor: Send + Sync {
    async fn on_request(&self, config: RequestConfig) -> Result<RequestConfig, InterceptorError>;
}

/// Transforms a transport response before it is decoded.
///
/// Implementations receive the response object, not a decoded body, so they
/// can skip content types they do not handle without reading anything.
#[async_trait::async_trait]
pub trait ResponseInterceptor: Send + Sync {
    async fn on_response(
        &self,
        response: TransportResponse,
    ) -> Result<TransportResponse, InterceptorError>;
}

/// Observes or enriches a classified error. Cannot recover from it.
#[async_trait::async_trait]
pub trait ErrorInterceptor: Send + Sync {
    async fn on_error(&self, error: TypedError) -> Result<TypedError, InterceptorError>;
}

/// Stamps the request id header when the caller has not set one.
pub struct RequestIdInterceptor {
    header: HeaderName,
}

impl RequestIdInterceptor {
    pub fn new(header: HeaderName) -> Self {
        Self { header }
    }
}

#[async_trait::async_trait]
impl RequestInterceptor for RequestIdInterceptor {
    async fn on_request(
        &self,
        mut config: RequestConfig,
    ) -> Result<RequestConfig, InterceptorError> {
        if let Some(existing) = config.headers.get(&self.header) {
            let existing = existing
                .to_str()
                .map_err(|e| {
                    InterceptorError::new(format!("unreadable {} header: {e}", self.header))
                })?
                .to_string();
            config.set_request_id(existing);
            return Ok(config);
        }
        let value = HeaderValue::from_str(config.request_id())
            .map_err(|e| InterceptorError::new(format!("invalid request id: {e}")))?;
        config.headers.insert(self.header.clone(), value);
        Ok(config)
    }
}

/// Adds fixed headers (for example a static API token) unless already set.
pub struct HeaderInterceptor {
    headers: HeaderMap,
}

impl HeaderInterceptor {
    pub fn new(headers: HeaderMap) -> Self {
        Self { headers }
    }
}

#[async_trait::async_trait]
impl RequestInterceptor for HeaderInterceptor {
    async fn on_request(
        &self,
        mut config: RequestConfig,
    ) -> Result<RequestConfig, InterceptorError> {
        for (name, value) in &self.headers {
            if !config.headers.contains_key(name) {
                config.headers.insert(name.clone(), value.clone());
            }
        }
        Ok(config)
    }
}

/// Unwraps success envelopes in JSON responses.
///
/// Error envelopes, plain JSON, unparsable bodies, event streams and non-JSON
/// content are left raw. A body is unwrapped at most once.
pub struct EnvelopeInterceptor;

#[async_trait::async_trait]
impl ResponseInterceptor for EnvelopeInterceptor {
    async fn on_response(
        &self,
        mut response: TransportResponse,
    ) -> Result<TransportResponse, InterceptorError> {
        if response.is_event_stream() || !response.is_json() {
            return Ok(response);
        }
        let Some(bytes) = response.raw_bytes() else {
            return Ok(response);
        };
        if let Some(Detected::Envelope(Envelope::Success { data, meta })) =
            Envelope::detect_bytes(bytes)
        {
            debug!(
                event = "api.envelope_unwrapped",
                domain = "api",
                status = response.status.as_u16(),
                api_version = meta.as_ref().and_then(|m| m.api_version.as_deref()).unwrap_or("")
            );
            response.body = ResponseBody::Unwrapped { data, meta };
        }
        Ok(response)
    }
}

/// Logs every error surfaced to a caller.
pub struct TracingErrorInterceptor;

#[async_trait::async_trait]
impl ErrorInterceptor for TracingErrorInterceptor {
    async fn on_error(&self, error: TypedError) -> Result<TypedError, InterceptorError> {
        warn!(
            event = "api.call_failed",
            domain = "api",
            kind = error.kind.as_str(),
            status = error.status.unwrap_or_default(),
            code = error.code.as_deref().unwrap_or(""),
            request_id = error.request_id.as_deref().unwrap_or(""),
            message = %error.message
        );
        Ok(error)
    }
}

/// The three frozen interceptor lists owned by a client.
#[derive(Clone, Default)]
pub struct InterceptorChain {
    pub(crate) request: Arc<[Arc<dyn RequestInterceptor>]>,
    pub(crate) response: Arc<[Arc<dyn ResponseInterceptor>]>,
    pub(crate) error: Arc<[Arc<dyn ErrorInterceptor>]>,
}

impl InterceptorChain {
    pub fn new(
        request: Vec<Arc<dyn RequestInterceptor>>,
        response: Vec<Arc<dyn ResponseInterceptor>>,
        error: Vec<Arc<dyn ErrorInterceptor>>,
    ) -> Self {
        Self {
            request: request.into(),
            response: response.into(),
            error: error.into(),
        }
    }

    pub async fn run_request(
        &self,
        mut config: RequestConfig,
    ) -> Result<RequestConfig, InterceptorError> {
        for interceptor in self.request.iter() {
            config = interceptor.on_request(config).await?;
        }
        Ok(config)
    }

    pub async fn run_response(
        &self,
        mut response: TransportResponse,
    ) -> Result<TransportResponse, InterceptorError> {
        for interceptor in self.response.iter() {
            response = interceptor.on_response(response).await?;
        }
        Ok(response)
    }

    /// Runs error interceptors in order. The kind can never change. If an
    /// interceptor fails, the error as it entered the chain is returned.
    pub async fn run_error(&self, error: TypedError) -> TypedError {
        let original = error.clone();
        let mut current = error;
        for interceptor in self.error.iter() {
            let kind = current.kind;
            match interceptor.on_error(current).await {
                Ok(mut enriched) => {
                    if enriched.kind != kind {
                        warn!(
                            event = "api.error_kind_rewrite_ignored",
                            domain = "api",
                            from = kind.as_str(),
                            to = enriched.kind.as_str()
                        );
                        enriched.kind = kind;
                    }
                    current = enriched;
                }
                Err(err) => {
                    warn!(
                        event = "api.error_interceptor_failed",
                        domain = "api",
                        error = %err
                    );
                    return original;
                }
            }
        }
        current
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use reqwest::StatusCode;
    use reqwest::header::CONTENT_TYPE;
    use serde_json::json;

    fn request_id_interceptor() -> RequestIdInterceptor {
        RequestIdInterceptor::new(HeaderName::from_static("x-request-id"))
    }

    #[tokio::test]
    async fn request_id_is_stamped_exactly_once() {
        let interceptor = request_id_interceptor();
        let config = RequestConfig::get("/runs");
        let expected = config.request_id().to_string();
        let config = interceptor.on_request(config).await.expect("stamp");
        let config = interceptor.on_request(config).await.expect("stamp again");
        let values: Vec<_> = config.headers.get_all("x-request-id").iter().collect();
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].to_str().ok(), Some(expected.as_str()));
    }

    #[tokio::test]
    async fn caller_request_id_is_never_overwritten() {
        let interceptor = request_id_interceptor();
        for _ in 0..2 {
            let config = RequestConfig::get("/runs")
                .header("x-request-id", "caller-1")
                .expect("header");
            let config = interceptor.on_request(config).await.expect("stamp");
            assert_eq!(
                config.headers.get("x-request-id").and_then(|v| v.to_str().ok()),
                Some("caller-1")
            );
            assert_eq!(config.request_id(), "caller-1");
        }
    }

    #[tokio::test]
    async fn header_interceptor_keeps_caller_values() {
        let mut defaults = HeaderMap::new();
        defaults.insert("x-tenant", HeaderValue::from_static("default"));
        defaults.insert("x-client", HeaderValue::from_static("opsboard"));
        let interceptor = HeaderInterceptor::new(defaults);
        let config = RequestConfig::get("/runs").header("x-tenant", "acme").expect("header");
        let config = interceptor.on_request(config).await.expect("headers");
        assert_eq!(config.headers.get("x-tenant").and_then(|v| v.to_str().ok()), Some("acme"));
        assert_eq!(config.headers.get("x-client").and_then(|v| v.to_str().ok()), Some("opsboard"));
    }

    #[tokio::test]
    async fn envelope_interceptor_unwraps_success_once() {
        let response = TransportResponse::json(
            StatusCode::OK,
            &json!({"ok": true, "data": {"ok": true, "data": 1}}),
        );
        let once = EnvelopeInterceptor.on_response(response).await.expect("unwrap");
        let twice = EnvelopeInterceptor.on_response(once).await.expect("no-op");
        assert_eq!(
            twice.body,
            ResponseBody::Unwrapped {
                data: json!({"ok": true, "data": 1}),
                meta: None
            }
        );
    }

    #[tokio::test]
    async fn envelope_interceptor_leaves_errors_and_streams_raw() {
        let failure = TransportResponse::json(
            StatusCode::CONFLICT,
            &json!({"ok": false, "error": {"code": "E_CONFLICT", "message": "dup"}}),
        );
        let out = EnvelopeInterceptor.on_response(failure).await.expect("pass");
        assert!(matches!(out.body, ResponseBody::Raw(_)));

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
        let stream = TransportResponse::new(StatusCode::OK, headers, r#"{"ok":true,"data":1}"#);
        let out = EnvelopeInterceptor.on_response(stream).await.expect("pass");
        assert!(matches!(out.body, ResponseBody::Raw(_)));
    }

    struct Rewriter;

    #[async_trait::async_trait]
    impl ErrorInterceptor for Rewriter {
        async fn on_error(&self, error: TypedError) -> Result<TypedError, InterceptorError> {
            let mut error = error.with_context("enriched", "yes");
            error.kind = ErrorKind::NotFound;
            Ok(error)
        }
    }

    struct Failing;

    #[async_trait::async_trait]
    impl ErrorInterceptor for Failing {
        async fn on_error(&self, _error: TypedError) -> Result<TypedError, InterceptorError> {
            Err(InterceptorError::new("logger unavailable"))
        }
    }

    #[tokio::test]
    async fn error_interceptors_enrich_but_cannot_change_kind() {
        let chain = InterceptorChain::new(vec![], vec![], vec![Arc::new(Rewriter)]);
        let out = chain
            .run_error(TypedError::new(ErrorKind::ServerError, "boom"))
            .await;
        assert_eq!(out.kind, ErrorKind::ServerError);
        assert_eq!(out.context.get("enriched").map(String::as_str), Some("yes"));
    }

    #[tokio::test]
    async fn failing_error_interceptor_surfaces_original_error() {
        let chain = InterceptorChain::new(
            vec![],
            vec![],
            vec![Arc::new(Rewriter), Arc::new(Failing)],
        );
        let original = TypedError::new(ErrorKind::RateLimit, "slow down");
        let out = chain.run_error(original.clone()).await;
        assert_eq!(out, original);
    }
}
