use std::sync::Arc;

use reqwest::header::HeaderName;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::abort::AbortSignal;
use crate::config::ClientConfig;
use crate::envelope::{Detected, Envelope};
use crate::errors::{ConfigError, TypedError, map_error, map_transport_error};
use crate::interceptor::{
    EnvelopeInterceptor, ErrorInterceptor, InterceptorChain, RequestIdInterceptor,
    RequestInterceptor, ResponseInterceptor, TracingErrorInterceptor,
};
use crate::request::{RequestConfig, normalize_path};
use crate::transport::{
    ReqwestTransport, ResponseBody, Transport, TransportRequest, TransportResponse,
};

/// Lifecycle of a single call. Transitions are strictly forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum CallState {
    Built,
    RequestIntercepted,
    Sent,
    ResponseIntercepted,
    Decoded,
    Success,
    Failed,
}

impl CallState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Built => "built",
            Self::RequestIntercepted => "request_intercepted",
            Self::Sent => "sent",
            Self::ResponseIntercepted => "response_intercepted",
            Self::Decoded => "decoded",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

struct Call {
    request_id: String,
    state: CallState,
}

impl Call {
    fn new(request_id: &str) -> Self {
        debug!(
            event = "api.call_state",
            domain = "api",
            request_id,
            state = CallState::Built.as_str()
        );
        Self {
            request_id: request_id.to_string(),
            state: CallState::Built,
        }
    }

    fn advance(&mut self, next: CallState) {
        debug_assert!(
            next > self.state,
            "call state must move forward: {:?} -> {next:?}",
            self.state
        );
        self.state = next;
        debug!(
            event = "api.call_state",
            domain = "api",
            request_id = %self.request_id,
            state = next.as_str()
        );
    }
}

struct ClientInner {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    interceptors: InterceptorChain,
}

/// Shared request pipeline used by every data source.
///
/// Construct once at startup and hand clones to each source. Interceptor
/// lists are fixed when the client is built.
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<ClientInner>,
}

impl ApiClient {
    pub fn builder(config: ClientConfig) -> ApiClientBuilder {
        ApiClientBuilder::new(config)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Runs the full pipeline and returns the decoded JSON payload.
    ///
    /// Success envelopes yield their `data`; other JSON is returned as-is, a
    /// non-JSON body as a JSON string, and an empty body as `null`.
    pub async fn send(&self, config: RequestConfig) -> Result<serde_json::Value, TypedError> {
        let mut call = Call::new(config.request_id());
        match self.run(&mut call, config).await {
            Ok(value) => {
                call.advance(CallState::Success);
                Ok(value)
            }
            Err(error) => {
                call.advance(CallState::Failed);
                let error = if error.request_id.is_none() {
                    error.with_request_id(call.request_id.clone())
                } else {
                    error
                };
                Err(self.inner.interceptors.run_error(error).await)
            }
        }
    }

    /// Like [`send`](Self::send), but fails with a timeout error as soon as
    /// `signal` is aborted.
    pub async fn send_with_abort(
        &self,
        config: RequestConfig,
        mut signal: AbortSignal,
    ) -> Result<serde_json::Value, TypedError> {
        let request_id = config.request_id().to_string();
        tokio::select! {
            result = self.send(config) => result,
            _ = signal.aborted() => {
                debug!(event = "api.call_aborted", domain = "api", request_id = %request_id);
                let error = TypedError::aborted().with_request_id(request_id);
                Err(self.inner.interceptors.run_error(error).await)
            }
        }
    }

    /// Sends and deserializes the payload into `T`.
    pub async fn send_json<T: DeserializeOwned>(
        &self,
        config: RequestConfig,
    ) -> Result<T, TypedError> {
        let value = self.send(config).await?;
        decode_payload(value)
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, TypedError> {
        self.send_json(RequestConfig::get(path)).await
    }

    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, TypedError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.send_json(RequestConfig::post(path).json(body)?).await
    }

    pub async fn delete_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, TypedError> {
        self.send_json(RequestConfig::delete(path)).await
    }

    async fn run(
        &self,
        call: &mut Call,
        config: RequestConfig,
    ) -> Result<serde_json::Value, TypedError> {
        let interceptors = &self.inner.interceptors;

        let config = interceptors
            .run_request(config)
            .await
            .map_err(|e| TypedError::interceptor("request", &e))?;
        call.request_id = config.request_id().to_string();
        call.advance(CallState::RequestIntercepted);

        let request = self.resolve(config);
        debug!(
            event = "api.call_sent",
            domain = "api",
            request_id = %call.request_id,
            method = %request.method,
            url = %request.url
        );
        let response = self
            .inner
            .transport
            .execute(request)
            .await
            .map_err(|e| map_transport_error(&e))?;
        call.advance(CallState::Sent);

        let response = interceptors
            .run_response(response)
            .await
            .map_err(|e| TypedError::interceptor("response", &e))?;
        call.advance(CallState::ResponseIntercepted);

        let outcome = decode_response(response);
        call.advance(CallState::Decoded);
        outcome
    }

    fn resolve(&self, config: RequestConfig) -> TransportRequest {
        let client_config = &self.inner.config;
        let path = normalize_path(&client_config.base_path, &config.path);
        TransportRequest {
            method: config.method,
            url: client_config.url_for(&path),
            headers: config.headers,
            query: config.query,
            body: config.body,
        }
    }
}

/// Turns an intercepted response into a payload or a classified error.
///
/// Bodies already unwrapped by the envelope interceptor are used directly.
fn decode_response(response: TransportResponse) -> Result<serde_json::Value, TypedError> {
    let status = response.status;
    if !status.is_success() {
        let detail = response
            .raw_bytes()
            .filter(|_| response.is_json())
            .and_then(|bytes| Envelope::detect_bytes(bytes))
            .and_then(|detected| detected.failure().cloned());
        let mut error = map_error(status, detail.as_ref(), None);
        if detail.is_none()
            && let Some(preview) = response.body_preview()
        {
            error = error.with_context("body_preview", preview);
        }
        return Err(error);
    }

    let raw_is_json = response.is_json();
    let bytes = match response.body {
        ResponseBody::Unwrapped { data, .. } => return Ok(data),
        ResponseBody::Raw(bytes) => bytes,
    };
    if bytes.is_empty() {
        return Ok(serde_json::Value::Null);
    }
    match serde_json::from_slice::<serde_json::Value>(&bytes) {
        // Only failure envelopes are acted on here; success unwrapping belongs
        // to the envelope interceptor.
        Ok(value) if raw_is_json && value.get("ok").and_then(|ok| ok.as_bool()) == Some(false) => {
            match Envelope::detect(value) {
                Detected::Envelope(Envelope::Failure { error, .. }) => {
                    Err(map_error(status, Some(&error), None))
                }
                other => Ok(other.into_payload().unwrap_or_default()),
            }
        }
        Ok(value) => Ok(value),
        Err(_) => Ok(serde_json::Value::String(
            String::from_utf8_lossy(&bytes).into_owned(),
        )),
    }
}

fn decode_payload<T: DeserializeOwned>(value: serde_json::Value) -> Result<T, TypedError> {
    serde_json::from_value(value).map_err(|e| TypedError::decode(e.to_string()))
}

/// Builder for [`ApiClient`]. Built-in interceptors are registered ahead of
/// anything added here.
pub struct ApiClientBuilder {
    config: ClientConfig,
    transport: Option<Arc<dyn Transport>>,
    request: Vec<Arc<dyn RequestInterceptor>>,
    response: Vec<Arc<dyn ResponseInterceptor>>,
    error: Vec<Arc<dyn ErrorInterceptor>>,
    log_errors: bool,
}

impl ApiClientBuilder {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            transport: None,
            request: Vec::new(),
            response: Vec::new(),
            error: Vec::new(),
            log_errors: true,
        }
    }

    /// Uses a custom transport instead of the default reqwest one.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn request_interceptor(mut self, interceptor: Arc<dyn RequestInterceptor>) -> Self {
        self.request.push(interceptor);
        self
    }

    pub fn response_interceptor(mut self, interceptor: Arc<dyn ResponseInterceptor>) -> Self {
        self.response.push(interceptor);
        self
    }

    pub fn error_interceptor(mut self, interceptor: Arc<dyn ErrorInterceptor>) -> Self {
        self.error.push(interceptor);
        self
    }

    /// Disables the built-in error logging interceptor.
    pub fn without_error_logging(mut self) -> Self {
        self.log_errors = false;
        self
    }

    pub fn build(self) -> Result<ApiClient, ConfigError> {
        self.config.validate()?;
        let header = HeaderName::from_bytes(self.config.request_id_header.as_bytes()).map_err(|e| {
            ConfigError::Invalid {
                key: "request_id_header",
                message: e.to_string(),
            }
        })?;

        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new(&self.config)?),
        };

        let mut request: Vec<Arc<dyn RequestInterceptor>> =
            vec![Arc::new(RequestIdInterceptor::new(header))];
        request.extend(self.request);
        let mut response: Vec<Arc<dyn ResponseInterceptor>> = vec![Arc::new(EnvelopeInterceptor)];
        response.extend(self.response);
        let mut error: Vec<Arc<dyn ErrorInterceptor>> = Vec::new();
        if self.log_errors {
            error.push(Arc::new(TracingErrorInterceptor));
        }
        error.extend(self.error);

        Ok(ApiClient {
            inner: Arc::new(ClientInner {
                config: self.config,
                transport,
                interceptors: InterceptorChain::new(request, response, error),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{
        ErrorCause, ErrorKind, InterceptorError, TransportError, TransportErrorKind,
    };
    use reqwest::StatusCode;
    use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Returns scripted responses in order and records every request.
    #[derive(Default)]
    struct ScriptedTransport {
        responses: Mutex<VecDeque<Result<TransportResponse, TransportError>>>,
        seen: Mutex<Vec<TransportRequest>>,
    }

    impl ScriptedTransport {
        fn with(responses: Vec<Result<TransportResponse, TransportError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn seen(&self) -> Vec<TransportRequest> {
            self.seen.lock().expect("lock").clone()
        }
    }

    #[async_trait::async_trait]
    impl Transport for ScriptedTransport {
        async fn execute(
            &self,
            request: TransportRequest,
        ) -> Result<TransportResponse, TransportError> {
            self.seen.lock().expect("lock").push(request);
            self.responses
                .lock()
                .expect("lock")
                .pop_front()
                .unwrap_or_else(|| {
                    Err(TransportError::new(TransportErrorKind::Other, "script exhausted"))
                })
        }
    }

    struct PendingTransport;

    #[async_trait::async_trait]
    impl Transport for PendingTransport {
        async fn execute(
            &self,
            _request: TransportRequest,
        ) -> Result<TransportResponse, TransportError> {
            std::future::pending().await
        }
    }

    fn client_with(transport: Arc<dyn Transport>) -> ApiClient {
        ApiClient::builder(ClientConfig::new("https://ops.example.com"))
            .transport(transport)
            .build()
            .expect("client")
    }

    fn ok_json(value: serde_json::Value) -> Result<TransportResponse, TransportError> {
        Ok(TransportResponse::json(StatusCode::OK, &value))
    }

    #[tokio::test]
    async fn audit_summary_envelope_is_unwrapped() {
        let transport = ScriptedTransport::with(vec![ok_json(
            json!({"ok": true, "data": {"totals": {"packages": 3}}}),
        )]);
        let client = client_with(transport.clone());
        let value = client.send(RequestConfig::get("/audit/summary")).await.expect("send");
        assert_eq!(value, json!({"totals": {"packages": 3}}));

        let seen = transport.seen();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].url, "https://ops.example.com/api/v1/audit/summary");
        assert!(seen[0].headers.contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn unauthorized_envelope_becomes_auth_error() {
        let transport = ScriptedTransport::with(vec![Ok(TransportResponse::json(
            StatusCode::UNAUTHORIZED,
            &json!({"ok": false, "error": {"code": "E_UNAUTHORIZED", "message": "token expired"}}),
        ))]);
        let client = client_with(transport);
        let err = client.send(RequestConfig::get("/runs")).await.expect_err("401");
        assert_eq!(err.kind, ErrorKind::AuthError);
        assert_eq!(err.message, "token expired");
        assert_eq!(err.status, Some(401));
        assert!(err.request_id.is_some());
    }

    #[tokio::test]
    async fn not_found_without_body_maps_by_status() {
        let transport = ScriptedTransport::with(vec![Ok(TransportResponse::new(
            StatusCode::NOT_FOUND,
            HeaderMap::new(),
            Vec::new(),
        ))]);
        let err = client_with(transport)
            .send(RequestConfig::get("/runs/9"))
            .await
            .expect_err("404");
        assert_eq!(err.kind, ErrorKind::NotFound);
        assert_eq!(err.message, "Not Found");
    }

    #[tokio::test]
    async fn error_envelope_with_success_status_still_fails() {
        let transport = ScriptedTransport::with(vec![ok_json(
            json!({"ok": false, "error": {"code": "E_TOOL_EXEC", "message": "tool crashed"}}),
        )]);
        let err = client_with(transport)
            .send(RequestConfig::post("/workflows/runs"))
            .await
            .expect_err("tool error");
        assert_eq!(err.kind, ErrorKind::ToolError);
        assert_eq!(err.status, Some(200));
    }

    #[tokio::test]
    async fn plain_json_and_text_pass_through() {
        let mut text_headers = HeaderMap::new();
        text_headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        let transport = ScriptedTransport::with(vec![
            ok_json(json!({"status": "up"})),
            Ok(TransportResponse::new(StatusCode::OK, text_headers, "pong")),
            Ok(TransportResponse::new(StatusCode::NO_CONTENT, HeaderMap::new(), Vec::new())),
        ]);
        let client = client_with(transport);
        assert_eq!(
            client.send(RequestConfig::get("/system/health")).await.expect("json"),
            json!({"status": "up"})
        );
        assert_eq!(
            client.send(RequestConfig::get("/ping")).await.expect("text"),
            json!("pong")
        );
        assert_eq!(
            client.send(RequestConfig::delete("/runs/1")).await.expect("empty"),
            serde_json::Value::Null
        );
    }

    #[tokio::test]
    async fn transport_failure_is_network_error() {
        let transport = ScriptedTransport::with(vec![Err(TransportError::new(
            TransportErrorKind::Connect,
            "connection refused",
        ))]);
        let err = client_with(transport)
            .send(RequestConfig::get("/runs"))
            .await
            .expect_err("network");
        assert_eq!(err.kind, ErrorKind::NetworkError);
        assert_eq!(err.status, None);
        assert!(matches!(err.cause, Some(ErrorCause::Transport(_))));
    }

    #[tokio::test]
    async fn decode_mismatch_is_server_error() {
        #[derive(Debug, serde::Deserialize)]
        struct Summary {
            #[allow(dead_code)]
            totals: u32,
        }
        let transport = ScriptedTransport::with(vec![ok_json(json!({"ok": true, "data": "nope"}))]);
        let err = client_with(transport)
            .send_json::<Summary>(RequestConfig::get("/audit/summary"))
            .await
            .expect_err("decode");
        assert_eq!(err.kind, ErrorKind::ServerError);
        assert!(matches!(err.cause, Some(ErrorCause::Decode(_))));
    }

    struct CountingEnvelopeCheck {
        unwrapped_seen: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl ResponseInterceptor for CountingEnvelopeCheck {
        async fn on_response(
            &self,
            response: TransportResponse,
        ) -> Result<TransportResponse, InterceptorError> {
            if matches!(response.body, ResponseBody::Unwrapped { .. }) {
                self.unwrapped_seen.fetch_add(1, Ordering::SeqCst);
            }
            Ok(response)
        }
    }

    #[tokio::test]
    async fn caller_response_interceptors_run_after_envelope_unwrap() {
        let check = Arc::new(CountingEnvelopeCheck {
            unwrapped_seen: AtomicUsize::new(0),
        });
        let transport = ScriptedTransport::with(vec![ok_json(
            json!({"ok": true, "data": {"ok": true, "data": "inner"}}),
        )]);
        let client = ApiClient::builder(ClientConfig::new("https://ops.example.com"))
            .transport(transport)
            .response_interceptor(check.clone())
            .build()
            .expect("client");
        // The inner object looks like an envelope too; it must not be unwrapped again.
        let value = client.send(RequestConfig::get("/nested")).await.expect("send");
        assert_eq!(value, json!({"ok": true, "data": "inner"}));
        assert_eq!(check.unwrapped_seen.load(Ordering::SeqCst), 1);
    }

    struct Order {
        tag: &'static str,
    }

    #[async_trait::async_trait]
    impl RequestInterceptor for Order {
        async fn on_request(
            &self,
            config: RequestConfig,
        ) -> Result<RequestConfig, InterceptorError> {
            let previous = config
                .headers
                .get("x-order")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string();
            let mut config = config;
            config.headers.insert(
                "x-order",
                HeaderValue::from_str(&format!("{previous}{}", self.tag)).expect("header"),
            );
            Ok(config)
        }
    }

    #[tokio::test]
    async fn request_interceptors_run_in_registration_order() {
        let transport = ScriptedTransport::with(vec![ok_json(json!(null))]);
        let client = ApiClient::builder(ClientConfig::new("https://ops.example.com"))
            .transport(transport.clone())
            .request_interceptor(Arc::new(Order { tag: "a" }))
            .request_interceptor(Arc::new(Order { tag: "b" }))
            .build()
            .expect("client");
        client.send(RequestConfig::get("/runs")).await.expect("send");
        let seen = transport.seen();
        assert_eq!(
            seen[0].headers.get("x-order").and_then(|v| v.to_str().ok()),
            Some("ab")
        );
    }

    struct Exploding;

    #[async_trait::async_trait]
    impl ResponseInterceptor for Exploding {
        async fn on_response(
            &self,
            _response: TransportResponse,
        ) -> Result<TransportResponse, InterceptorError> {
            Err(InterceptorError::new("cannot inspect"))
        }
    }

    struct Recorder {
        seen: Mutex<Vec<ErrorKind>>,
    }

    #[async_trait::async_trait]
    impl ErrorInterceptor for Recorder {
        async fn on_error(&self, error: TypedError) -> Result<TypedError, InterceptorError> {
            self.seen.lock().expect("lock").push(error.kind);
            Ok(error.with_context("view", "runs"))
        }
    }

    #[tokio::test]
    async fn failing_response_interceptor_is_mapped_once() {
        let recorder = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
        });
        let transport = ScriptedTransport::with(vec![ok_json(json!({"ok": true, "data": 1}))]);
        let client = ApiClient::builder(ClientConfig::new("https://ops.example.com"))
            .transport(transport)
            .response_interceptor(Arc::new(Exploding))
            .error_interceptor(recorder.clone())
            .build()
            .expect("client");
        let err = client.send(RequestConfig::get("/runs")).await.expect_err("fails");
        assert_eq!(err.kind, ErrorKind::NetworkError);
        assert!(matches!(err.cause, Some(ErrorCause::Interceptor(_))));
        assert_eq!(err.context.get("view").map(String::as_str), Some("runs"));
        assert_eq!(recorder.seen.lock().expect("lock").clone(), vec![ErrorKind::NetworkError]);
    }

    #[tokio::test]
    async fn abort_signal_fails_call_as_timeout() {
        let client = client_with(Arc::new(PendingTransport));
        let (handle, signal) = crate::abort::abort_pair();
        handle.abort();
        let err = client
            .send_with_abort(RequestConfig::get("/runs"), signal)
            .await
            .expect_err("aborted");
        assert_eq!(err.kind, ErrorKind::Timeout);
        assert_eq!(err.cause, Some(ErrorCause::Aborted));
    }

    #[test]
    fn build_rejects_invalid_request_id_header() {
        let result = ApiClient::builder(
            ClientConfig::new("https://ops.example.com").request_id_header("bad header"),
        )
        .transport(ScriptedTransport::with(vec![]))
        .build();
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }
}
