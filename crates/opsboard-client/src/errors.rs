use std::collections::BTreeMap;
use std::fmt;

use reqwest::StatusCode;

use crate::envelope::ErrorDetail;

/// Closed set of error categories surfaced to data-source callers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    NotFound,
    /// Covers both unauthenticated (401) and forbidden (403).
    AuthError,
    Conflict,
    RateLimit,
    Timeout,
    ServerError,
    NetworkError,
    ValidationError,
    ToolError,
}

impl ErrorKind {
    /// Returns the wire name of the kind (for example `NOT_FOUND`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "NOT_FOUND",
            Self::AuthError => "AUTH_ERROR",
            Self::Conflict => "CONFLICT",
            Self::RateLimit => "RATE_LIMIT",
            Self::Timeout => "TIMEOUT",
            Self::ServerError => "SERVER_ERROR",
            Self::NetworkError => "NETWORK_ERROR",
            Self::ValidationError => "VALIDATION_ERROR",
            Self::ToolError => "TOOL_ERROR",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Underlying cause retained on a [`TypedError`].
#[derive(Clone, Debug, PartialEq)]
pub enum ErrorCause {
    /// Transport failed before a status was available.
    Transport(String),
    /// Parsed error envelope returned by the backend.
    Envelope(ErrorDetail),
    /// A request or response interceptor failed.
    Interceptor(String),
    /// A successful body did not match the expected shape.
    Decode(String),
    /// The caller aborted the call.
    Aborted,
}

/// Classified error returned by every client and data-source operation.
///
/// Built once at the mapping boundary and then propagated as-is.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct TypedError {
    pub kind: ErrorKind,
    pub message: String,
    pub status: Option<u16>,
    /// Backend error code from the envelope, when one was present.
    pub code: Option<String>,
    pub request_id: Option<String>,
    pub trace_id: Option<String>,
    pub cause: Option<ErrorCause>,
    /// Free-form enrichment attached by error interceptors.
    pub context: BTreeMap<String, String>,
}

impl TypedError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
            code: None,
            request_id: None,
            trace_id: None,
            cause: None,
            context: BTreeMap::new(),
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_cause(mut self, cause: ErrorCause) -> Self {
        self.cause = Some(cause);
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Adds an enrichment entry, keeping the first value written for a key.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.entry(key.into()).or_insert_with(|| value.into());
        self
    }

    /// Whether a caller-side retry (or a stream reconnect) can reasonably succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::RateLimit
                | ErrorKind::Timeout
                | ErrorKind::ServerError
                | ErrorKind::NetworkError
        )
    }

    pub(crate) fn decode(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::new(
            ErrorKind::ServerError,
            format!("response body did not match the expected shape: {message}"),
        )
        .with_cause(ErrorCause::Decode(message))
    }

    pub(crate) fn aborted() -> Self {
        Self::new(ErrorKind::Timeout, "request aborted by caller").with_cause(ErrorCause::Aborted)
    }

    pub(crate) fn interceptor(stage: &str, err: &InterceptorError) -> Self {
        Self::new(
            ErrorKind::NetworkError,
            format!("{stage} interceptor failed: {err}"),
        )
        .with_cause(ErrorCause::Interceptor(err.to_string()))
    }
}

/// Failure raised by an interceptor hook.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct InterceptorError(pub String);

impl InterceptorError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Classification of a failed transport round trip.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportErrorKind {
    Connect,
    Timeout,
    Body,
    Other,
}

/// Transport failure that happened before a usable HTTP status existed.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("transport error ({kind:?}): {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            TransportErrorKind::Timeout
        } else if err.is_connect() {
            TransportErrorKind::Connect
        } else if err.is_body() || err.is_decode() {
            TransportErrorKind::Body
        } else {
            TransportErrorKind::Other
        };
        Self::new(kind, err.to_string())
    }
}

/// Errors raised while building a client or reading configuration.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required setting: {0}")]
    Missing(&'static str),
    #[error("invalid setting {key}: {message}")]
    Invalid { key: &'static str, message: String },
    #[error("failed to build http client: {0}")]
    Client(String),
}

/// Maps an embedded backend error code to a kind. `None` means the code is not
/// recognized and the status decides.
fn kind_for_code(code: &str) -> Option<ErrorKind> {
    let code = code.trim().to_ascii_uppercase();
    if code.starts_with("E_TOOL_") {
        return Some(ErrorKind::ToolError);
    }
    if code.starts_with("E_VALIDATION") {
        return Some(ErrorKind::ValidationError);
    }
    if code.starts_with("E_RATE_LIMIT") {
        return Some(ErrorKind::RateLimit);
    }
    match code.as_str() {
        "E_TIMEOUT" => Some(ErrorKind::Timeout),
        "E_NOT_FOUND" => Some(ErrorKind::NotFound),
        "E_UNAUTHORIZED" | "E_FORBIDDEN" => Some(ErrorKind::AuthError),
        "E_CONFLICT" => Some(ErrorKind::Conflict),
        "E_INTERNAL" => Some(ErrorKind::ServerError),
        _ => None,
    }
}

/// Status-only mapping. Total: anything unrecognized is a server error.
pub fn kind_for_status(status: u16) -> ErrorKind {
    match status {
        404 => ErrorKind::NotFound,
        401 | 403 => ErrorKind::AuthError,
        409 => ErrorKind::Conflict,
        429 => ErrorKind::RateLimit,
        408 => ErrorKind::Timeout,
        500..=599 => ErrorKind::ServerError,
        400..=499 => ErrorKind::NetworkError,
        _ => ErrorKind::ServerError,
    }
}

/// Classifies an HTTP failure.
///
/// The embedded envelope code wins over the status when it is recognized. The
/// message prefers the envelope's message, then `fallback_message`, then the
/// canonical reason phrase.
pub fn map_error(
    status: StatusCode,
    detail: Option<&ErrorDetail>,
    fallback_message: Option<&str>,
) -> TypedError {
    let status_code = status.as_u16();
    let kind = detail
        .and_then(|d| kind_for_code(&d.code))
        .unwrap_or_else(|| kind_for_status(status_code));

    let message = detail
        .map(|d| d.message.trim())
        .filter(|m| !m.is_empty())
        .or_else(|| fallback_message.map(str::trim).filter(|m| !m.is_empty()))
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .map(ToOwned::to_owned)
                .unwrap_or_else(|| format!("HTTP {status_code}"))
        });

    let mut error = TypedError::new(kind, message).with_status(status_code);
    if let Some(detail) = detail {
        error.code = Some(detail.code.clone());
        error.trace_id = detail.trace_id.clone();
        error.cause = Some(ErrorCause::Envelope(detail.clone()));
    }
    error
}

/// Classifies a failure that happened before any response existed.
pub fn map_transport_error(err: &TransportError) -> TypedError {
    let kind = match err.kind {
        TransportErrorKind::Timeout => ErrorKind::Timeout,
        _ => ErrorKind::NetworkError,
    };
    TypedError::new(kind, err.message.clone()).with_cause(ErrorCause::Transport(err.to_string()))
}
