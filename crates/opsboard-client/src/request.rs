use bytes::Bytes;
use reqwest::Method;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};

use crate::errors::{ErrorKind, TypedError};

/// Description of one logical API call.
///
/// A config is consumed by the client when sent, so it cannot be replayed as
/// a second call. Every config gets a fresh request id at construction.
#[derive(Debug)]
pub struct RequestConfig {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub query: Vec<(String, String)>,
    pub body: Option<Bytes>,
    request_id: String,
}

impl RequestConfig {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            query: Vec::new(),
            body: None,
            request_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Sets a header. Invalid names or values are rejected as validation errors.
    pub fn header(mut self, name: &str, value: &str) -> Result<Self, TypedError> {
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
            TypedError::new(
                ErrorKind::ValidationError,
                format!("invalid header name {name:?}: {e}"),
            )
        })?;
        let value = HeaderValue::from_str(value).map_err(|e| {
            TypedError::new(
                ErrorKind::ValidationError,
                format!("invalid header value for {name}: {e}"),
            )
        })?;
        self.headers.insert(name, value);
        Ok(self)
    }

    /// Appends a query pair.
    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    /// Appends a query pair when `value` is present.
    pub fn query_opt(self, key: impl Into<String>, value: Option<impl ToString>) -> Self {
        match value {
            Some(value) => self.query(key, value),
            None => self,
        }
    }

    /// Serializes `body` as JSON and sets the content type.
    pub fn json<B: serde::Serialize + ?Sized>(mut self, body: &B) -> Result<Self, TypedError> {
        let bytes = serde_json::to_vec(body).map_err(|e| {
            TypedError::new(
                ErrorKind::ValidationError,
                format!("failed to serialize request body: {e}"),
            )
        })?;
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        self.body = Some(Bytes::from(bytes));
        Ok(self)
    }

    /// The identifier attached to this call.
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub(crate) fn set_request_id(&mut self, request_id: String) {
        self.request_id = request_id;
    }
}

/// Returns the `/api/v<N>` prefix contained in `base_path`, if any.
fn versioned_prefix(base_path: &str) -> Option<String> {
    let segments: Vec<&str> = base_path.split('/').filter(|s| !s.is_empty()).collect();
    segments.windows(2).find_map(|pair| {
        let version = pair[1];
        let is_version = version.len() > 1
            && version.starts_with('v')
            && version[1..].chars().all(|c| c.is_ascii_digit());
        (pair[0] == "api" && is_version).then(|| format!("/api/{version}"))
    })
}

fn strip_segment_prefix<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    let rest = path.strip_prefix(prefix)?;
    (rest.is_empty() || rest.starts_with('/')).then_some(rest)
}

/// Normalizes a caller path relative to the client's base path.
///
/// Guarantees a single leading slash and no empty segments, and strips any
/// repetition of the base path's `/api/v<N>` prefix. Query strings are kept
/// as-is. Idempotent.
pub fn normalize_path(base_path: &str, path: &str) -> String {
    let (path_part, query) = match path.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path, None),
    };

    let mut normalized = String::with_capacity(path_part.len() + 1);
    for segment in path_part.split('/').filter(|s| !s.is_empty()) {
        normalized.push('/');
        normalized.push_str(segment);
    }

    if let Some(prefix) = versioned_prefix(base_path) {
        while let Some(rest) = strip_segment_prefix(&normalized, &prefix) {
            normalized = rest.to_string();
        }
    }

    if normalized.is_empty() {
        normalized.push('/');
    }
    if let Some(query) = query {
        normalized.push('?');
        normalized.push_str(query);
    }
    normalized
}

/// Joins base URL, base path and a caller path into an absolute URL.
pub fn join_url(base_url: &str, base_path: &str, path: &str) -> String {
    let base_path = base_path.trim_matches('/');
    let path = normalize_path(base_path, path);
    let mut url = base_url.trim_end_matches('/').to_string();
    if !base_path.is_empty() {
        url.push('/');
        url.push_str(base_path);
    }
    if path == "/" && !base_path.is_empty() {
        return url;
    }
    url.push_str(&path);
    url
}
