use std::time::Duration;

use crate::errors::ConfigError;

pub const DEFAULT_BASE_PATH: &str = "/api/v1";
pub const DEFAULT_REQUEST_ID_HEADER: &str = "x-request-id";
pub const DEFAULT_USER_AGENT: &str = "opsboard/0.1";

/// Client-wide settings shared by every data source.
#[derive(Clone, Debug, PartialEq)]
pub struct ClientConfig {
    /// Scheme and authority of the backend, e.g. `https://ops.example.com`.
    pub base_url: String,
    /// Path prefix prepended to every request path.
    pub base_path: String,
    /// Header carrying the per-call request id.
    pub request_id_header: String,
    pub user_agent: String,
    /// Connection establishment timeout. Whole-call timeouts are not applied.
    pub connect_timeout: Duration,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            base_path: DEFAULT_BASE_PATH.to_string(),
            request_id_header: DEFAULT_REQUEST_ID_HEADER.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            connect_timeout: Duration::from_secs(10),
        }
    }

    /// Reads settings from the environment.
    ///
    /// - `OPSBOARD_API_URL` (required)
    /// - `OPSBOARD_API_BASE_PATH` (default `/api/v1`)
    /// - `OPSBOARD_REQUEST_ID_HEADER` (default `x-request-id`)
    /// - `OPSBOARD_USER_AGENT`
    /// - `OPSBOARD_CONNECT_TIMEOUT_MS`
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let base_url = get("OPSBOARD_API_URL").ok_or(ConfigError::Missing("OPSBOARD_API_URL"))?;
        let mut config = Self::new(base_url);
        if let Some(base_path) = get("OPSBOARD_API_BASE_PATH") {
            config.base_path = base_path;
        }
        if let Some(header) = get("OPSBOARD_REQUEST_ID_HEADER") {
            config.request_id_header = header;
        }
        if let Some(user_agent) = get("OPSBOARD_USER_AGENT") {
            config.user_agent = user_agent;
        }
        if let Some(raw) = get("OPSBOARD_CONNECT_TIMEOUT_MS") {
            let ms = raw.parse::<u64>().map_err(|e| ConfigError::Invalid {
                key: "OPSBOARD_CONNECT_TIMEOUT_MS",
                message: e.to_string(),
            })?;
            config.connect_timeout = Duration::from_millis(ms);
        }
        config.validate()?;
        Ok(config)
    }

    pub fn base_path(mut self, base_path: impl Into<String>) -> Self {
        self.base_path = base_path.into();
        self
    }

    pub fn request_id_header(mut self, header: impl Into<String>) -> Self {
        self.request_id_header = header.into();
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = self.base_url.trim();
        if url.is_empty() {
            return Err(ConfigError::Missing("base_url"));
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::Invalid {
                key: "base_url",
                message: format!("expected http:// or https:// url, got {url:?}"),
            });
        }
        if reqwest::header::HeaderName::from_bytes(self.request_id_header.as_bytes()).is_err() {
            return Err(ConfigError::Invalid {
                key: "request_id_header",
                message: format!("not a valid header name: {:?}", self.request_id_header),
            });
        }
        Ok(())
    }

    /// Absolute URL for a caller path.
    pub fn url_for(&self, path: &str) -> String {
        crate::request::join_url(&self.base_url, &self.base_path, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn env_requires_api_url() {
        assert_eq!(
            ClientConfig::from_lookup(lookup(&[])),
            Err(ConfigError::Missing("OPSBOARD_API_URL"))
        );
    }

    #[test]
    fn env_overrides_defaults() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("OPSBOARD_API_URL", "https://ops.example.com"),
            ("OPSBOARD_API_BASE_PATH", "/api/v2"),
            ("OPSBOARD_CONNECT_TIMEOUT_MS", "2500"),
        ]))
        .expect("config");
        assert_eq!(config.base_path, "/api/v2");
        assert_eq!(config.connect_timeout, Duration::from_millis(2500));
        assert_eq!(config.request_id_header, DEFAULT_REQUEST_ID_HEADER);
    }

    #[test]
    fn bad_timeout_is_rejected() {
        let err = ClientConfig::from_lookup(lookup(&[
            ("OPSBOARD_API_URL", "https://ops.example.com"),
            ("OPSBOARD_CONNECT_TIMEOUT_MS", "soon"),
        ]))
        .expect_err("invalid");
        assert!(matches!(err, ConfigError::Invalid { key: "OPSBOARD_CONNECT_TIMEOUT_MS", .. }));
    }

    #[test]
    fn url_for_deduplicates_prefix() {
        let config = ClientConfig::new("https://ops.example.com");
        assert_eq!(
            config.url_for("/api/v1/workflows/runs"),
            "https://ops.example.com/api/v1/workflows/runs"
        );
    }

    #[test]
    fn validate_rejects_non_http_urls() {
        assert!(ClientConfig::new("ops.example.com").validate().is_err());
    }
}
