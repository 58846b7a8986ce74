use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

static INIT: OnceCell<()> = OnceCell::new();

const DEFAULT_JSON_LOG_FILE: &str = "opsboard.logs.jsonl";

/// Logging settings resolved from the environment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogSettings {
    pub enabled: bool,
    /// Explicit filter directive; `None` falls back to `RUST_LOG`, then `info`.
    pub level: Option<String>,
    /// When set, logs are written as JSON lines to this file.
    pub json_path: Option<PathBuf>,
}

impl LogSettings {
    /// Reads `OPSBOARD_OBSERVABILITY_ENABLED`, `OPSBOARD_LOG_LEVEL` and
    /// `OPSBOARD_JSON_LOG_PATH`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        Self {
            enabled: get("OPSBOARD_OBSERVABILITY_ENABLED")
                .map(|v| parse_bool(&v).unwrap_or(true))
                .unwrap_or(true),
            level: get("OPSBOARD_LOG_LEVEL"),
            json_path: get("OPSBOARD_JSON_LOG_PATH").map(PathBuf::from),
        }
    }

    fn env_filter(&self) -> tracing_subscriber::EnvFilter {
        if let Some(level) = &self.level
            && let Ok(filter) = tracing_subscriber::EnvFilter::try_new(level)
        {
            return filter;
        }
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Installs the global subscriber once per process using [`LogSettings::from_env`].
///
/// Console output goes to stderr so command output on stdout stays clean.
pub fn init_observability() {
    init_with(LogSettings::from_env());
}

/// Installs the global subscriber once per process. Later calls are no-ops.
pub fn init_with(settings: LogSettings) {
    INIT.get_or_init(|| {
        if !settings.enabled {
            return;
        }
        let env_filter = settings.env_filter();
        match &settings.json_path {
            Some(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    let _ = std::fs::create_dir_all(parent);
                }
                let dir = path
                    .parent()
                    .filter(|p| !p.as_os_str().is_empty())
                    .unwrap_or_else(|| Path::new("."));
                let file_name = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or(DEFAULT_JSON_LOG_FILE);
                let writer = tracing_appender::rolling::never(dir, file_name);
                let json_layer = tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_target(false)
                    .with_writer(writer);
                let _ = tracing_subscriber::registry()
                    .with(env_filter)
                    .with(json_layer)
                    .try_init();
            }
            None => {
                let console_layer = tracing_subscriber::fmt::layer()
                    .compact()
                    .with_target(false)
                    .with_writer(std::io::stderr);
                let _ = tracing_subscriber::registry()
                    .with(env_filter)
                    .with(console_layer)
                    .try_init();
            }
        }
    });
}
