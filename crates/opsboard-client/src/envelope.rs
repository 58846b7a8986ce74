//! Success/error envelope wrapping every JSON response from the backend.
//!
//! Wire format:
//!
//! ```text
//! {"ok": true,  "data": <T>, "meta"?: {"requestId", "durationMs", "apiVersion"}}
//! {"ok": false, "error": {"code", "message", "details"?, "cause"?, "traceId"?}, "meta"?: {...}}
//! ```
//!
//! Detection is a strict parse: an object only counts as an envelope when it
//! carries a boolean `ok` and exactly the companion field that `ok` calls for.
//! Near-misses pass through untouched.

use serde_json::Value;

/// Optional response metadata.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
}

/// Error payload of a failure envelope.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

/// A parsed envelope.
#[derive(Clone, Debug, PartialEq)]
pub enum Envelope {
    Success {
        data: Value,
        meta: Option<EnvelopeMeta>,
    },
    Failure {
        error: ErrorDetail,
        meta: Option<EnvelopeMeta>,
    },
}

/// Outcome of running detection over a JSON value.
#[derive(Clone, Debug, PartialEq)]
pub enum Detected {
    Envelope(Envelope),
    /// Not an envelope; carries the original value unchanged.
    Plain(Value),
}

impl Envelope {
    /// Classifies `value`, taking ownership so the success payload can be moved
    /// out without copying.
    pub fn detect(value: Value) -> Detected {
        let mut map = match value {
            Value::Object(map) => map,
            other => return Detected::Plain(other),
        };
        let ok = match map.get("ok") {
            Some(Value::Bool(ok)) => *ok,
            _ => return Detected::Plain(Value::Object(map)),
        };
        if map.contains_key("data") && map.contains_key("error") {
            return Detected::Plain(Value::Object(map));
        }

        if ok {
            let Some(data) = map.remove("data") else {
                return Detected::Plain(Value::Object(map));
            };
            let meta = parse_meta(map.get("meta"));
            return Detected::Envelope(Envelope::Success { data, meta });
        }

        let error = match map.get("error").cloned().map(serde_json::from_value::<ErrorDetail>) {
            Some(Ok(error)) => error,
            _ => return Detected::Plain(Value::Object(map)),
        };
        let meta = parse_meta(map.get("meta"));
        Detected::Envelope(Envelope::Failure { error, meta })
    }

    /// Parses raw bytes. Invalid JSON is reported as `None` ("not an envelope").
    pub fn detect_bytes(bytes: &[u8]) -> Option<Detected> {
        serde_json::from_slice::<Value>(bytes).ok().map(Self::detect)
    }

    pub fn meta(&self) -> Option<&EnvelopeMeta> {
        match self {
            Self::Success { meta, .. } | Self::Failure { meta, .. } => meta.as_ref(),
        }
    }

    /// Serializes back to the wire format.
    pub fn to_value(&self) -> Value {
        let mut out = serde_json::Map::new();
        match self {
            Self::Success { data, .. } => {
                out.insert("ok".into(), Value::Bool(true));
                out.insert("data".into(), data.clone());
            }
            Self::Failure { error, .. } => {
                out.insert("ok".into(), Value::Bool(false));
                out.insert(
                    "error".into(),
                    serde_json::to_value(error).unwrap_or(Value::Null),
                );
            }
        }
        if let Some(meta) = self.meta()
            && let Ok(meta) = serde_json::to_value(meta)
        {
            out.insert("meta".into(), meta);
        }
        Value::Object(out)
    }
}

impl Detected {
    /// The success payload, or the value itself when it is not an envelope.
    /// Failure envelopes yield `None`.
    pub fn into_payload(self) -> Option<Value> {
        match self {
            Self::Envelope(Envelope::Success { data, .. }) => Some(data),
            Self::Envelope(Envelope::Failure { .. }) => None,
            Self::Plain(value) => Some(value),
        }
    }

    pub fn failure(&self) -> Option<&ErrorDetail> {
        match self {
            Self::Envelope(Envelope::Failure { error, .. }) => Some(error),
            _ => None,
        }
    }
}

fn parse_meta(value: Option<&Value>) -> Option<EnvelopeMeta> {
    value
        .filter(|v| v.is_object())
        .and_then(|v| serde_json::from_value(v.clone()).ok())
}

/// Content types eligible for envelope detection.
pub fn is_json_content_type(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    essence == "application/json" || essence.ends_with("+json")
}
