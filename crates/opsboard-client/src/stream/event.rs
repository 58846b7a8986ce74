use chrono::{DateTime, Utc};
use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use super::sse::SseFrame;

/// A decoded push event for a run.
///
/// Payloads must be JSON objects with at least `type` and an RFC 3339
/// `timestamp`; every other field is kept in `payload`.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RunEvent {
    /// Backends send either string or numeric ids; numbers are kept as
    /// their decimal text.
    #[serde(
        default,
        deserialize_with = "string_or_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    /// SSE event name the frame was dispatched under, if any.
    #[serde(skip)]
    pub name: Option<String>,
    #[serde(flatten)]
    pub payload: serde_json::Map<String, Value>,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(D::Error::custom(format!(
            "event id must be a string or number, got {other}"
        ))),
    }
}

/// Why a frame could not be turned into a [`RunEvent`].
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum EventParseError {
    #[error("event payload is not valid JSON: {0}")]
    Json(String),
    #[error("event payload is missing a valid {0}")]
    Schema(String),
}

impl RunEvent {
    pub fn from_frame(frame: &SseFrame) -> Result<Self, EventParseError> {
        let value: Value =
            serde_json::from_str(&frame.data).map_err(|e| EventParseError::Json(e.to_string()))?;
        if !value.is_object() {
            return Err(EventParseError::Schema("object".into()));
        }
        let mut event: RunEvent =
            serde_json::from_value(value).map_err(|e| EventParseError::Schema(e.to_string()))?;
        if event.event_type.trim().is_empty() {
            return Err(EventParseError::Schema("type".into()));
        }
        if event.id.is_none() {
            event.id = frame.id.clone();
        }
        event.name = frame.event.clone();
        Ok(event)
    }

    /// Deserializes the extra payload fields into a typed record.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(Value::Object(self.payload.clone()))
    }
}
