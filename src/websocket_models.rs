use serde::Deserialize;
use serde_json::Value;

use crate::error::DashboardError;
use crate::models::LogRecord;

/// Outer frame as it arrives on the live stream: `{ "type": ..., "data": ... }`.
#[derive(Deserialize, Debug)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

/// A decoded live stream frame. New `type` tags get their own variant here.
#[derive(Clone, Debug, PartialEq)]
pub enum LiveEvent {
    Log(LogRecord),
    /// A tag this client does not understand. Never forwarded.
    Unrecognized(String),
}

impl LiveEvent {
    /// Decodes one text frame. The `log` payload is normally a JSON string
    /// holding the serialized record; an inline object is accepted too.
    pub fn decode(frame: &str) -> Result<Self, DashboardError> {
        let envelope: RawEnvelope = serde_json::from_str(frame)
            .map_err(|e| DashboardError::Decode(format!("envelope: {e}")))?;

        match envelope.kind.as_str() {
            "log" => decode_log_payload(envelope.data).map(LiveEvent::Log),
            _ => Ok(LiveEvent::Unrecognized(envelope.kind)),
        }
    }
}

fn decode_log_payload(data: Value) -> Result<LogRecord, DashboardError> {
    let record = match data {
        Value::String(inner) => serde_json::from_str::<LogRecord>(&inner),
        Value::Object(_) => serde_json::from_value::<LogRecord>(data),
        other => {
            return Err(DashboardError::Decode(format!(
                "log payload must be a string or object, got {other}"
            )));
        }
    };
    record.map_err(|e| DashboardError::Decode(format!("log payload: {e}")))
}
