use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};
use serde_json::Value as JsonValue;

/// Body of an outbound webhook request: `{event, timestamp, data}`.
///
/// Field order is fixed by the struct. The bytes that get signed are exactly
/// the bytes that get sent, so callers must sign the output of
/// [`WebhookEnvelope::to_bytes`] and never re-serialize.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WebhookEnvelope {
    event: String,
    #[serde(serialize_with = "serialize_timestamp")]
    timestamp: DateTime<Utc>,
    data: JsonValue,
}

impl WebhookEnvelope {
    pub fn new(event: impl Into<String>, timestamp: DateTime<Utc>, data: JsonValue) -> Self {
        Self {
            event: event.into(),
            timestamp,
            data,
        }
    }

    /// Envelope stamped with the current time.
    pub fn now(event: impl Into<String>, data: JsonValue) -> Self {
        Self::new(event, Utc::now(), data)
    }

    pub fn event(&self) -> &str {
        &self.event
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn data(&self) -> &JsonValue {
        &self.data
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

fn serialize_timestamp<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Millis, true))
}
