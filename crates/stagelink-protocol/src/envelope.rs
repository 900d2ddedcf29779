//! Wire Envelope
//!
//! Defines the JSON message structure exchanged between the hub and its
//! peers. The `type` field is a free-form string on purpose: verbs the
//! hub does not recognize are still routed to their destination as
//! opaque data.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Sender/recipient id reserved for the hub itself.
pub const HUB_ID: &str = "hub";

/// Recipient id addressing every active peer.
pub const BROADCAST: &str = "broadcast";

/// Prefix for class multicast targets (`broadcast:<class>`).
pub const CLASS_PREFIX: &str = "broadcast:";

/// A routable message.
///
/// `to` is one of: a peer id, `"hub"`, `"broadcast"`, the empty string
/// (an alias of broadcast), or `"broadcast:<class>"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub to: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub payload: Map<String, Value>,
    #[serde(default)]
    pub timestamp: String,
}

impl Envelope {
    /// Create an envelope with an empty payload, stamped with the current time.
    pub fn new(
        from: impl Into<String>,
        to: impl Into<String>,
        kind: impl Into<String>,
    ) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            kind: kind.into(),
            payload: Map::new(),
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    /// Create an envelope carrying a JSON object payload.
    ///
    /// Accepts the output of `serde_json::json!({...})`; a non-object
    /// value is treated as an empty payload.
    pub fn with_payload(
        from: impl Into<String>,
        to: impl Into<String>,
        kind: impl Into<String>,
        payload: Value,
    ) -> Self {
        let payload = match payload {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            payload,
            ..Self::new(from, to, kind)
        }
    }

    /// Get a payload field.
    pub fn payload_get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    /// Get a payload field as a string.
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(|v| v.as_str())
    }

    /// Serialize to a wire frame.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Parse a wire frame.
    pub fn from_json(data: &str) -> serde_json::Result<Self> {
        serde_json::from_str(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_round_trip() {
        let env = Envelope::with_payload(
            "alpha",
            "beta",
            "timer_updated",
            json!({"timer_id": "t1", "elapsed_time": 1500}),
        );
        let frame = env.to_json().unwrap();
        let parsed = Envelope::from_json(&frame).unwrap();

        assert_eq!(parsed.from, "alpha");
        assert_eq!(parsed.to, "beta");
        assert_eq!(parsed.kind, "timer_updated");
        assert_eq!(parsed.payload_str("timer_id"), Some("t1"));
        assert!(!parsed.timestamp.is_empty());
    }

    #[test]
    fn test_missing_fields_default() {
        let parsed = Envelope::from_json(r#"{"type":"noop"}"#).unwrap();
        assert_eq!(parsed.from, "");
        assert_eq!(parsed.to, "");
        assert_eq!(parsed.kind, "noop");
        assert!(parsed.payload.is_empty());
        assert_eq!(parsed.timestamp, "");
    }

    #[test]
    fn test_empty_payload_omitted_on_wire() {
        let frame = Envelope::new("hub", "beta", "pong").to_json().unwrap();
        assert!(!frame.contains("payload"));
    }

    #[test]
    fn test_unknown_verb_is_preserved() {
        let parsed =
            Envelope::from_json(r#"{"from":"a","to":"b","type":"recorder_arm"}"#).unwrap();
        assert_eq!(parsed.kind, "recorder_arm");
    }

    #[test]
    fn test_non_object_payload_rejected() {
        let env = Envelope::with_payload("a", "b", "noop", json!(42));
        assert!(env.payload.is_empty());
    }
}
