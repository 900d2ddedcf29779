//! Routing Targets
//!
//! Classifies an envelope's `to` field into the delivery modes the hub
//! understands. The empty-target-with-class form is a legacy shape some
//! senders still emit; it resolves to a class multicast.

use serde_json::Value;

use crate::{Envelope, BROADCAST, CLASS_PREFIX, HUB_ID};

/// Where an envelope should be delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target<'a> {
    /// Every active peer subscribed to the class.
    Class(&'a str),
    /// Every active peer.
    Broadcast,
    /// The hub itself (already consumed by the dispatcher).
    Hub,
    /// A single peer by id.
    Peer(&'a str),
}

impl<'a> Target<'a> {
    /// Resolve the delivery mode for an envelope.
    ///
    /// Precedence: `broadcast:<class>` prefix, then the legacy empty
    /// target with a `class` payload field, then wildcard broadcast,
    /// then unicast.
    pub fn of(envelope: &'a Envelope) -> Self {
        let to = envelope.to.as_str();

        if let Some(class) = to.strip_prefix(CLASS_PREFIX) {
            return Target::Class(class);
        }

        if to.is_empty() {
            if let Some(class) = envelope.payload_str("class") {
                return Target::Class(class);
            }
            return Target::Broadcast;
        }

        match to {
            BROADCAST => Target::Broadcast,
            HUB_ID => Target::Hub,
            id => Target::Peer(id),
        }
    }
}

/// Extract class names from a `subscribe` payload value.
///
/// Accepts a single string or a list of strings; empty names and
/// non-string list entries are skipped.
pub fn class_names(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) if !s.is_empty() => vec![s.clone()],
        Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
        _ => Vec::new(),
    }
}
