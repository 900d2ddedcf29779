//! Peer Model
//!
//! One [`Peer`] per live connection. The peer's send queue is the only
//! path for outbound traffic; it is bounded and drained by a single
//! writer task, so a slow consumer drops frames instead of stalling the
//! hub.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use uuid::Uuid;

use stagelink_protocol::Envelope;

/// Identity of a connection before (and after) registration.
pub type ConnId = Uuid;

/// Capacity of the per-peer outbound queue. Overflow drops the frame
/// for that recipient only.
pub const SEND_QUEUE_CAPACITY: usize = 256;

/// Create a send queue for a new connection.
pub fn send_queue() -> (mpsc::Sender<String>, mpsc::Receiver<String>) {
    mpsc::channel(SEND_QUEUE_CAPACITY)
}

/// What a registered peer is to the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerRole {
    /// Connected but not yet registered.
    Unknown,
    /// The single privileged peer receiving lifecycle notifications.
    MainModule,
    /// A plugin the supervisor may own. Locality is a role, not a
    /// provenance claim: a plugin the supervisor never spawned still
    /// registers as local.
    LocalPlugin,
    /// A plugin that connects of its own accord from elsewhere.
    ExternalPlugin,
}

/// One live connection and its routing state.
#[derive(Debug)]
pub struct Peer {
    pub conn_id: ConnId,
    /// Non-empty once registered; unique across active peers.
    pub id: String,
    pub name: String,
    /// Free-form descriptive string from the register payload.
    pub kind: String,
    pub role: PeerRole,
    /// Class names this peer is subscribed to.
    pub capabilities: HashSet<String>,
    pub active: bool,
    /// Most recent inbound heartbeat or transport keepalive pong.
    pub last_beacon: DateTime<Utc>,
    tx: mpsc::Sender<String>,
}

impl Peer {
    /// A freshly accepted, unregistered peer.
    pub fn pending(conn_id: ConnId, tx: mpsc::Sender<String>) -> Self {
        Self {
            conn_id,
            id: String::new(),
            name: String::new(),
            kind: String::new(),
            role: PeerRole::Unknown,
            capabilities: HashSet::new(),
            active: false,
            last_beacon: Utc::now(),
            tx,
        }
    }

    /// Non-blocking enqueue of a serialized frame.
    pub fn try_send_frame(&self, frame: String) -> Result<(), mpsc::error::TrySendError<String>> {
        self.tx.try_send(frame)
    }

    /// Serialize and enqueue an envelope, reporting drops.
    ///
    /// Returns `false` when the frame was dropped (queue full or
    /// closed); the caller decides whether that is worth a log line.
    pub fn send_envelope(&self, envelope: &Envelope) -> bool {
        match envelope.to_json() {
            Ok(frame) => self.try_send_frame(frame).is_ok(),
            Err(_) => false,
        }
    }

    pub fn is_subscribed(&self, class: &str) -> bool {
        self.capabilities.contains(class)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_peer_is_inactive() {
        let (tx, _rx) = send_queue();
        let peer = Peer::pending(Uuid::new_v4(), tx);

        assert_eq!(peer.role, PeerRole::Unknown);
        assert!(!peer.active);
        assert!(peer.id.is_empty());
    }

    #[test]
    fn test_send_queue_overflow_drops() {
        let (tx, _rx) = mpsc::channel(2);
        let peer = Peer::pending(Uuid::new_v4(), tx);

        assert!(peer.try_send_frame("a".into()).is_ok());
        assert!(peer.try_send_frame("b".into()).is_ok());
        assert!(peer.try_send_frame("c".into()).is_err());
    }

    #[test]
    fn test_send_after_close_fails() {
        let (tx, rx) = send_queue();
        let peer = Peer::pending(Uuid::new_v4(), tx);
        drop(rx);

        assert!(!peer.send_envelope(&Envelope::new("hub", "x", "noop")));
    }
}
