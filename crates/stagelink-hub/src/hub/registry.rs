//! Connection Registry
//!
//! All hub-side bookkeeping for live connections: the main-module slot,
//! registered plugins, pending (unregistered) connections, the set of
//! plugin ids the main module declared as required, and the lifecycle
//! records of external plugins. Mutated only from the hub event loop;
//! read elsewhere under the shared lock.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use super::peer::{ConnId, Peer, PeerRole};

/// Lifecycle record for an external plugin, kept across reconnects.
#[derive(Debug)]
pub struct ExternalRecord {
    pub plugin_id: String,
    pub ip: Option<String>,
    pub connected: bool,
    pub last_heartbeat: DateTime<Utc>,
    pub connected_at: DateTime<Utc>,
}

impl ExternalRecord {
    pub fn new(plugin_id: &str, ip: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            plugin_id: plugin_id.to_string(),
            ip,
            connected: true,
            last_heartbeat: now,
            connected_at: now,
        }
    }

    pub fn status_str(&self) -> &'static str {
        if self.connected {
            "connected"
        } else {
            "disconnected"
        }
    }

    /// Status payload sent to the main module and shown in snapshots.
    pub fn status_payload(&self) -> Value {
        json!({
            "plugin_id": self.plugin_id,
            "status": self.status_str(),
            "last_heartbeat": self.last_heartbeat.timestamp(),
            "uptime": (Utc::now() - self.connected_at).num_seconds(),
            "metadata": { "ip": self.ip },
        })
    }
}

/// The hub's connection state.
#[derive(Debug, Default)]
pub struct Registry {
    /// At most one main module at any time.
    pub main: Option<Peer>,
    /// Registered plugins (local and external) by peer id.
    pub plugins: HashMap<String, Peer>,
    /// Accepted connections that have not registered yet.
    pub pending: HashMap<ConnId, Peer>,
    /// Plugin ids the main module declared as required.
    pub expected: HashSet<String>,
    /// External plugin lifecycle records by plugin id.
    pub externals: HashMap<String, ExternalRecord>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a registered peer (main module or plugin) by id.
    pub fn peer(&self, id: &str) -> Option<&Peer> {
        if let Some(main) = &self.main {
            if main.id == id {
                return Some(main);
            }
        }
        self.plugins.get(id)
    }

    /// Mutable lookup of a registered peer by id.
    pub fn peer_mut(&mut self, id: &str) -> Option<&mut Peer> {
        if let Some(main) = self.main.as_mut() {
            if main.id == id {
                return Some(main);
            }
        }
        self.plugins.get_mut(id)
    }

    /// The registered id behind a connection, if any.
    pub fn id_by_conn(&self, conn: ConnId) -> Option<&str> {
        if let Some(main) = &self.main {
            if main.conn_id == conn {
                return Some(&main.id);
            }
        }
        self.plugins
            .values()
            .find(|p| p.conn_id == conn)
            .map(|p| p.id.as_str())
    }

    /// Remove and return the registered peer behind a connection.
    ///
    /// The returned peer is the last owner of its send queue sender;
    /// dropping it closes the queue.
    pub fn take_by_conn(&mut self, conn: ConnId) -> Option<Peer> {
        if self.main.as_ref().is_some_and(|m| m.conn_id == conn) {
            return self.main.take();
        }
        let id = self
            .plugins
            .values()
            .find(|p| p.conn_id == conn)?
            .id
            .clone();
        self.plugins.remove(&id)
    }

    pub fn main_active(&self) -> bool {
        self.main.as_ref().is_some_and(|m| m.active)
    }

    /// Active connection count (registered peers only).
    pub fn active_peers(&self) -> usize {
        self.plugins.values().filter(|p| p.active).count()
            + usize::from(self.main_active())
    }

    /// Snapshot of routing state for the status surface.
    pub fn snapshot(&self) -> Value {
        let main_module = self.main.as_ref().map(|m| {
            json!({
                "id": m.id,
                "name": m.name,
                "active": m.active,
                "capabilities": m.capabilities,
            })
        });

        let plugins: Vec<Value> = self
            .plugins
            .values()
            .filter(|p| p.role != PeerRole::ExternalPlugin)
            .map(|p| {
                json!({
                    "id": p.id,
                    "name": p.name,
                    "type": p.kind,
                    "active": p.active,
                    "expected": self.expected.contains(&p.id),
                    "capabilities": p.capabilities,
                })
            })
            .collect();

        let external_plugins: Vec<Value> = self
            .externals
            .values()
            .map(ExternalRecord::status_payload)
            .collect();

        json!({
            "main_module": main_module,
            "plugins": plugins,
            "external_plugins": external_plugins,
            "expected_plugins": self.expected,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::peer::send_queue;
    use uuid::Uuid;

    fn registered(id: &str, role: PeerRole) -> Peer {
        let (tx, _rx) = send_queue();
        let mut peer = Peer::pending(Uuid::new_v4(), tx);
        peer.id = id.to_string();
        peer.role = role;
        peer.active = true;
        peer
    }

    #[test]
    fn test_peer_lookup_covers_main_and_plugins() {
        let mut registry = Registry::new();
        registry.main = Some(registered("core", PeerRole::MainModule));
        registry
            .plugins
            .insert("timer".into(), registered("timer", PeerRole::LocalPlugin));

        assert!(registry.peer("core").is_some());
        assert!(registry.peer("timer").is_some());
        assert!(registry.peer("ghost").is_none());
    }

    #[test]
    fn test_take_by_conn_clears_main_slot() {
        let mut registry = Registry::new();
        let main = registered("core", PeerRole::MainModule);
        let conn = main.conn_id;
        registry.main = Some(main);

        let taken = registry.take_by_conn(conn).expect("main should be found");
        assert_eq!(taken.id, "core");
        assert!(registry.main.is_none());
    }

    #[test]
    fn test_snapshot_excludes_external_peers_from_plugin_list() {
        let mut registry = Registry::new();
        registry
            .plugins
            .insert("timer".into(), registered("timer", PeerRole::LocalPlugin));
        registry.plugins.insert(
            "remote-cam".into(),
            registered("remote-cam", PeerRole::ExternalPlugin),
        );
        registry
            .externals
            .insert("remote-cam".into(), ExternalRecord::new("remote-cam", None));

        let snapshot = registry.snapshot();
        let plugins = snapshot["plugins"].as_array().expect("plugins array");
        assert_eq!(plugins.len(), 1);
        assert_eq!(plugins[0]["id"], "timer");
        assert_eq!(snapshot["external_plugins"].as_array().map(Vec::len), Some(1));
    }
}
