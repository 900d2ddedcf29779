//! Hub Core
//!
//! The central message router. A single event loop consumes from the
//! new-connection, disconnect, and inbound-message queues and is the
//! only writer of the registry; the supervisor, health monitor, and
//! status endpoints read it under the shared lock. Outbound delivery is
//! a non-blocking enqueue onto each recipient's bounded send queue, so
//! slow consumers lose frames instead of slowing the loop.

mod peer;
mod registry;

pub use peer::{send_queue, ConnId, Peer, PeerRole, SEND_QUEUE_CAPACITY};
pub use registry::{ExternalRecord, Registry};

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use stagelink_protocol::{class_names, Envelope, Target, HUB_ID};

use crate::health::HealthMonitor;
use crate::supervisor::Supervisor;

/// Capacity of the hub inbound queue. Peer readers block when it fills;
/// the loop is the serialization point and must not be bypassed.
const INBOUND_QUEUE_CAPACITY: usize = 256;
const LIFECYCLE_QUEUE_CAPACITY: usize = 32;

/// Liveness thresholds for externally-connected plugins. Shorter than
/// the general health-monitor defaults: externals get an application
/// ping before they are declared gone.
#[derive(Debug, Clone)]
pub struct ExternalTimings {
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
    pub ping_interval: Duration,
}

impl Default for ExternalTimings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(5),
            heartbeat_timeout: Duration::from_secs(15),
            ping_interval: Duration::from_secs(10),
        }
    }
}

/// An inbound envelope tagged with the connection that produced it.
#[derive(Debug)]
pub struct Inbound {
    pub conn: ConnId,
    pub envelope: Envelope,
}

struct Queues {
    connect_rx: mpsc::Receiver<Peer>,
    disconnect_rx: mpsc::Receiver<ConnId>,
    inbound_rx: mpsc::Receiver<Inbound>,
}

/// The central router and peer registry.
pub struct Hub {
    registry: RwLock<Registry>,
    connect_tx: mpsc::Sender<Peer>,
    disconnect_tx: mpsc::Sender<ConnId>,
    inbound_tx: mpsc::Sender<Inbound>,
    queues: Mutex<Option<Queues>>,
    shutdown_tx: watch::Sender<bool>,
    supervisor: Option<Arc<Supervisor>>,
    health: OnceLock<Arc<HealthMonitor>>,
    timings: ExternalTimings,
}

impl Hub {
    pub fn new(supervisor: Option<Arc<Supervisor>>) -> Self {
        Self::with_timings(supervisor, ExternalTimings::default())
    }

    pub fn with_timings(supervisor: Option<Arc<Supervisor>>, timings: ExternalTimings) -> Self {
        let (connect_tx, connect_rx) = mpsc::channel(LIFECYCLE_QUEUE_CAPACITY);
        let (disconnect_tx, disconnect_rx) = mpsc::channel(LIFECYCLE_QUEUE_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE_CAPACITY);
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            registry: RwLock::new(Registry::new()),
            connect_tx,
            disconnect_tx,
            inbound_tx,
            queues: Mutex::new(Some(Queues {
                connect_rx,
                disconnect_rx,
                inbound_rx,
            })),
            shutdown_tx,
            supervisor,
            health: OnceLock::new(),
            timings,
        }
    }

    /// Wire in the health monitor after construction (it needs the hub
    /// to route its reports, so it cannot exist first).
    pub fn set_health_monitor(&self, monitor: Arc<HealthMonitor>) {
        let _ = self.health.set(monitor);
    }

    pub fn supervisor(&self) -> Option<&Arc<Supervisor>> {
        self.supervisor.as_ref()
    }

    /// Sentinel connection id for envelopes originated by the hub's own
    /// components (health monitor reports).
    pub fn internal_conn() -> ConnId {
        Uuid::nil()
    }

    // ─────────────────────────────────────────────────────────────────
    // Queue-facing API (peer endpoints, health monitor)
    // ─────────────────────────────────────────────────────────────────

    /// Hand a freshly accepted connection to the event loop.
    pub async fn connect(&self, peer: Peer) {
        if self.connect_tx.send(peer).await.is_err() {
            debug!("hub loop gone, dropping new connection");
        }
    }

    /// Signal that a connection is finished. Called once per connection.
    pub async fn disconnect(&self, conn: ConnId) {
        let _ = self.disconnect_tx.send(conn).await;
    }

    /// Submit an inbound envelope. Blocks when the inbound queue is
    /// saturated; peer readers are allowed to stall here.
    pub async fn submit(&self, conn: ConnId, envelope: Envelope) {
        let _ = self.inbound_tx.send(Inbound { conn, envelope }).await;
    }

    /// Non-blocking submit used by hub-side components. Returns `false`
    /// when the inbound queue is full.
    pub fn submit_internal(&self, envelope: Envelope) -> bool {
        self.inbound_tx
            .try_send(Inbound {
                conn: Self::internal_conn(),
                envelope,
            })
            .is_ok()
    }

    /// Record a transport-level keepalive acknowledgement.
    pub async fn note_beacon(&self, conn: ConnId) {
        let mut reg = self.registry.write().await;
        if let Some(id) = reg.id_by_conn(conn).map(str::to_owned) {
            if let Some(peer) = reg.peer_mut(&id) {
                peer.last_beacon = Utc::now();
            }
        }
    }

    /// Ask the event loop to drain and exit.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    // ─────────────────────────────────────────────────────────────────
    // Read-only views (HTTP surface, health monitor)
    // ─────────────────────────────────────────────────────────────────

    pub async fn active_peers(&self) -> usize {
        self.registry.read().await.active_peers()
    }

    pub async fn main_module_id(&self) -> Option<String> {
        self.registry
            .read()
            .await
            .main
            .as_ref()
            .filter(|m| m.active)
            .map(|m| m.id.clone())
    }

    pub async fn is_peer_active(&self, id: &str) -> bool {
        self.registry
            .read()
            .await
            .peer(id)
            .is_some_and(|p| p.active)
    }

    pub async fn is_expected(&self, id: &str) -> bool {
        self.registry.read().await.expected.contains(id)
    }

    /// Full status snapshot: routing state plus supervisor and health
    /// tables when those components are enabled.
    pub async fn snapshot(&self) -> Value {
        let mut snapshot = self.registry.read().await.snapshot();
        if let Some(sup) = &self.supervisor {
            snapshot["supervisor"] = Value::Array(sup.status_all().await);
        }
        if let Some(health) = self.health.get() {
            snapshot["health"] = health.snapshot_all();
        }
        snapshot
    }

    // ─────────────────────────────────────────────────────────────────
    // Event loop
    // ─────────────────────────────────────────────────────────────────

    /// Run the hub event loop until shutdown. All registry mutations
    /// happen here.
    pub async fn run(self: Arc<Self>) {
        let Some(mut queues) = self.queues.lock().await.take() else {
            warn!("hub event loop already started");
            return;
        };

        tokio::spawn(Arc::clone(&self).monitor_externals());
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        info!("hub event loop running");

        loop {
            tokio::select! {
                Some(peer) = queues.connect_rx.recv() => self.handle_connect(peer).await,
                Some(conn) = queues.disconnect_rx.recv() => self.handle_disconnect(conn).await,
                Some(inbound) = queues.inbound_rx.recv() => self.handle_inbound(inbound).await,
                _ = shutdown_rx.changed() => {
                    info!("hub event loop stopped");
                    return;
                }
            }
        }
    }

    async fn handle_connect(&self, peer: Peer) {
        let mut reg = self.registry.write().await;
        debug!(conn_id = %peer.conn_id, "connection accepted, awaiting registration");
        reg.pending.insert(peer.conn_id, peer);
    }

    async fn handle_inbound(&self, inbound: Inbound) {
        let Inbound { conn, mut envelope } = inbound;

        // Stamp the sender id once the peer is registered. Pending peers
        // keep their self-declared `from` so registration can resolve
        // identity from the payload.
        if conn != Self::internal_conn() {
            let reg = self.registry.read().await;
            if let Some(id) = reg.id_by_conn(conn) {
                envelope.from = id.to_string();
            }
        }

        match envelope.kind.as_str() {
            "register" => self.handle_register(conn, envelope).await,
            "heartbeat" => self.handle_heartbeat(envelope).await,
            "pong" => self.handle_pong(envelope).await,
            "subscribe" => self.handle_subscribe(envelope).await,
            "unsubscribe" => self.handle_unsubscribe(envelope).await,
            "declare_required_plugins" => self.handle_declare_required(envelope).await,
            "get_plugin_status" => self.handle_get_plugin_status(envelope).await,
            _ => self.route(envelope).await,
        }
    }

    // ─────────────────────────────────────────────────────────────────
    // Registration
    // ─────────────────────────────────────────────────────────────────

    async fn handle_register(&self, conn: ConnId, envelope: Envelope) {
        let id = envelope
            .payload_str("id")
            .filter(|s| !s.is_empty())
            .map(str::to_owned);
        let plugin_id = envelope
            .payload_str("plugin_id")
            .filter(|s| !s.is_empty())
            .map(str::to_owned);

        let mut reg = self.registry.write().await;
        let Some(peer) = reg.pending.remove(&conn) else {
            warn!(conn_id = %conn, "register from a connection that is not pending");
            return;
        };

        match (id, plugin_id) {
            (Some(id), _) => self.register_standard(&mut reg, peer, id, &envelope).await,
            (None, Some(plugin_id)) => {
                self.register_external(&mut reg, peer, plugin_id, &envelope)
            }
            (None, None) => {
                warn!(conn_id = %conn, "registration payload carries no id, expelling");
                let reply = Envelope::with_payload(
                    HUB_ID,
                    "",
                    "error",
                    json!({
                        "code": "register_missing_id",
                        "message": "register payload must carry id or plugin_id",
                    }),
                );
                peer.send_envelope(&reply);
                // Dropping the peer closes its send queue; the writer
                // drains the error reply and shuts the transport.
            }
        }
    }

    async fn register_standard(
        &self,
        reg: &mut Registry,
        mut peer: Peer,
        id: String,
        envelope: &Envelope,
    ) {
        peer.id = id.clone();
        peer.name = envelope
            .payload_str("name")
            .unwrap_or(&id)
            .to_string();
        peer.kind = envelope.payload_str("type").unwrap_or_default().to_string();
        peer.active = true;
        peer.last_beacon = Utc::now();

        if envelope.payload_str("component_type") == Some("main_module") {
            if reg.main.is_some() {
                warn!(peer_id = %id, "main module slot already taken, expelling");
                let reply = Envelope::with_payload(
                    HUB_ID,
                    id,
                    "error",
                    json!({
                        "code": "main_module_already_active",
                        "message": "another main module is running",
                        "active_module": reg.main.as_ref().map(|m| m.id.clone()),
                    }),
                );
                peer.send_envelope(&reply);
                return;
            }

            peer.role = PeerRole::MainModule;
            info!(peer_id = %id, name = %peer.name, "main module registered");

            let confirm = Envelope::with_payload(
                HUB_ID,
                id,
                "registered",
                json!({
                    "status": "connected",
                    "role": "main_module",
                    "hub_version": env!("CARGO_PKG_VERSION"),
                }),
            );
            peer.send_envelope(&confirm);
            reg.main = Some(peer);

            // Catch the new main module up on plugins that beat it here.
            let online: Vec<String> = reg
                .plugins
                .values()
                .filter(|p| p.active)
                .map(|p| p.id.clone())
                .collect();
            for plugin_id in online {
                notify_plugin_online(reg, &plugin_id);
            }
            return;
        }

        peer.role = PeerRole::LocalPlugin;
        info!(peer_id = %id, name = %peer.name, "plugin registered");

        let confirm = Envelope::with_payload(
            HUB_ID,
            id.clone(),
            "registered",
            json!({"status": "connected", "role": "plugin"}),
        );
        peer.send_envelope(&confirm);
        reg.plugins.insert(id.clone(), peer);

        // A live registration, not the spawn, is the readiness signal.
        if let Some(sup) = &self.supervisor {
            sup.mark_online(&id).await;
        }
        if let Some(health) = self.health.get() {
            health.register_peer(&id);
        }
        if reg.expected.contains(&id) {
            notify_plugin_online(reg, &id);
        }
    }

    fn register_external(
        &self,
        reg: &mut Registry,
        mut peer: Peer,
        plugin_id: String,
        envelope: &Envelope,
    ) {
        let ip = envelope.payload_str("ip").map(str::to_owned);
        peer.id = plugin_id.clone();
        peer.name = plugin_id.clone();
        peer.role = PeerRole::ExternalPlugin;
        peer.active = true;
        peer.last_beacon = Utc::now();

        let now = Utc::now();
        match reg.externals.get_mut(&plugin_id) {
            Some(record) => {
                record.connected = true;
                record.connected_at = now;
                record.last_heartbeat = now;
                if ip.is_some() {
                    record.ip = ip;
                }
                info!(plugin_id = %plugin_id, "external plugin reconnected");
            }
            None => {
                reg.externals
                    .insert(plugin_id.clone(), ExternalRecord::new(&plugin_id, ip));
                info!(plugin_id = %plugin_id, "external plugin registered");
            }
        }

        let confirm = Envelope::with_payload(
            HUB_ID,
            plugin_id.clone(),
            "registered",
            json!({"plugin_id": plugin_id, "status": "connected"}),
        );
        peer.send_envelope(&confirm);
        reg.plugins.insert(plugin_id.clone(), peer);

        if let Some(record) = reg.externals.get(&plugin_id) {
            notify_external_status(reg, record);
        }
        if reg.expected.contains(&plugin_id) {
            notify_plugin_online(reg, &plugin_id);
        }
    }

    // ─────────────────────────────────────────────────────────────────
    // Liveness and subscriptions
    // ─────────────────────────────────────────────────────────────────

    async fn handle_heartbeat(&self, envelope: Envelope) {
        let from = envelope.from.as_str();
        let mut reg = self.registry.write().await;

        let Some(peer) = reg.peer_mut(from) else {
            debug!(peer_id = %from, "heartbeat from unknown peer");
            return;
        };
        peer.last_beacon = Utc::now();
        let role = peer.role;
        let id = peer.id.clone();

        if role == PeerRole::ExternalPlugin {
            let was_disconnected = match reg.externals.get_mut(&id) {
                Some(record) => {
                    let was = !record.connected;
                    record.connected = true;
                    record.last_heartbeat = Utc::now();
                    was
                }
                None => false,
            };
            if was_disconnected {
                info!(plugin_id = %id, "external plugin back online");
                if let Some(record) = reg.externals.get(&id) {
                    notify_external_status(&reg, record);
                }
            }
        }
        drop(reg);

        if let Some(health) = self.health.get() {
            health.record_heartbeat(&id);
        }
    }

    /// Application-level pong, the answer to the hub's own `ping` probe
    /// of a quiet external plugin. Counts as a liveness beacon but not
    /// as a heartbeat for the health table.
    async fn handle_pong(&self, envelope: Envelope) {
        let from = envelope.from.as_str();
        let mut reg = self.registry.write().await;

        let Some(peer) = reg.peer_mut(from) else {
            return;
        };
        peer.last_beacon = Utc::now();
        let id = peer.id.clone();

        let was_disconnected = match reg.externals.get_mut(&id) {
            Some(record) => {
                let was = !record.connected;
                record.connected = true;
                record.last_heartbeat = Utc::now();
                was
            }
            None => false,
        };
        if was_disconnected {
            info!(plugin_id = %id, "external plugin back online");
            if let Some(record) = reg.externals.get(&id) {
                notify_external_status(&reg, record);
            }
        }
    }

    async fn handle_subscribe(&self, envelope: Envelope) {
        let Some(class_value) = envelope.payload_get("class") else {
            warn!(peer_id = %envelope.from, "subscribe without a class payload");
            return;
        };
        let classes = class_names(class_value);
        if classes.is_empty() {
            warn!(peer_id = %envelope.from, "subscribe carried no valid class names");
            return;
        }

        let mut reg = self.registry.write().await;
        let Some(peer) = reg.peer_mut(&envelope.from) else {
            warn!(peer_id = %envelope.from, "subscribe from unknown peer");
            return;
        };
        for class in classes {
            if peer.capabilities.insert(class.clone()) {
                info!(peer_id = %peer.id, class = %class, "subscribed");
            } else {
                debug!(peer_id = %peer.id, class = %class, "already subscribed");
            }
        }
    }

    async fn handle_unsubscribe(&self, envelope: Envelope) {
        let Some(class) = envelope.payload_str("class") else {
            return;
        };
        let mut reg = self.registry.write().await;
        if let Some(peer) = reg.peer_mut(&envelope.from) {
            if peer.capabilities.remove(class) {
                info!(peer_id = %peer.id, class = %class, "unsubscribed");
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────
    // Required plugins and status queries
    // ─────────────────────────────────────────────────────────────────

    async fn handle_declare_required(&self, envelope: Envelope) {
        let mut reg = self.registry.write().await;
        if !reg
            .main
            .as_ref()
            .is_some_and(|m| m.active && m.id == envelope.from)
        {
            warn!(peer_id = %envelope.from, "declare_required_plugins from a non-main peer, ignoring");
            return;
        }

        let Some(Value::Array(entries)) = envelope.payload_get("plugins") else {
            warn!("invalid plugins payload, expected a list of plugin ids");
            return;
        };

        info!(count = entries.len(), "main module declared required plugins");
        reg.expected.clear();

        let mut to_start: Vec<String> = Vec::new();
        for entry in entries {
            // Older senders embedded whole plugin descriptors here; those
            // are rejected, not adapted.
            let Some(id) = entry.as_str().filter(|s| !s.is_empty()) else {
                warn!(entry = %entry, "skipping non-string plugin id");
                continue;
            };
            reg.expected.insert(id.to_string());

            if reg.plugins.get(id).is_some_and(|p| p.active) {
                notify_plugin_online(&reg, id);
            } else if self
                .supervisor
                .as_ref()
                .is_some_and(|sup| sup.is_local(id))
            {
                to_start.push(id.to_string());
            } else {
                info!(plugin_id = %id, "waiting for external plugin to connect");
            }
        }
        drop(reg);

        if let Some(sup) = &self.supervisor {
            for id in to_start {
                info!(plugin_id = %id, "starting required local plugin");
                let sup = Arc::clone(sup);
                tokio::spawn(async move {
                    if let Err(e) = sup.start(&id).await {
                        warn!(plugin_id = %id, error = %e, "failed to start required plugin");
                    }
                });
            }
        }
    }

    async fn handle_get_plugin_status(&self, envelope: Envelope) {
        let snapshot = self.snapshot().await;
        let reply = Envelope::with_payload(
            HUB_ID,
            envelope.from.clone(),
            "plugin_status_response",
            snapshot,
        );

        let reg = self.registry.read().await;
        match reg.peer(&envelope.from) {
            Some(peer) if peer.active => {
                if !peer.send_envelope(&reply) {
                    warn!(peer_id = %peer.id, "dropping status response, send queue full");
                }
            }
            _ => debug!(peer_id = %envelope.from, "status request from unknown peer"),
        }
    }

    // ─────────────────────────────────────────────────────────────────
    // Routing
    // ─────────────────────────────────────────────────────────────────

    async fn route(&self, envelope: Envelope) {
        let Ok(frame) = envelope.to_json() else {
            warn!(kind = %envelope.kind, "failed to serialize envelope, dropping");
            return;
        };

        let reg = self.registry.read().await;
        match Target::of(&envelope) {
            // Hub-addressed envelopes were consumed by the dispatcher;
            // anything left over is an unknown hub verb.
            Target::Hub => {
                debug!(kind = %envelope.kind, "unhandled hub verb, dropping");
            }
            Target::Class(class) => {
                if let Some(main) = reg.main.as_ref().filter(|m| m.active) {
                    if main.is_subscribed(class) {
                        deliver(main, &frame);
                    }
                }
                for plugin in reg.plugins.values() {
                    if plugin.active && plugin.is_subscribed(class) {
                        deliver(plugin, &frame);
                    }
                }
            }
            Target::Broadcast => {
                // The main module only sees class-less broadcasts when
                // the sender tagged the payload with a class.
                if envelope.payload.contains_key("class") {
                    if let Some(main) = reg.main.as_ref().filter(|m| m.active) {
                        deliver(main, &frame);
                    }
                }
                for plugin in reg.plugins.values() {
                    if plugin.active {
                        deliver(plugin, &frame);
                    }
                }
            }
            Target::Peer(id) => match reg.peer(id) {
                Some(peer) if peer.active => deliver(peer, &frame),
                _ => warn!(peer_id = %id, kind = %envelope.kind, "destination not found or inactive"),
            },
        }
    }

    // ─────────────────────────────────────────────────────────────────
    // Teardown
    // ─────────────────────────────────────────────────────────────────

    async fn handle_disconnect(&self, conn: ConnId) {
        let mut reg = self.registry.write().await;

        if reg.pending.remove(&conn).is_some() {
            debug!(conn_id = %conn, "unregistered connection closed");
            return;
        }
        let Some(mut peer) = reg.take_by_conn(conn) else {
            return;
        };
        peer.active = false;

        match peer.role {
            PeerRole::MainModule => {
                info!(peer_id = %peer.id, "main module disconnected");
            }
            PeerRole::ExternalPlugin => {
                info!(plugin_id = %peer.id, "external plugin disconnected");
                if let Some(record) = reg.externals.get_mut(&peer.id) {
                    record.connected = false;
                }
                if let Some(record) = reg.externals.get(&peer.id) {
                    notify_external_status(&reg, record);
                }
                if let Some(health) = self.health.get() {
                    health.unregister_peer(&peer.id);
                }
            }
            PeerRole::LocalPlugin => {
                info!(plugin_id = %peer.id, "plugin disconnected");
                notify_plugin_offline(&reg, &peer);
                if let Some(health) = self.health.get() {
                    health.unregister_peer(&peer.id);
                }

                let expected = reg.expected.contains(&peer.id);
                if let Some(sup) = &self.supervisor {
                    sup.mark_offline(&peer.id).await;
                    if expected && sup.is_local(&peer.id) && !sup.is_shutting_down() {
                        info!(plugin_id = %peer.id, "expected plugin dropped, scheduling restart");
                        let sup = Arc::clone(sup);
                        let id = peer.id.clone();
                        tokio::spawn(async move {
                            if let Err(e) = sup.restart(&id).await {
                                warn!(plugin_id = %id, error = %e, "restart after disconnect failed");
                            }
                        });
                    }
                }
            }
            PeerRole::Unknown => {}
        }
        // `peer` drops here, closing its send queue.
    }

    // ─────────────────────────────────────────────────────────────────
    // External plugin liveness
    // ─────────────────────────────────────────────────────────────────

    async fn monitor_externals(self: Arc<Self>) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut ticker = tokio::time::interval(self.timings.ping_interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.check_externals().await,
                _ = shutdown_rx.changed() => return,
            }
        }
    }

    async fn check_externals(&self) {
        let timeout_ms = self.timings.heartbeat_timeout.as_millis() as i64;
        let probe_after_ms = (self.timings.heartbeat_interval * 2).as_millis() as i64;

        let mut reg = self.registry.write().await;
        let now = Utc::now();
        let mut went_dark: Vec<String> = Vec::new();

        {
            let Registry {
                externals, plugins, ..
            } = &mut *reg;

            for record in externals.values_mut() {
                if !record.connected {
                    continue;
                }
                let silent_ms = (now - record.last_heartbeat).num_milliseconds();

                if silent_ms > timeout_ms {
                    record.connected = false;
                    warn!(
                        plugin_id = %record.plugin_id,
                        silent_secs = silent_ms / 1000,
                        "external plugin heartbeat timeout"
                    );
                    went_dark.push(record.plugin_id.clone());
                } else if silent_ms > probe_after_ms {
                    let Some(peer) = plugins.get(&record.plugin_id).filter(|p| p.active) else {
                        continue;
                    };
                    let ping = Envelope::with_payload(
                        HUB_ID,
                        record.plugin_id.clone(),
                        "ping",
                        json!({"timestamp": now.timestamp()}),
                    );
                    if peer.send_envelope(&ping) {
                        debug!(plugin_id = %record.plugin_id, "pinged quiet external plugin");
                    }
                }
            }
        }

        for plugin_id in went_dark {
            if let Some(record) = reg.externals.get(&plugin_id) {
                notify_external_status(&reg, record);
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────
// Main-module notifications
// ─────────────────────────────────────────────────────────────────────

fn notify_plugin_online(registry: &Registry, plugin_id: &str) {
    let Some(main) = registry.main.as_ref().filter(|m| m.active) else {
        return;
    };
    let Some(plugin) = registry.plugins.get(plugin_id) else {
        return;
    };
    let envelope = Envelope::with_payload(
        HUB_ID,
        main.id.clone(),
        "plugin_online",
        json!({
            "plugin_id": plugin.id,
            "plugin_name": plugin.name,
            "plugin_type": plugin.kind,
        }),
    );
    if !main.send_envelope(&envelope) {
        warn!(plugin_id = %plugin_id, "could not notify main module, send queue full");
    }
}

fn notify_plugin_offline(registry: &Registry, plugin: &Peer) {
    let Some(main) = registry.main.as_ref().filter(|m| m.active) else {
        return;
    };
    let envelope = Envelope::with_payload(
        HUB_ID,
        main.id.clone(),
        "plugin_offline",
        json!({
            "plugin_id": plugin.id,
            "plugin_name": plugin.name,
        }),
    );
    if !main.send_envelope(&envelope) {
        warn!(plugin_id = %plugin.id, "could not notify main module, send queue full");
    }
}

fn notify_external_status(registry: &Registry, record: &ExternalRecord) {
    let Some(main) = registry.main.as_ref().filter(|m| m.active) else {
        return;
    };
    let envelope = Envelope::with_payload(
        HUB_ID,
        main.id.clone(),
        "external_plugin_status_update",
        record.status_payload(),
    );
    if main.send_envelope(&envelope) {
        debug!(
            plugin_id = %record.plugin_id,
            status = record.status_str(),
            "notified main module of external plugin status"
        );
    } else {
        warn!(plugin_id = %record.plugin_id, "could not notify main module, send queue full");
    }
}

fn deliver(peer: &Peer, frame: &str) {
    use tokio::sync::mpsc::error::TrySendError;

    match peer.try_send_frame(frame.to_string()) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => {
            warn!(peer_id = %peer.id, "send queue full, dropping frame");
        }
        Err(TrySendError::Closed(_)) => {
            debug!(peer_id = %peer.id, "send queue closed, dropping frame");
        }
    }
}
