//! Hub Client
//!
//! Peer-side connection to a stagelink hub over WebSocket. Plugins and
//! the main module use this to register, subscribe to message classes,
//! emit heartbeats, and exchange envelopes. All consumers should go
//! through this crate rather than using `tokio-tungstenite` directly.
//!
//! The write half is shared behind a mutex so a background heartbeat
//! task can run beside the caller's receive loop.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use stagelink_protocol::{Envelope, HUB_ID};

/// Concrete WebSocket stream type.
type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

type Writer = Arc<Mutex<SplitSink<WsStream, Message>>>;

/// How long to wait for the hub's registration confirmation.
const REGISTER_TIMEOUT: Duration = Duration::from_secs(5);

/// A live connection to the hub.
pub struct HubClient {
    writer: Writer,
    reader: SplitStream<WsStream>,
    id: String,
}

impl HubClient {
    /// Connect to a hub WebSocket endpoint (e.g. `ws://127.0.0.1:9500/ws`).
    ///
    /// # Errors
    ///
    /// Returns an error if the TCP connection or WebSocket handshake fails.
    pub async fn connect(url: &str) -> Result<Self> {
        let (ws, _response) = tokio_tungstenite::connect_async(url)
            .await
            .with_context(|| format!("failed to connect to hub at {url}"))?;
        let (writer, reader) = ws.split();

        Ok(Self {
            writer: Arc::new(Mutex::new(writer)),
            reader,
            id: String::new(),
        })
    }

    /// The peer id this client registered under (empty before registration).
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Send an envelope to the hub.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the WebSocket write fails.
    pub async fn send(&self, envelope: &Envelope) -> Result<()> {
        send_frame(&self.writer, envelope).await
    }

    /// Receive the next envelope, or `None` when the connection closes.
    ///
    /// Transport keepalives are answered internally and skipped.
    /// Application-level `ping` envelopes are answered with `pong` and
    /// skipped as well. Malformed frames are logged and skipped.
    pub async fn recv(&mut self) -> Result<Option<Envelope>> {
        loop {
            let message = match self.reader.next().await {
                None => return Ok(None),
                Some(msg) => msg.context("WebSocket read failed")?,
            };

            match message {
                Message::Text(text) => {
                    let envelope = match Envelope::from_json(&text) {
                        Ok(env) => env,
                        Err(e) => {
                            warn!(error = %e, "dropping malformed frame from hub");
                            continue;
                        }
                    };
                    if envelope.kind == "ping" {
                        let pong = Envelope::new(self.id.clone(), HUB_ID, "pong");
                        send_frame(&self.writer, &pong).await?;
                        continue;
                    }
                    return Ok(Some(envelope));
                }
                Message::Ping(data) => {
                    self.writer.lock().await.send(Message::Pong(data)).await?;
                }
                Message::Close(_) => return Ok(None),
                _ => {}
            }
        }
    }

    /// Receive the next envelope with a deadline.
    ///
    /// # Errors
    ///
    /// Returns an error if the deadline passes or the read fails.
    pub async fn recv_timeout(&mut self, deadline: Duration) -> Result<Option<Envelope>> {
        tokio::time::timeout(deadline, self.recv())
            .await
            .context("timed out waiting for an envelope from the hub")?
    }

    /// Register as a plugin and wait for the hub's reply.
    ///
    /// Returns the confirmation envelope (`registered`, or `error` when
    /// the hub rejects the registration).
    pub async fn register_plugin(&mut self, id: &str, name: &str) -> Result<Envelope> {
        let register = Envelope::with_payload(
            id,
            HUB_ID,
            "register",
            json!({"id": id, "name": name, "type": "plugin"}),
        );
        self.register(id, register).await
    }

    /// Register as the main module and wait for the hub's reply.
    ///
    /// Returns the confirmation envelope; an `error` reply with code
    /// `main_module_already_active` means another main module holds the
    /// slot.
    pub async fn register_main_module(&mut self, id: &str, name: &str) -> Result<Envelope> {
        let register = Envelope::with_payload(
            id,
            HUB_ID,
            "register",
            json!({"id": id, "name": name, "component_type": "main_module"}),
        );
        self.register(id, register).await
    }

    /// Register as an external plugin (identified by `plugin_id`) and
    /// wait for the hub's reply.
    pub async fn register_external_plugin(
        &mut self,
        plugin_id: &str,
        ip: &str,
    ) -> Result<Envelope> {
        let register = Envelope::with_payload(
            plugin_id,
            HUB_ID,
            "register",
            json!({"plugin_id": plugin_id, "ip": ip}),
        );
        self.register(plugin_id, register).await
    }

    async fn register(&mut self, id: &str, register: Envelope) -> Result<Envelope> {
        self.send(&register).await?;

        let deadline = tokio::time::Instant::now() + REGISTER_TIMEOUT;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            match self.recv_timeout(remaining).await? {
                None => bail!("hub closed the connection during registration"),
                Some(reply) if reply.kind == "registered" || reply.kind == "error" => {
                    if reply.kind == "registered" {
                        self.id = id.to_string();
                    }
                    return Ok(reply);
                }
                Some(other) => {
                    debug!(kind = %other.kind, "skipping envelope while registering");
                }
            }
        }
    }

    /// Subscribe to one or more message classes.
    pub async fn subscribe(&self, classes: &[&str]) -> Result<()> {
        let envelope = Envelope::with_payload(
            self.id.clone(),
            HUB_ID,
            "subscribe",
            json!({"class": classes}),
        );
        self.send(&envelope).await
    }

    /// Unsubscribe from a message class.
    pub async fn unsubscribe(&self, class: &str) -> Result<()> {
        let envelope = Envelope::with_payload(
            self.id.clone(),
            HUB_ID,
            "unsubscribe",
            json!({"class": class}),
        );
        self.send(&envelope).await
    }

    /// Declare the set of plugins the hub should have running.
    /// Main-module only; the hub ignores it from other peers.
    pub async fn declare_required_plugins(&self, plugin_ids: &[&str]) -> Result<()> {
        let envelope = Envelope::with_payload(
            self.id.clone(),
            HUB_ID,
            "declare_required_plugins",
            json!({"plugins": plugin_ids}),
        );
        self.send(&envelope).await
    }

    /// Ask the hub for a snapshot of every registered plugin.
    /// The reply arrives as a `plugin_status_response` envelope.
    pub async fn request_plugin_status(&self) -> Result<()> {
        let envelope = Envelope::new(self.id.clone(), HUB_ID, "get_plugin_status");
        self.send(&envelope).await
    }

    /// Send a single application-level heartbeat.
    pub async fn send_heartbeat(&self) -> Result<()> {
        let envelope = Envelope::new(self.id.clone(), HUB_ID, "heartbeat");
        self.send(&envelope).await
    }

    /// Spawn a background task emitting heartbeats at `interval`.
    ///
    /// The task stops when the connection closes (the first failed
    /// write) or when the returned handle is aborted.
    pub fn spawn_heartbeat(&self, interval: Duration) -> JoinHandle<()> {
        let writer = Arc::clone(&self.writer);
        let id = self.id.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let heartbeat = Envelope::new(id.clone(), HUB_ID, "heartbeat");
                if let Err(e) = send_frame(&writer, &heartbeat).await {
                    debug!(error = %e, "heartbeat task stopping");
                    return;
                }
            }
        })
    }

    /// Close the connection.
    pub async fn close(&mut self) -> Result<()> {
        self.writer
            .lock()
            .await
            .send(Message::Close(None))
            .await
            .context("WebSocket close failed")
    }
}

async fn send_frame(writer: &Writer, envelope: &Envelope) -> Result<()> {
    let frame = envelope.to_json().context("failed to serialize envelope")?;
    writer
        .lock()
        .await
        .send(Message::Text(frame.into()))
        .await
        .context("WebSocket send failed")
}
