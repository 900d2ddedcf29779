//! Peer Endpoint
//!
//! One reader task and one writer task per WebSocket connection. The
//! writer drains the peer's bounded send queue and emits transport
//! keepalives; the reader parses envelopes and feeds the hub inbound
//! queue. Whichever task dies first takes the other down with it, and
//! the hub's disconnect queue is signaled exactly once.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use stagelink_protocol::{Envelope, HUB_ID};

use crate::hub::{send_queue, ConnId, Hub, Peer};

/// Per-write deadline; a peer that cannot accept a frame in this long
/// is dead.
const WRITE_DEADLINE: Duration = Duration::from_secs(10);

/// Read deadline, refreshed by any inbound traffic including keepalive
/// pongs.
const READ_DEADLINE: Duration = Duration::from_secs(60);

/// Transport-level keepalive ping cadence.
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Drive one peer connection to completion.
pub async fn handle_socket(socket: WebSocket, hub: Arc<Hub>) {
    let conn_id = Uuid::new_v4();
    let (tx, rx) = send_queue();
    hub.connect(Peer::pending(conn_id, tx.clone())).await;
    debug!(conn_id = %conn_id, "peer endpoint started");

    let (sink, stream) = socket.split();
    let mut writer = tokio::spawn(write_loop(sink, rx));
    let mut reader = tokio::spawn(read_loop(stream, Arc::clone(&hub), conn_id, tx));

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }

    hub.disconnect(conn_id).await;
    debug!(conn_id = %conn_id, "peer endpoint closed");
}

/// Drain the send queue onto the wire.
async fn write_loop(mut sink: SplitSink<WebSocket, Message>, mut rx: mpsc::Receiver<String>) {
    let mut keepalive = tokio::time::interval(KEEPALIVE_INTERVAL);
    keepalive.tick().await;

    loop {
        tokio::select! {
            frame = rx.recv() => match frame {
                Some(frame) => {
                    let write = sink.send(Message::Text(frame.into()));
                    match tokio::time::timeout(WRITE_DEADLINE, write).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            debug!(error = %e, "write failed, closing endpoint");
                            return;
                        }
                        Err(_) => {
                            debug!("write deadline exceeded, closing endpoint");
                            return;
                        }
                    }
                }
                // Queue closed after drain: the hub expelled the peer or
                // tore it down. Say goodbye properly.
                None => {
                    let _ = sink.send(Message::Close(None)).await;
                    return;
                }
            },
            _ = keepalive.tick() => {
                let ping = sink.send(Message::Ping(Vec::new().into()));
                if tokio::time::timeout(WRITE_DEADLINE, ping).await.is_err() {
                    debug!("keepalive write deadline exceeded, closing endpoint");
                    return;
                }
            }
        }
    }
}

/// Parse inbound frames and feed the hub.
async fn read_loop(
    mut stream: SplitStream<WebSocket>,
    hub: Arc<Hub>,
    conn_id: ConnId,
    tx: mpsc::Sender<String>,
) {
    loop {
        let message = match tokio::time::timeout(READ_DEADLINE, stream.next()).await {
            Err(_) => {
                debug!(conn_id = %conn_id, "read deadline exceeded");
                return;
            }
            Ok(None) => return,
            Ok(Some(Err(e))) => {
                debug!(conn_id = %conn_id, error = %e, "read failed");
                return;
            }
            Ok(Some(Ok(message))) => message,
        };

        match message {
            Message::Text(text) => {
                let envelope = match Envelope::from_json(&text) {
                    Ok(envelope) => envelope,
                    Err(e) => {
                        warn!(conn_id = %conn_id, error = %e, "dropping malformed frame");
                        continue;
                    }
                };

                // The one verb a peer answers by itself; never forwarded.
                if envelope.kind == "ping" {
                    let pong = Envelope::new(HUB_ID, envelope.from.clone(), "pong");
                    if let Ok(frame) = pong.to_json() {
                        if tx.try_send(frame).is_err() {
                            debug!(conn_id = %conn_id, "pong dropped, send queue full");
                        }
                    }
                    continue;
                }

                // Blocks when the hub inbound queue is saturated; the hub
                // loop is the serialization point and must not be bypassed.
                hub.submit(conn_id, envelope).await;
            }
            Message::Pong(_) => hub.note_beacon(conn_id).await,
            Message::Close(_) => return,
            _ => {}
        }
    }
}
