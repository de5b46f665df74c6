//! WebSocket hub: the concrete push transport to browser clients.
//!
//! Each connection is assigned a UUID announced in the first frame; the
//! client quotes it as `clientId` in job requests, and the engine's
//! callbacks carry it back for correlation. Events are JSON text frames of
//! the form `{"event": ..., "payload": ...}`.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::channels::{ClientEvent, NotificationChannel};
use crate::error::ChannelError;

/// Connection registry mapping client ids to outbound event queues.
pub struct WsHub {
    /// Std lock: sends on unbounded channels are synchronous, so no guard
    /// is ever held across an await. Poisoning recovers to the inner map.
    connections: RwLock<HashMap<String, mpsc::UnboundedSender<ClientEvent>>>,
}

impl Default for WsHub {
    fn default() -> Self {
        Self::new()
    }
}

impl WsHub {
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Register a connection and return its event queue receiver.
    pub fn register(&self, client_id: &str) -> mpsc::UnboundedReceiver<ClientEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut map = self
            .connections
            .write()
            .unwrap_or_else(|e| e.into_inner());
        if map.insert(client_id.to_string(), tx).is_some() {
            tracing::warn!(client_id, "Replaced an existing connection registration");
        }
        rx
    }

    pub fn unregister(&self, client_id: &str) {
        self.connections
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(client_id);
    }

    pub fn connection_count(&self) -> usize {
        self.connections
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

#[async_trait]
impl NotificationChannel for WsHub {
    async fn send(&self, client_id: &str, event: ClientEvent) -> Result<(), ChannelError> {
        let map = self.connections.read().unwrap_or_else(|e| e.into_inner());
        match map.get(client_id) {
            Some(tx) => tx.send(event).map_err(|_| ChannelError::SendFailed {
                client_id: client_id.to_string(),
                reason: "connection closed".to_string(),
            }),
            None => Err(ChannelError::NotConnected {
                client_id: client_id.to_string(),
            }),
        }
    }
}

/// Drive one upgraded socket until the client disconnects.
pub async fn run_connection(socket: WebSocket, hub: Arc<WsHub>) {
    let client_id = Uuid::new_v4().to_string();
    let mut events = hub.register(&client_id);
    let (mut sink, mut stream) = socket.split();

    // Announce the connection id so the client can tag its job requests.
    let hello = serde_json::json!({ "event": "connection", "payload": client_id }).to_string();
    if sink.send(Message::Text(hello.into())).await.is_err() {
        hub.unregister(&client_id);
        return;
    }
    tracing::info!(client_id, "WebSocket client connected");

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                let frame = match serde_json::to_string(&event) {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::warn!(client_id, error = %e, "Failed to serialize push event");
                        continue;
                    }
                };
                if sink.send(Message::Text(frame.into())).await.is_err() {
                    break;
                }
            }
            msg = stream.next() => {
                match msg {
                    None | Some(Err(_)) | Some(Ok(Message::Close(_))) => break,
                    // Inbound frames are ignored; the socket is push-only.
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    hub.unregister(&client_id);
    tracing::info!(client_id, "WebSocket client disconnected");
}
