//! Push notification channels.
//!
//! The orchestration core only needs best-effort, at-least-once delivery to
//! a connection identified by an opaque client id. Ordering is guaranteed
//! per client, never across clients, and nothing is persisted for
//! disconnected clients — a lost notification is a UI-staleness issue, not
//! a correctness issue.

pub mod ws;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::ChannelError;

/// Event pushed to a connected client. The event name is the client-side
/// dispatch key; names and payload shapes are the wire contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "payload", rename_all = "camelCase")]
pub enum ClientEvent {
    /// Raw completion body or execution report text.
    OnComplete(String),
    /// Signed URL for a rendered screenshot.
    OnPicture(String),
    /// Component layout JSON, serialized compact.
    OnComponents(String),
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::OnComplete(_) => "onComplete",
            ClientEvent::OnPicture(_) => "onPicture",
            ClientEvent::OnComponents(_) => "onComponents",
        }
    }
}

/// Abstracted push transport to a connected client.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Best-effort delivery of one event to one client.
    async fn send(&self, client_id: &str, event: ClientEvent) -> Result<(), ChannelError>;
}
