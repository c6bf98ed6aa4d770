//! Single-writer realtime fan-out hub (spec.md §4.5). The hub's client set is owned
//! exclusively by its event loop; external code mutates it only by sending commands over the
//! channels a [`HubHandle`] wraps.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A message-type tag, used both to classify a broadcast and to filter a client's subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    Block,
    Transaction,
    DexSwap,
    DexLiquidity,
    OraclePrice,
}

/// A message queued for broadcast, tagged with the topic clients filter on.
#[derive(Debug, Clone)]
pub struct Message {
    pub topic: Topic,
    pub payload: serde_json::Value,
}

impl Message {
    pub fn new(topic: Topic, payload: serde_json::Value) -> Self {
        Self { topic, payload }
    }
}

/// Frame a client sends the hub, forwarded by whatever reads the client's transport.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum ClientFrame {
    Subscribe { topics: Vec<Topic> },
    Unsubscribe { topics: Vec<Topic> },
    Pong,
}

/// Frame the hub sends a client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Block { data: serde_json::Value },
    Transaction { data: serde_json::Value },
    DexSwap { data: serde_json::Value },
    DexLiquidity { data: serde_json::Value },
    OraclePrice { data: serde_json::Value },
    Ping,
}

impl ServerFrame {
    fn from_message(message: &Message) -> Self {
        let data = message.payload.clone();
        match message.topic {
            Topic::Block => ServerFrame::Block { data },
            Topic::Transaction => ServerFrame::Transaction { data },
            Topic::DexSwap => ServerFrame::DexSwap { data },
            Topic::DexLiquidity => ServerFrame::DexLiquidity { data },
            Topic::OraclePrice => ServerFrame::OraclePrice { data },
        }
    }
}

pub(crate) fn server_frame(message: &Message) -> ServerFrame {
    ServerFrame::from_message(message)
}

/// Opaque handle identifying a registered client within the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(Uuid);

impl ClientId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

/// Write-only, single-threaded handle to a client's transport. Any bidirectional message stream
/// satisfies this by providing its write half (spec.md §9 design notes).
///
/// Boxed as `dyn Transport` in the client set, since the hub holds heterogeneous connections
/// (real websockets, test doubles); that needs object safety `trait_variant`'s generic-only
/// async traits don't provide.
#[async_trait::async_trait]
pub trait Transport: Send + 'static {
    async fn send(&mut self, frame: ServerFrame) -> Result<(), TransportError>;

    async fn close(&mut self);
}

#[derive(Debug, thiserror::Error)]
#[error("transport send failed")]
pub struct TransportError(#[source] pub Box<dyn std::error::Error + Send + Sync>);
