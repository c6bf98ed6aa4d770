//! Concrete single-writer event loop implementing [`crate::domain`]'s hub (spec.md §4.5).
//!
//! The inbound surface is collapsed into one tagged `Command` channel rather than the three
//! literal channels spec.md describes (register/unregister/broadcast) plus a stop signal: the
//! architectural invariant spec.md cares about — one task owns the client set exclusively, no
//! locks, FIFO per-client delivery — holds either way, and a single `tokio::select!` branch is
//! the idiomatic way to express "exactly one task processes all inbound commands" in Rust. See
//! DESIGN.md.

use crate::domain::{ClientId, Message, ServerFrame, Topic, Transport, server_frame};
use log::{debug, info, warn};
use serde::Deserialize;
use std::{collections::HashMap, time::Duration};
use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{Instant, interval},
};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(with = "humantime_serde", default = "default_heartbeat_interval")]
    pub heartbeat_interval: Duration,

    #[serde(default = "default_outbound_queue_size")]
    pub outbound_queue_size: usize,

    /// Consecutive dropped messages (full outbound queue) before a client is disconnected.
    #[serde(default = "default_drop_threshold")]
    pub drop_threshold: u32,

    #[serde(default = "default_command_queue_size")]
    pub command_queue_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            heartbeat_interval: default_heartbeat_interval(),
            outbound_queue_size: default_outbound_queue_size(),
            drop_threshold: default_drop_threshold(),
            command_queue_size: default_command_queue_size(),
        }
    }
}

fn default_heartbeat_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_outbound_queue_size() -> usize {
    256
}

fn default_drop_threshold() -> u32 {
    5
}

fn default_command_queue_size() -> usize {
    1024
}

enum Command {
    Register {
        id: ClientId,
        transport: Box<dyn Transport>,
    },
    Unregister {
        id: ClientId,
    },
    Broadcast {
        message: Message,
    },
    Subscribe {
        id: ClientId,
        topics: Vec<Topic>,
    },
    Unsubscribe {
        id: ClientId,
        topics: Vec<Topic>,
    },
    Pong {
        id: ClientId,
    },
    Stop,
}

/// Cloneable handle sending commands to the hub's event loop. Registering is a no-op if the
/// client is already present; unregistering is idempotent.
#[derive(Clone)]
pub struct HubHandle {
    commands: mpsc::Sender<Command>,
}

impl HubHandle {
    pub async fn register(&self, id: ClientId, transport: Box<dyn Transport>) {
        let _ = self.commands.send(Command::Register { id, transport }).await;
    }

    pub async fn unregister(&self, id: ClientId) {
        let _ = self.commands.send(Command::Unregister { id }).await;
    }

    pub async fn broadcast(&self, message: Message) {
        let _ = self.commands.send(Command::Broadcast { message }).await;
    }

    pub async fn subscribe(&self, id: ClientId, topics: Vec<Topic>) {
        let _ = self.commands.send(Command::Subscribe { id, topics }).await;
    }

    pub async fn unsubscribe(&self, id: ClientId, topics: Vec<Topic>) {
        let _ = self.commands.send(Command::Unsubscribe { id, topics }).await;
    }

    pub async fn pong(&self, id: ClientId) {
        let _ = self.commands.send(Command::Pong { id }).await;
    }

    /// Stop the event loop. All clients are closed in an unspecified order; returns when the
    /// loop exits.
    pub async fn stop(&self) {
        let _ = self.commands.send(Command::Stop).await;
    }
}

struct ClientState {
    outbound: mpsc::Sender<ServerFrame>,
    writer: JoinHandle<()>,
    subscriptions: std::collections::HashSet<Topic>,
    last_pong: Instant,
    consecutive_drops: u32,
}

impl ClientState {
    /// `None` subscription set means unfiltered: every topic is delivered.
    fn wants(&self, topic: Topic) -> bool {
        self.subscriptions.is_empty() || self.subscriptions.contains(&topic)
    }
}

/// Spawn the hub's event loop and return a handle to it plus its `JoinHandle`, so callers can
/// await clean shutdown.
pub fn spawn(config: Config) -> (HubHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(config.command_queue_size);
    let handle = HubHandle { commands: tx };

    let join = tokio::spawn(run(config, rx));

    (handle, join)
}

async fn run(config: Config, mut commands: mpsc::Receiver<Command>) {
    let mut clients: HashMap<ClientId, ClientState> = HashMap::new();
    let mut heartbeat = interval(config.heartbeat_interval);
    heartbeat.tick().await; // first tick fires immediately; consume it.

    loop {
        tokio::select! {
            command = commands.recv() => {
                match command {
                    Some(Command::Register { id, transport }) => {
                        register(&config, &mut clients, id, transport);
                    }
                    Some(Command::Unregister { id }) => {
                        unregister(&mut clients, id).await;
                    }
                    Some(Command::Broadcast { message }) => {
                        broadcast(&config, &mut clients, &message).await;
                    }
                    Some(Command::Subscribe { id, topics }) => {
                        if let Some(client) = clients.get_mut(&id) {
                            client.subscriptions.extend(topics);
                        }
                    }
                    Some(Command::Unsubscribe { id, topics }) => {
                        if let Some(client) = clients.get_mut(&id) {
                            for topic in topics {
                                client.subscriptions.remove(&topic);
                            }
                        }
                    }
                    Some(Command::Pong { id }) => {
                        if let Some(client) = clients.get_mut(&id) {
                            client.last_pong = Instant::now();
                            client.consecutive_drops = 0;
                        }
                    }
                    Some(Command::Stop) | None => {
                        info!("stopping hub, closing all clients");
                        for (_, client) in clients.drain() {
                            client.writer.abort();
                        }
                        return;
                    }
                }
            }

            _ = heartbeat.tick() => {
                send_heartbeat(&config, &mut clients).await;
            }
        }
    }
}

fn register(
    config: &Config,
    clients: &mut HashMap<ClientId, ClientState>,
    id: ClientId,
    transport: Box<dyn Transport>,
) {
    if clients.contains_key(&id) {
        return;
    }

    let (outbound, receiver) = mpsc::channel(config.outbound_queue_size);
    let writer = tokio::spawn(run_writer(transport, receiver));

    clients.insert(
        id,
        ClientState {
            outbound,
            writer,
            subscriptions: std::collections::HashSet::new(),
            last_pong: Instant::now(),
            consecutive_drops: 0,
        },
    );

    debug!(client_count = clients.len(); "client registered");
}

async fn unregister(clients: &mut HashMap<ClientId, ClientState>, id: ClientId) {
    if let Some(client) = clients.remove(&id) {
        client.writer.abort();
        debug!(client_count = clients.len(); "client unregistered");
    }
}

/// Per-client writer: drains the outbound queue and pushes frames to the transport. Exits (and
/// closes the transport) once the queue is dropped.
async fn run_writer(mut transport: Box<dyn Transport>, mut receiver: mpsc::Receiver<ServerFrame>) {
    while let Some(frame) = receiver.recv().await {
        if let Err(error) = transport.send(frame).await {
            warn!(error:%; "client transport send failed, closing");
            break;
        }
    }

    transport.close().await;
}

/// Non-blocking with respect to slow clients: a full outbound queue drops that message and
/// counts toward disconnection, but never stalls the broadcast itself.
async fn broadcast(config: &Config, clients: &mut HashMap<ClientId, ClientState>, message: &Message) {
    let frame = server_frame(message);
    let mut to_unregister = Vec::new();

    for (&id, client) in clients.iter_mut() {
        if !client.wants(message.topic) {
            continue;
        }

        deliver(config, &mut to_unregister, id, client, frame.clone());
    }

    for id in to_unregister {
        unregister(clients, id).await;
    }
}

async fn send_heartbeat(config: &Config, clients: &mut HashMap<ClientId, ClientState>) {
    let pong_timeout = config.heartbeat_interval * 2;
    let mut to_unregister = Vec::new();

    for (&id, client) in clients.iter_mut() {
        if client.last_pong.elapsed() > pong_timeout {
            to_unregister.push(id);
            continue;
        }

        deliver(config, &mut to_unregister, id, client, ServerFrame::Ping);
    }

    for id in to_unregister {
        unregister(clients, id).await;
    }
}

fn deliver(
    config: &Config,
    to_unregister: &mut Vec<ClientId>,
    id: ClientId,
    client: &mut ClientState,
    frame: ServerFrame,
) {
    match client.outbound.try_send(frame) {
        Ok(()) => {
            client.consecutive_drops = 0;
        }

        Err(mpsc::error::TrySendError::Full(_)) => {
            client.consecutive_drops += 1;
            if client.consecutive_drops >= config.drop_threshold {
                warn!(client_count = 1; "client exceeded drop threshold, disconnecting");
                to_unregister.push(id);
            }
        }

        Err(mpsc::error::TrySendError::Closed(_)) => {
            to_unregister.push(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct RecordingTransport {
        received: Arc<Mutex<Vec<ServerFrame>>>,
        blocked: Arc<std::sync::atomic::AtomicBool>,
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn send(&mut self, frame: ServerFrame) -> Result<(), crate::domain::TransportError> {
            if self.blocked.load(std::sync::atomic::Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            self.received.lock().unwrap().push(frame);
            Ok(())
        }

        async fn close(&mut self) {}
    }

    fn frame_tag(frame: &ServerFrame) -> &'static str {
        match frame {
            ServerFrame::Block { .. } => "block",
            ServerFrame::Transaction { .. } => "transaction",
            ServerFrame::DexSwap { .. } => "dex_swap",
            ServerFrame::DexLiquidity { .. } => "dex_liquidity",
            ServerFrame::OraclePrice { .. } => "oracle_price",
            ServerFrame::Ping => "ping",
        }
    }

    #[tokio::test]
    async fn delivers_in_order_to_subscribed_client() {
        let (handle, _join) = spawn(Config::default());

        let id = ClientId::new();
        let transport = RecordingTransport::default();
        let received = transport.received.clone();
        handle.register(id, Box::new(transport)).await;
        handle.subscribe(id, vec![Topic::Block]).await;

        for height in 1..=5 {
            handle
                .broadcast(Message::new(Topic::Block, serde_json::json!({ "height": height })))
                .await;
        }

        // Give the writer task a moment to drain.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let received = received.lock().unwrap();
        assert_eq!(received.len(), 5);
        assert!(received.iter().all(|f| frame_tag(f) == "block"));
    }

    #[tokio::test]
    async fn unfiltered_client_receives_every_topic() {
        let (handle, _join) = spawn(Config::default());

        let id = ClientId::new();
        let transport = RecordingTransport::default();
        let received = transport.received.clone();
        handle.register(id, Box::new(transport)).await;

        handle
            .broadcast(Message::new(Topic::Block, serde_json::json!({})))
            .await;
        handle
            .broadcast(Message::new(Topic::OraclePrice, serde_json::json!({})))
            .await;

        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(received.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn slow_client_is_disconnected_after_drop_threshold() {
        let config = Config {
            outbound_queue_size: 1,
            drop_threshold: 3,
            ..Config::default()
        };
        let (handle, _join) = spawn(config);

        let id = ClientId::new();
        let transport = RecordingTransport {
            blocked: Arc::new(std::sync::atomic::AtomicBool::new(true)),
            ..Default::default()
        };
        handle.register(id, Box::new(transport)).await;

        for _ in 0..10 {
            handle
                .broadcast(Message::new(Topic::Block, serde_json::json!({})))
                .await;
        }

        tokio::time::sleep(Duration::from_millis(50)).await;

        // The hub disconnects the client internally; a further broadcast must not hang even
        // though the slow client never unblocks.
        handle
            .broadcast(Message::new(Topic::Block, serde_json::json!({})))
            .await;
    }
}
