//! [`Subscriber`] implementation over a WebSocket push connection, as used by
//! `scripts/pm-18678-investigation` to subscribe to node events.

use crate::domain::{BlockEvent, Subscriber};
use fastrace::trace;
use futures::{SinkExt, StreamExt};
use log::{info, warn};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub url: String,

    #[serde(default = "default_block_buffer")]
    pub block_buffer: usize,

    #[serde(default = "default_initial_connect_attempts")]
    pub initial_connect_attempts: u32,

    #[serde(with = "humantime_serde", default = "default_reconnect_initial_delay")]
    pub reconnect_initial_delay: Duration,

    #[serde(with = "humantime_serde", default = "default_reconnect_max_delay")]
    pub reconnect_max_delay: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            url: "ws://localhost:26657/websocket".to_string(),
            block_buffer: default_block_buffer(),
            initial_connect_attempts: default_initial_connect_attempts(),
            reconnect_initial_delay: default_reconnect_initial_delay(),
            reconnect_max_delay: default_reconnect_max_delay(),
        }
    }
}

fn default_block_buffer() -> usize {
    1000
}

fn default_initial_connect_attempts() -> u32 {
    5
}

fn default_reconnect_initial_delay() -> Duration {
    Duration::from_millis(250)
}

fn default_reconnect_max_delay() -> Duration {
    Duration::from_secs(30)
}

/// [`Subscriber`] backed by a single persistent WebSocket connection, with an internal worker
/// task that reconnects with exponential backoff and resubscribes after a disconnect. A gap in
/// heights across a reconnect is not resolved here; the indexer detects it against its
/// checkpoint (spec.md §4.2).
pub struct WsSubscriber {
    receiver: mpsc::Receiver<BlockEvent>,
}

impl WsSubscriber {
    /// Establishes the initial connection, retrying up to `config.initial_connect_attempts`
    /// times; failure to connect at all is fatal (spec.md §7 kind 5) and surfaced as
    /// [`Error::InitialConnect`]. Once connected, a background task takes over reconnecting
    /// indefinitely.
    pub async fn new(config: Config) -> Result<Self, Error> {
        let stream = connect_with_retry(&config.url, config.initial_connect_attempts).await?;
        let (sender, receiver) = mpsc::channel(config.block_buffer);

        tokio::spawn(run(config, stream, sender));

        Ok(Self { receiver })
    }
}

impl Subscriber for WsSubscriber {
    async fn next(&mut self) -> Option<BlockEvent> {
        self.receiver.recv().await
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot establish initial websocket connection after {0} attempts")]
    InitialConnect(u32),
}

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

#[trace]
async fn connect_with_retry(url: &str, attempts: u32) -> Result<WsStream, Error> {
    let mut delay = Duration::from_millis(250);

    for attempt in 1..=attempts {
        match connect_async(url).await {
            Ok((stream, _response)) => return Ok(stream),

            Err(error) if attempt < attempts => {
                warn!(attempt, error:%; "initial websocket connect failed, retrying");
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(Duration::from_secs(30));
            }

            Err(error) => {
                warn!(error:%; "initial websocket connect exhausted all attempts");
            }
        }
    }

    Err(Error::InitialConnect(attempts))
}

/// Background worker: reads frames off the connection, decodes `BlockEvent`s and forwards them
/// to the bounded channel (blocking, never dropping, when it is full), reconnecting with
/// exponential backoff on disconnect. Exits once the channel's receiver is dropped.
async fn run(config: Config, mut stream: WsStream, sender: mpsc::Sender<BlockEvent>) {
    let mut delay = config.reconnect_initial_delay;

    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => {
                delay = config.reconnect_initial_delay;

                match serde_json::from_str::<NewBlockNotification>(&text) {
                    Ok(notification) => {
                        if sender.send(notification.block).await.is_err() {
                            info!("subscriber receiver dropped, shutting down worker");
                            return;
                        }
                    }

                    Err(error) => {
                        warn!(error:%; "cannot decode new-block push notification, skipping");
                    }
                }
            }

            Some(Ok(Message::Ping(payload))) => {
                let _ = stream.send(Message::Pong(payload)).await;
            }

            Some(Ok(_)) => {}

            Some(Err(error)) => {
                warn!(error:%; "websocket read error, reconnecting");
                stream = reconnect(&config, &mut delay).await;
            }

            None => {
                warn!("websocket connection closed, reconnecting");
                stream = reconnect(&config, &mut delay).await;
            }
        }
    }
}

/// Retries forever with exponential backoff; there is no bounded window once the initial
/// connection has succeeded (spec.md §4.2).
async fn reconnect(config: &Config, delay: &mut Duration) -> WsStream {
    loop {
        tokio::time::sleep(*delay).await;
        *delay = (*delay * 2).min(config.reconnect_max_delay);

        match connect_async(&config.url).await {
            Ok((stream, _response)) => {
                info!("websocket reconnected");
                return stream;
            }

            Err(error) => {
                warn!(error:%; "reconnect attempt failed, retrying");
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct NewBlockNotification {
    block: BlockEvent,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_match_spec() {
        let config = Config::default();
        assert_eq!(config.block_buffer, 1000);
        assert_eq!(config.reconnect_max_delay, Duration::from_secs(30));
    }

    #[test]
    fn decodes_new_block_notification() {
        let json = r#"{
            "block": {
                "height": 501,
                "hash": "abc",
                "proposer": "validator1",
                "time": "2026-01-01T00:00:00Z",
                "txs": []
            }
        }"#;

        let notification: NewBlockNotification =
            serde_json::from_str(json).expect("decodes");
        assert_eq!(notification.block.height, 501);
        assert_eq!(notification.block.hash, "abc");
        assert!(notification.block.txs.is_empty());
    }

    #[test]
    fn malformed_notification_fails_to_decode_without_panicking() {
        let result: Result<NewBlockNotification, _> = serde_json::from_str("{\"not\":\"a block\"}");
        assert!(result.is_err());
    }
}
