//! Axum WebSocket transport: the concrete [`Transport`] client connections use, plus the upgrade
//! handler that wires an inbound connection into the hub.

use crate::domain::{ClientFrame, ClientId, ServerFrame, Transport, TransportError};
use crate::infra::hub::HubHandle;
use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt, stream::SplitSink};
use log::{debug, warn};

pub struct AxumTransport {
    sink: SplitSink<WebSocket, Message>,
}

#[async_trait::async_trait]
impl Transport for AxumTransport {
    async fn send(&mut self, frame: ServerFrame) -> Result<(), TransportError> {
        let text = serde_json::to_string(&frame).map_err(|error| TransportError(Box::new(error)))?;

        self.sink
            .send(Message::Text(text.into()))
            .await
            .map_err(|error| TransportError(Box::new(error)))
    }

    async fn close(&mut self) {
        let _ = self.sink.send(Message::Close(None)).await;
    }
}

/// Route handler: upgrades the HTTP connection and hands it to [`handle_socket`].
pub async fn upgrade(ws: WebSocketUpgrade, State(hub): State<HubHandle>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, hub))
}

/// Registers the connection with the hub, then reads [`ClientFrame`]s off it until it closes,
/// forwarding subscribe/unsubscribe/pong commands. Unregisters on exit.
async fn handle_socket(socket: WebSocket, hub: HubHandle) {
    let id = ClientId::new();
    let (sink, mut stream) = socket.split();

    hub.register(id, Box::new(AxumTransport { sink })).await;
    debug!(client = ?id; "client connected");

    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientFrame>(&text) {
                Ok(ClientFrame::Subscribe { topics }) => hub.subscribe(id, topics).await,
                Ok(ClientFrame::Unsubscribe { topics }) => hub.unsubscribe(id, topics).await,
                Ok(ClientFrame::Pong) => hub.pong(id).await,

                Err(error) => {
                    warn!(error:%; "cannot decode client frame, ignoring");
                }
            },

            Ok(Message::Pong(_)) => hub.pong(id).await,

            Ok(Message::Close(_)) => break,

            Ok(_) => {}

            Err(error) => {
                warn!(error:%; "websocket read error, disconnecting client");
                break;
            }
        }
    }

    hub.unregister(id).await;
    debug!(client = ?id; "client disconnected");
}
