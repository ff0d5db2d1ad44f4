//! The websocket protocol adapter: raw JSON envelopes over a persistent
//! bidirectional socket at `/websocket`.

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, Query, State,
    },
    http::HeaderMap,
    response::IntoResponse,
};
use futures::{
    sink::SinkExt,
    stream::{SplitSink, SplitStream, StreamExt},
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::{
    run_connection, ConnectQuery, HandshakeParams, Inbound, Transport, TransportError,
};
use crate::protocol::{ClientMessage, ServerMessage};
use crate::state::AppState;
use crate::types::Protocol;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<ConnectQuery>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let params = HandshakeParams {
        session_token: query.session_token,
        ip: addr.ip().to_string(),
        user_agent: user_agent(&headers),
    };
    ws.on_upgrade(move |socket| handle_socket(socket, params, state))
}

pub(super) fn user_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

async fn handle_socket(socket: WebSocket, params: HandshakeParams, state: Arc<AppState>) {
    let (sender, receiver) = socket.split();
    let (inbound_tx, inbound_rx) = mpsc::channel(32);

    let reader = tokio::spawn(read_loop(receiver, inbound_tx));

    let transport = WsTransport {
        protocol: Protocol::Websocket,
        sender,
    };
    run_connection(transport, inbound_rx, params, state).await;

    reader.abort();
}

/// Translate raw frames into lifecycle events. Parse failures keep the
/// connection open; pings are answered by axum itself.
pub(super) async fn read_loop(
    mut receiver: SplitStream<WebSocket>,
    tx: mpsc::Sender<Inbound>,
) {
    while let Some(frame) = receiver.next().await {
        let event = match frame {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(msg) => Inbound::Submission(msg.into_submission()),
                Err(e) => Inbound::ParseError(e.to_string()),
            },
            Ok(Message::Close(frame)) => {
                let _ = tx
                    .send(Inbound::Closed {
                        code: frame.as_ref().map(|f| f.code),
                        reason: frame
                            .map(|f| f.reason.to_string())
                            .unwrap_or_default(),
                    })
                    .await;
                return;
            }
            Ok(_) => continue,
            Err(e) => {
                let _ = tx.send(Inbound::Error(e.to_string())).await;
                return;
            }
        };
        if tx.send(event).await.is_err() {
            return;
        }
    }
}

struct WsTransport {
    protocol: Protocol,
    sender: SplitSink<WebSocket, Message>,
}

#[async_trait::async_trait]
impl Transport for WsTransport {
    fn protocol(&self) -> Protocol {
        self.protocol
    }

    async fn send(&mut self, msg: &ServerMessage) -> Result<(), TransportError> {
        let json =
            serde_json::to_string(msg).map_err(|e| TransportError::Send(e.to_string()))?;
        self.sender
            .send(Message::Text(json.into()))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn close(&mut self, code: u16, reason: &str) {
        let _ = self
            .sender
            .send(Message::Close(Some(CloseFrame {
                code,
                reason: reason.to_string().into(),
            })))
            .await;
    }
}
