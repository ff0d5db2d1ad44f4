//! The channel protocol adapter at `/channel`: a multiplexed
//! socket-library style transport where every message is an event-named
//! frame `{"event": <name>, "payload": <json>}` over one socket.

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

use super::websocket::user_agent;
use super::{
    run_connection, ConnectQuery, HandshakeParams, Inbound, Transport, TransportError,
};
use crate::protocol::{ChannelFrame, ServerMessage, TradingLogSubmission};
use crate::state::AppState;
use crate::types::Protocol;

pub async fn channel_handler(
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

async fn handle_socket(socket: WebSocket, params: HandshakeParams, state: Arc<AppState>) {
    let (sender, receiver) = socket.split();
    let (inbound_tx, inbound_rx) = mpsc::channel(32);

    let reader = tokio::spawn(read_loop(receiver, inbound_tx));

    let transport = ChannelTransport { sender };
    run_connection(transport, inbound_rx, params, state).await;

    reader.abort();
}

async fn read_loop(mut receiver: SplitStream<WebSocket>, tx: mpsc::Sender<Inbound>) {
    while let Some(frame) = receiver.next().await {
        let event = match frame {
            Ok(Message::Text(text)) => match serde_json::from_str::<ChannelFrame>(&text) {
                Ok(frame) => match frame.event.as_str() {
                    "trading_log" | "trading_action" => {
                        match serde_json::from_value::<TradingLogSubmission>(frame.payload) {
                            Ok(submission) => Inbound::Submission(submission),
                            Err(e) => Inbound::ParseError(e.to_string()),
                        }
                    }
                    other => {
                        tracing::debug!("Ignoring unknown channel event: {}", other);
                        continue;
                    }
                },
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

struct ChannelTransport {
    sender: SplitSink<WebSocket, Message>,
}

#[async_trait::async_trait]
impl Transport for ChannelTransport {
    fn protocol(&self) -> Protocol {
        Protocol::Channel
    }

    async fn send(&mut self, msg: &ServerMessage) -> Result<(), TransportError> {
        let frame = ChannelFrame::from_server_message(msg);
        let json =
            serde_json::to_string(&frame).map_err(|e| TransportError::Send(e.to_string()))?;
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
