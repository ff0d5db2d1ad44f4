//! Socket-based protocol clients (websocket and channel) built on
//! tokio-tungstenite, with reconnect handled by the shared backoff loop.

use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use super::backoff::Backoff;
use super::{ClientState, Shared};
use crate::protocol::{ChannelFrame, ServerMessage};
use crate::types::Protocol;

#[derive(PartialEq)]
enum CloseKind {
    /// Stop flag flipped: no reconnect.
    Manual,
    /// Peer closed or transport error: reconnect with backoff.
    Lost,
}

pub(super) async fn run_socket_client(
    protocol: Protocol,
    shared: Arc<Shared>,
    mut stop: watch::Receiver<bool>,
) {
    let mut backoff = Backoff::new();
    let url = shared.config.socket_url(protocol);

    loop {
        shared.set_state(protocol, ClientState::Connecting).await;

        let connected = tokio::select! {
            result = connect_async(&url) => result,
            _ = stop.changed() => break,
        };

        match connected {
            Ok((stream, _response)) => {
                backoff.reset();
                shared.set_state(protocol, ClientState::Connected).await;

                let (mut sink, mut source) = stream.split();
                let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
                shared.register_outbound(protocol, out_tx);

                let close = loop {
                    tokio::select! {
                        _ = stop.changed() => {
                            let _ = sink.send(Message::Close(None)).await;
                            break CloseKind::Manual;
                        }
                        outgoing = out_rx.recv() => {
                            if let Some(text) = outgoing {
                                if sink.send(Message::text(text)).await.is_err() {
                                    break CloseKind::Lost;
                                }
                            }
                        }
                        frame = source.next() => match frame {
                            Some(Ok(Message::Text(text))) => {
                                if let Some(msg) = decode(protocol, text.as_str()) {
                                    shared.dispatch(protocol, msg).await;
                                }
                            }
                            Some(Ok(Message::Close(_))) | None => break CloseKind::Lost,
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                tracing::warn!("{} client read error: {}", protocol, e);
                                break CloseKind::Lost;
                            }
                        }
                    }
                };

                shared.clear_outbound(protocol);
                if close == CloseKind::Manual {
                    break;
                }
            }
            Err(e) => {
                tracing::warn!("{} client connect failed: {}", protocol, e);
            }
        }

        if *stop.borrow() {
            break;
        }
        let delay = backoff.next_delay();
        shared
            .set_state(
                protocol,
                ClientState::Backoff {
                    attempt: backoff.attempt(),
                },
            )
            .await;
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = stop.changed() => break,
        }
    }

    shared.set_state(protocol, ClientState::Disconnected).await;
}

/// Unwrap the per-protocol framing down to the common envelope.
fn decode(protocol: Protocol, text: &str) -> Option<ServerMessage> {
    let parsed = match protocol {
        Protocol::Channel => serde_json::from_str::<ChannelFrame>(text)
            .map_err(|e| e.to_string())
            .and_then(|frame| {
                serde_json::from_value::<ServerMessage>(frame.payload)
                    .map_err(|e| e.to_string())
            }),
        _ => serde_json::from_str::<ServerMessage>(text).map_err(|e| e.to_string()),
    };
    match parsed {
        Ok(msg) => Some(msg),
        Err(e) => {
            tracing::warn!("Discarding unparseable {} frame: {}", protocol, e);
            None
        }
    }
}
