//! Incremental server-sent-events parser for the sse protocol client.
//! Fed raw byte chunks from the HTTP response stream; yields complete
//! frames at blank-line boundaries.

use super::backoff::Backoff;
use super::{ClientState, Shared};
use crate::protocol::ServerMessage;
use crate::types::Protocol;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::watch;

/// Consume the push stream, reconnecting with backoff. The server's
/// `retry:` hint is advisory; the shared backoff policy governs here,
/// keeping all three protocol clients on the same reconnect behavior.
pub(super) async fn run_sse_client(shared: Arc<Shared>, mut stop: watch::Receiver<bool>) {
    let protocol = Protocol::Sse;
    let mut backoff = Backoff::new();
    let url = shared.config.sse_url();

    loop {
        shared.set_state(protocol, ClientState::Connecting).await;

        let response = tokio::select! {
            result = shared.http.get(&url).send() => {
                result.and_then(|r| r.error_for_status())
            }
            _ = stop.changed() => break,
        };

        match response {
            Ok(response) => {
                backoff.reset();
                shared.set_state(protocol, ClientState::Connected).await;

                let mut parser = SseParser::new();
                let mut body = response.bytes_stream();
                let manual = loop {
                    let chunk = tokio::select! {
                        chunk = body.next() => chunk,
                        _ = stop.changed() => break true,
                    };
                    match chunk {
                        Some(Ok(bytes)) => {
                            let text = String::from_utf8_lossy(&bytes).into_owned();
                            for frame in parser.push(&text) {
                                dispatch_frame(&shared, frame).await;
                            }
                        }
                        Some(Err(e)) => {
                            tracing::warn!("sse client read error: {}", e);
                            break false;
                        }
                        None => break false,
                    }
                };
                if manual {
                    break;
                }
            }
            Err(e) => {
                tracing::warn!("sse client connect failed: {}", e);
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

async fn dispatch_frame(shared: &Shared, frame: SseFrame) {
    // Every frame's data is a full envelope; the SSE event name is
    // only a routing convenience for browser EventSource listeners.
    match serde_json::from_str::<ServerMessage>(&frame.data) {
        Ok(msg) => shared.dispatch(Protocol::Sse, msg).await,
        Err(e) => tracing::warn!(
            "Discarding unparseable sse frame (event {:?}): {}",
            frame.event,
            e
        ),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    /// `event:` field, if the frame named one.
    pub event: Option<String>,
    /// Joined `data:` lines.
    pub data: String,
}

#[derive(Debug, Default)]
pub struct SseParser {
    buffer: String,
    event: Option<String>,
    data: Vec<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk; returns any frames completed by it.
    pub fn push(&mut self, chunk: &str) -> Vec<SseFrame> {
        self.buffer.push_str(chunk);
        let mut frames = Vec::new();

        while let Some(newline) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=newline).collect();
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if !self.data.is_empty() {
                    frames.push(SseFrame {
                        event: self.event.take(),
                        data: self.data.join("\n"),
                    });
                }
                self.event = None;
                self.data.clear();
            } else if let Some(value) = field_value(line, "event") {
                self.event = Some(value.to_string());
            } else if let Some(value) = field_value(line, "data") {
                self.data.push(value.to_string());
            }
            // retry: hints and comment lines are ignored.
        }

        frames
    }
}

fn field_value<'a>(line: &'a str, field: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(field)?;
    let rest = rest.strip_prefix(':')?;
    Some(rest.strip_prefix(' ').unwrap_or(rest))
}
