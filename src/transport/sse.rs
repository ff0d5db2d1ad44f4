//! The sse protocol adapter at `/sse`: a unidirectional push stream.
//! Clients submit trading logs through the REST endpoint instead.

use axum::{
    extract::{ConnectInfo, Query, State},
    http::{HeaderMap, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
};
use futures::{stream, StreamExt};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use super::websocket::user_agent;
use super::{run_connection, ConnectQuery, HandshakeParams, Transport, TransportError};
use crate::protocol::ServerMessage;
use crate::state::AppState;
use crate::types::Protocol;

const RETRY_HINT: Duration = Duration::from_millis(10_000);

pub async fn sse_handler(
    Query(query): Query<ConnectQuery>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Response {
    let Some(token) = query.session_token.filter(|t| !t.trim().is_empty()) else {
        tracing::error!("SSE connection rejected: missing sessionToken");
        return (StatusCode::BAD_REQUEST, "Missing sessionToken").into_response();
    };

    let params = HandshakeParams {
        session_token: Some(token),
        ip: addr.ip().to_string(),
        user_agent: user_agent(&headers),
    };

    let (event_tx, event_rx) = mpsc::channel::<Event>(64);
    // SSE peers never send; the inbound side stays open but silent, so
    // the lifecycle only ends on send failure or shutdown.
    let (inbound_tx, inbound_rx) = mpsc::channel(1);
    tokio::spawn(async move {
        let _hold_inbound_open = inbound_tx;
        let transport = SseTransport {
            tx: Some(event_tx),
        };
        run_connection(transport, inbound_rx, params, state).await;
    });

    let events = stream::once(async {
        Ok::<_, Infallible>(Event::default().retry(RETRY_HINT))
    })
    .chain(stream::unfold(event_rx, |mut rx| async move {
        rx.recv().await.map(|event| (Ok(event), rx))
    }));

    Sse::new(events).keep_alive(KeepAlive::default()).into_response()
}

struct SseTransport {
    tx: Option<mpsc::Sender<Event>>,
}

#[async_trait::async_trait]
impl Transport for SseTransport {
    fn protocol(&self) -> Protocol {
        Protocol::Sse
    }

    async fn send(&mut self, msg: &ServerMessage) -> Result<(), TransportError> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| TransportError::Send("stream closed".to_string()))?;
        let json =
            serde_json::to_string(msg).map_err(|e| TransportError::Send(e.to_string()))?;
        // Ticks go out as plain data messages; everything else is named.
        let event = match msg.event_name() {
            Some(name) => Event::default().event(name).data(json),
            None => Event::default().data(json),
        };
        tx.send(event)
            .await
            .map_err(|_| TransportError::Send("client stream gone".to_string()))
    }

    async fn close(&mut self, _code: u16, _reason: &str) {
        // Dropping the sender ends the event stream.
        self.tx = None;
    }
}
