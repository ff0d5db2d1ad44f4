//! Connection lifecycle shared by all three protocol adapters.
//!
//! Each adapter supplies a [`Transport`] (how bytes leave the process)
//! and a stream of [`Inbound`] events (what the peer did); the lifecycle
//! routine here owns handshake, registration, history replay, relay
//! dispatch, and teardown, so the per-protocol code stays thin.

pub mod channel;
pub mod sse;
pub mod websocket;

use crate::protocol::{ServerEvent, ServerInfoData, ServerMessage, TradingLogSubmission};
use crate::registry::ConnectionEntry;
use crate::state::AppState;
use crate::types::{ClientInfo, Protocol};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Outbound capability of one physical connection.
#[async_trait]
pub trait Transport: Send {
    fn protocol(&self) -> Protocol;
    async fn send(&mut self, msg: &ServerMessage) -> Result<(), TransportError>;
    async fn close(&mut self, code: u16, reason: &str);
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("send failed: {0}")]
    Send(String),
}

/// Inbound events surfaced by a protocol adapter.
#[derive(Debug)]
pub enum Inbound {
    /// A parsed trading-log submission.
    Submission(TradingLogSubmission),
    /// The peer sent something unparseable. Connection stays open.
    ParseError(String),
    /// Transport-level error. Connection stays open until `Closed`.
    Error(String),
    /// The peer closed the connection.
    Closed { code: Option<u16>, reason: String },
}

/// Connection handshake inputs, extracted by each adapter.
#[derive(Debug, Clone)]
pub struct HandshakeParams {
    pub session_token: Option<String>,
    pub ip: String,
    pub user_agent: Option<String>,
}

/// Query parameters accepted by all three endpoints.
#[derive(Debug, Deserialize)]
pub struct ConnectQuery {
    #[serde(rename = "sessionToken")]
    pub session_token: Option<String>,
}

/// Explicit connection states. `Rejected` and `Closed` are terminal;
/// only `Registered` connections ever appear in a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    Unauthenticated,
    Rejected,
    Registered,
    Closed,
}

/// Drive one connection from handshake to teardown. Returns the terminal
/// phase (useful in tests).
pub async fn run_connection<T: Transport>(
    mut transport: T,
    mut inbound: mpsc::Receiver<Inbound>,
    params: HandshakeParams,
    state: Arc<AppState>,
) -> ConnectionPhase {
    let protocol = transport.protocol();

    let Some(token) = params
        .session_token
        .as_deref()
        .filter(|t| !t.trim().is_empty())
    else {
        tracing::error!(
            "{} connection rejected: missing sessionToken from {}",
            protocol.display_name(),
            params.ip
        );
        transport.close(1008, "Missing sessionToken").await;
        return ConnectionPhase::Rejected;
    };

    if state.is_shutting_down() {
        transport.close(1001, "Server shutting down").await;
        return ConnectionPhase::Rejected;
    }

    // Synchronous resolve: the admin check-and-set must not span an await.
    let session = state.sessions.resolve(token, &params.ip);
    let info = ClientInfo {
        id: session.user_id.clone(),
        role: session.role,
        session_token: token.to_string(),
        ip: params.ip.clone(),
        connected_at: chrono::Utc::now().to_rfc3339(),
        user_agent: params.user_agent.clone(),
    };

    let connection_id = ulid::Ulid::new().to_string();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let replay = state.hub.register_for_replay(
        protocol,
        connection_id.clone(),
        ConnectionEntry {
            info: info.clone(),
            tx,
        },
    );

    tracing::info!(
        "Client connected via {}: user {} (role: {:?}, session: {}) from {}",
        protocol.display_name(),
        info.id,
        info.role,
        token,
        params.ip
    );
    state.hub.server_info(
        ServerEvent::Connection,
        ServerInfoData::connection(protocol, info.clone()),
        Some(protocol),
    );

    let welcome = ServerMessage::server_info(
        ServerEvent::ConnectionSuccess,
        ServerInfoData::connection_success(protocol, info.clone()),
    );
    if let Err(e) = transport.send(&welcome).await {
        tracing::error!(
            "Error sending welcome message to {} user {}: {}",
            protocol.display_name(),
            info.id,
            e
        );
    }

    // Replay before draining the live feed: anything relayed after
    // registration is waiting in `rx`, anything before is in `replay`.
    if !replay.is_empty() {
        if let Err(e) = transport
            .send(&ServerMessage::trading_log_history(replay))
            .await
        {
            tracing::error!(
                "Error sending trading log history to user {}: {}",
                info.id,
                e
            );
        }
    }

    let mut shutdown = state.shutdown_signal();
    let (close_code, close_reason) = loop {
        tokio::select! {
            outbound = rx.recv() => {
                match outbound {
                    Some(msg) => {
                        if transport.send(&msg).await.is_err() {
                            break (None, "send failure".to_string());
                        }
                    }
                    // Registry entry dropped out from under us (sse reap).
                    None => break (None, "connection reaped".to_string()),
                }
            }
            event = inbound.recv() => {
                match event {
                    Some(Inbound::Submission(submission)) => {
                        handle_submission(submission, &info.id, protocol, &state, &mut transport)
                            .await;
                    }
                    Some(Inbound::ParseError(err)) => {
                        tracing::error!(
                            "Error handling {} message from user {}: {}",
                            protocol.display_name(),
                            info.id,
                            err
                        );
                        let _ = transport
                            .send(&ServerMessage::Error {
                                code: "PARSE_ERROR".to_string(),
                                msg: format!("Invalid message format: {err}"),
                                errors: vec![],
                            })
                            .await;
                    }
                    Some(Inbound::Error(err)) => {
                        tracing::error!(
                            "{} error for user {}: {}",
                            protocol.display_name(),
                            info.id,
                            err
                        );
                        state.hub.server_info(
                            ServerEvent::ConnectionError,
                            ServerInfoData::connection_error(protocol, info.clone(), err),
                            Some(protocol),
                        );
                    }
                    Some(Inbound::Closed { code, reason }) => break (code, reason),
                    None => break (None, "peer gone".to_string()),
                }
            }
            _ = shutdown.changed() => {
                transport.close(1001, "Server shutting down").await;
                break (Some(1001), "server shutdown".to_string());
            }
        }
    };

    if let Some(removed) = state.registries.get(protocol).unregister(&connection_id) {
        tracing::info!(
            "Client disconnected from {}: user {} (session: {}), code: {:?}, reason: {}",
            protocol.display_name(),
            removed.info.id,
            removed.info.session_token,
            close_code,
            if close_reason.is_empty() {
                "No reason provided"
            } else {
                &close_reason
            }
        );
        state.hub.server_info(
            ServerEvent::Disconnection,
            ServerInfoData::disconnection(protocol, removed.info, close_code, close_reason),
            Some(protocol),
        );
    }

    ConnectionPhase::Closed
}

async fn handle_submission<T: Transport>(
    submission: TradingLogSubmission,
    user_id: &str,
    protocol: Protocol,
    state: &AppState,
    transport: &mut T,
) {
    match submission.validate_lenient() {
        Ok(()) => {
            let entry = submission.into_entry(user_id.to_string(), protocol);
            state.hub.relay_trading_log(entry, protocol);
        }
        Err(e) => {
            tracing::warn!(
                "Rejected trading log from user {} on {}: {}",
                user_id,
                protocol,
                e
            );
            let _ = transport
                .send(&ServerMessage::Error {
                    code: "VALIDATION_FAILED".to_string(),
                    msg: "Trading log rejected".to_string(),
                    errors: e.errors,
                })
                .await;
        }
    }
}
