//! HTTP surface: health check, service info, and the REST trading-log
//! submission path used by sse clients.

use axum::{
    extract::{ConnectInfo, State},
    http::{HeaderMap, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::protocol::{ConnectionCounts, FieldError, ServerEvent, ServerInfoData, TradingLogSubmission};
use crate::state::AppState;
use crate::types::Protocol;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: String,
    pub connections: ConnectionCounts,
    pub uptime: u64,
}

/// GET /health: live-connection counts per protocol and process uptime.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "UP",
        timestamp: chrono::Utc::now().to_rfc3339(),
        connections: state.registries.counts(),
        uptime: state.uptime_secs(),
    })
}

#[derive(Debug, Serialize)]
pub struct InfoResponse {
    pub message: &'static str,
    pub endpoints: Endpoints,
    #[serde(rename = "serverStartTime")]
    pub server_start_time: String,
    pub uptime: u64,
}

#[derive(Debug, Serialize)]
pub struct Endpoints {
    pub websocket: &'static str,
    pub channel: &'static str,
    pub sse: &'static str,
    pub health: &'static str,
}

pub const ENDPOINTS: Endpoints = Endpoints {
    websocket: "/websocket",
    channel: "/channel",
    sse: "/sse",
    health: "/health",
};

/// GET /: service info.
pub async fn info(State(state): State<Arc<AppState>>) -> Json<InfoResponse> {
    Json(InfoResponse {
        message: "tickerhub realtime API",
        endpoints: ENDPOINTS,
        server_start_time: state.started_at.to_rfc3339(),
        uptime: state.uptime_secs(),
    })
}

#[derive(Debug, Serialize)]
struct ValidationErrorResponse {
    error: &'static str,
    #[serde(rename = "validationErrors")]
    validation_errors: Vec<FieldError>,
}

#[derive(Debug, Serialize)]
struct TradingLogAccepted {
    status: &'static str,
    id: String,
}

/// POST /api/trading-log: submission path for sse clients, which have
/// no upstream channel of their own. Full field validation applies here.
pub async fn post_trading_log(
    State(state): State<Arc<AppState>>,
    Json(submission): Json<TradingLogSubmission>,
) -> Response {
    if let Err(e) = submission.validate_strict() {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ValidationErrorResponse {
                error: "Validation failed",
                validation_errors: e.errors,
            }),
        )
            .into_response();
    }

    // REST carries no connection identity; the validated userId field is
    // the sender. Relays stay on the protocol named by the submission,
    // defaulting to the push stream this path exists for.
    let sender = submission.user_id.clone().unwrap_or_default();
    let protocol = match submission.method.as_deref() {
        Some("websocket") => Protocol::Websocket,
        Some("channel") => Protocol::Channel,
        _ => Protocol::Sse,
    };
    let entry = submission.into_entry(sender, protocol);
    let id = entry.id.clone();
    state.hub.relay_trading_log(entry, protocol);

    (
        StatusCode::OK,
        Json(TradingLogAccepted {
            status: "received",
            id,
        }),
    )
        .into_response()
}

/// Fallback for unknown paths. Upgrade attempts against paths we do not
/// serve are announced to all connected clients so operators can spot
/// misconfigured consumers.
pub async fn fallback(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    uri: Uri,
) -> impl IntoResponse {
    if headers.contains_key(axum::http::header::UPGRADE) {
        tracing::warn!(
            "Rejecting upgrade for unknown path {} from {}",
            uri.path(),
            addr.ip()
        );
        state.hub.server_info(
            ServerEvent::UpgradeRejected,
            ServerInfoData::upgrade_rejected(addr.ip().to_string(), uri.path().to_string()),
            None,
        );
    }
    StatusCode::NOT_FOUND
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::registry::ConnectionEntry;
    use crate::types::{ClientInfo, Role};
    use tokio::sync::mpsc;

    fn state_with_sse_peer(
        user: &str,
    ) -> (Arc<AppState>, mpsc::UnboundedReceiver<crate::protocol::ServerMessage>) {
        let state = Arc::new(AppState::new(Config::default()));
        let (tx, rx) = mpsc::unbounded_channel();
        state.registries.get(Protocol::Sse).register(
            "peer".to_string(),
            ConnectionEntry {
                info: ClientInfo {
                    id: user.to_string(),
                    role: Role::User,
                    session_token: format!("token-{user}"),
                    ip: "127.0.0.1".to_string(),
                    connected_at: chrono::Utc::now().to_rfc3339(),
                    user_agent: None,
                },
                tx,
            },
        );
        (state, rx)
    }

    fn submission(user: &str) -> TradingLogSubmission {
        TradingLogSubmission {
            user_id: Some(user.to_string()),
            action: Some("buy".to_string()),
            symbol: Some("SSE".to_string()),
            amount: Some(serde_json::json!(1)),
            price: Some(serde_json::json!(100.5)),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn rest_submission_relays_on_sse_and_appends_history() {
        let (state, mut peer_rx) = state_with_sse_peer("user_2");

        let response =
            post_trading_log(State(state.clone()), Json(submission("user_1"))).await;
        assert_eq!(response.status(), StatusCode::OK);

        match peer_rx.try_recv().unwrap() {
            crate::protocol::ServerMessage::TradingLog { data, .. } => {
                assert_eq!(data.sender, "user_1");
                assert_eq!(data.method.as_deref(), Some("sse"));
            }
            other => panic!("expected trading_log, got {other:?}"),
        }
        assert_eq!(state.history.len(), 1);
    }

    #[tokio::test]
    async fn rest_submission_never_echoes_to_sender() {
        let (state, mut peer_rx) = state_with_sse_peer("user_1");

        post_trading_log(State(state.clone()), Json(submission("user_1"))).await;

        assert!(peer_rx.try_recv().is_err());
        // Still accepted into history even with no recipients.
        assert_eq!(state.history.len(), 1);
    }

    #[tokio::test]
    async fn invalid_rest_submission_is_422_and_not_relayed() {
        let (state, mut peer_rx) = state_with_sse_peer("user_2");

        let response = post_trading_log(
            State(state.clone()),
            Json(TradingLogSubmission::default()),
        )
        .await;

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert!(peer_rx.try_recv().is_err());
        assert_eq!(state.history.len(), 0);
    }

    #[tokio::test]
    async fn health_reports_counts_and_uptime() {
        let (state, _peer_rx) = state_with_sse_peer("user_1");
        let Json(body) = health(State(state)).await;
        assert_eq!(body.status, "UP");
        assert_eq!(body.connections.sse, 1);
        assert_eq!(body.connections.websocket, 0);
    }
}
