use crate::types::*;
use serde::{Deserialize, Serialize};

/// Server-side lifecycle events carried inside `server_info` envelopes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ServerEvent {
    ServerStart,
    ServerShutdown,
    Connection,
    Disconnection,
    ConnectionError,
    ConnectionSuccess,
    UpgradeRejected,
}

/// Live-connection counts per protocol, reported on the health surface
/// and in the shutdown notice.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionCounts {
    pub websocket: usize,
    pub channel: usize,
    pub sse: usize,
}

/// Payload of a `server_info` envelope. Which fields are present depends
/// on the event; absent fields are omitted from the wire format.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerInfoData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client: Option<ClientInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime: Option<u64>,
    #[serde(rename = "activeConnections", skip_serializing_if = "Option::is_none")]
    pub active_connections: Option<ConnectionCounts>,
    #[serde(rename = "startTime", skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

impl ServerInfoData {
    pub fn connection(protocol: Protocol, client: ClientInfo) -> Self {
        Self {
            protocol: Some(protocol.display_name().to_string()),
            client: Some(client),
            ..Default::default()
        }
    }

    pub fn connection_success(protocol: Protocol, client: ClientInfo) -> Self {
        Self {
            message: Some(format!(
                "Successfully connected to {}",
                protocol.display_name()
            )),
            protocol: Some(protocol.display_name().to_string()),
            client: Some(client),
            ..Default::default()
        }
    }

    pub fn disconnection(
        protocol: Protocol,
        client: ClientInfo,
        code: Option<u16>,
        reason: String,
    ) -> Self {
        Self {
            protocol: Some(protocol.display_name().to_string()),
            client: Some(client),
            code,
            reason: Some(reason),
            ..Default::default()
        }
    }

    pub fn connection_error(protocol: Protocol, client: ClientInfo, error: String) -> Self {
        Self {
            protocol: Some(protocol.display_name().to_string()),
            client: Some(client),
            error: Some(error),
            ..Default::default()
        }
    }

    pub fn upgrade_rejected(ip: String, path: String) -> Self {
        Self {
            ip: Some(ip),
            path: Some(path),
            reason: Some("Unknown protocol or path".to_string()),
            ..Default::default()
        }
    }
}

/// Outbound message envelope, identical in meaning across all three
/// transports: `{type, eventType?, data, timestamp}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    ServerInfo {
        #[serde(rename = "eventType")]
        event_type: ServerEvent,
        data: ServerInfoData,
        timestamp: i64,
    },
    Tick {
        data: PriceTick,
        timestamp: i64,
    },
    TradingLog {
        data: TradingLogEntry,
        timestamp: i64,
    },
    TradingLogHistory {
        data: Vec<TradingLogEntry>,
        timestamp: i64,
    },
    Error {
        code: String,
        msg: String,
        #[serde(skip_serializing_if = "Vec::is_empty", default)]
        errors: Vec<FieldError>,
    },
}

impl ServerMessage {
    pub fn server_info(event_type: ServerEvent, data: ServerInfoData) -> Self {
        Self::ServerInfo {
            event_type,
            data,
            timestamp: now_millis(),
        }
    }

    pub fn tick(data: PriceTick) -> Self {
        Self::Tick {
            data,
            timestamp: now_millis(),
        }
    }

    pub fn trading_log(data: TradingLogEntry) -> Self {
        Self::TradingLog {
            data,
            timestamp: now_millis(),
        }
    }

    pub fn trading_log_history(data: Vec<TradingLogEntry>) -> Self {
        Self::TradingLogHistory {
            data,
            timestamp: now_millis(),
        }
    }

    /// Value of the `type` tag, used as the channel frame event name and
    /// the SSE event name. Ticks go out as plain SSE data messages.
    pub fn event_name(&self) -> Option<&'static str> {
        match self {
            ServerMessage::ServerInfo { .. } => Some("server_info"),
            ServerMessage::Tick { .. } => None,
            ServerMessage::TradingLog { .. } => Some("trading_log"),
            ServerMessage::TradingLogHistory { .. } => Some("trading_log_history"),
            ServerMessage::Error { .. } => Some("error"),
        }
    }
}

pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Inbound message on the websocket transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    TradingLog { data: TradingLogSubmission },
    TradingAction { data: TradingLogSubmission },
}

impl ClientMessage {
    pub fn into_submission(self) -> TradingLogSubmission {
        match self {
            ClientMessage::TradingLog { data } | ClientMessage::TradingAction { data } => data,
        }
    }
}

/// Multiplexed event frame used by the channel transport: one socket,
/// many named logical streams.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelFrame {
    pub event: String,
    pub payload: serde_json::Value,
}

impl ChannelFrame {
    pub fn from_server_message(msg: &ServerMessage) -> Self {
        Self {
            event: msg.event_name().unwrap_or("tick").to_string(),
            payload: serde_json::to_value(msg).unwrap_or_default(),
        }
    }
}

/// A single failed field in a trading-log submission.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

#[derive(Debug, thiserror::Error)]
#[error("validation failed: {errors:?}")]
pub struct ValidationError {
    pub errors: Vec<FieldError>,
}

/// Raw trading-log submission as received from a client, before
/// validation. Number-ish fields arrive as JSON numbers or numeric
/// strings depending on the client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TradingLogSubmission {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "userId", skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
}

fn numeric_value(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

impl TradingLogSubmission {
    /// Full validation, applied to the REST submission path: every field
    /// is required. Returns one error per failed field.
    pub fn validate_strict(&self) -> Result<(), ValidationError> {
        let mut errors = Vec::new();

        match self.user_id.as_deref() {
            Some(s) if !s.trim().is_empty() => {}
            _ => errors.push(FieldError {
                field: "userId".to_string(),
                message: "userId must be a non-empty string".to_string(),
            }),
        }
        if self.parsed_action().is_none() {
            errors.push(FieldError {
                field: "action".to_string(),
                message: "action must be one of: buy, sell".to_string(),
            });
        }
        match self.symbol.as_deref() {
            Some(s) if !s.trim().is_empty() => {}
            _ => errors.push(FieldError {
                field: "symbol".to_string(),
                message: "symbol must be a non-empty string".to_string(),
            }),
        }
        if self.amount.as_ref().and_then(numeric_value).is_none() {
            errors.push(FieldError {
                field: "amount".to_string(),
                message: "amount must be numeric".to_string(),
            });
        }
        if self.price.as_ref().and_then(numeric_value).is_none() {
            errors.push(FieldError {
                field: "price".to_string(),
                message: "price must be numeric".to_string(),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { errors })
        }
    }

    /// Socket-path validation: free-form log messages are allowed (the
    /// submission may be just `{text}`), but any field that is present
    /// must be well-formed.
    pub fn validate_lenient(&self) -> Result<(), ValidationError> {
        let mut errors = Vec::new();

        if self.action.is_some() && self.parsed_action().is_none() {
            errors.push(FieldError {
                field: "action".to_string(),
                message: "action must be one of: buy, sell".to_string(),
            });
        }
        if let Some(price) = &self.price {
            if numeric_value(price).is_none() {
                errors.push(FieldError {
                    field: "price".to_string(),
                    message: "price must be numeric".to_string(),
                });
            }
        }
        if let Some(amount) = &self.amount {
            if numeric_value(amount).is_none() {
                errors.push(FieldError {
                    field: "amount".to_string(),
                    message: "amount must be numeric".to_string(),
                });
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { errors })
        }
    }

    fn parsed_action(&self) -> Option<TradeAction> {
        match self.action.as_deref().map(str::trim) {
            Some("buy") => Some(TradeAction::Buy),
            Some("sell") => Some(TradeAction::Sell),
            _ => None,
        }
    }

    /// Build the relayed entry, stamping the sender from the resolved
    /// connection identity (never trusted from the payload).
    pub fn into_entry(self, sender: UserId, protocol: Protocol) -> TradingLogEntry {
        let trade_action = self.parsed_action();
        let price = self.price.as_ref().and_then(numeric_value);
        TradingLogEntry {
            id: self
                .id
                .unwrap_or_else(|| format!("msg_{}", ulid::Ulid::new())),
            sender,
            timestamp: chrono::Utc::now().to_rfc3339(),
            text: self.text,
            trade_action,
            method: Some(
                self.method
                    .unwrap_or_else(|| protocol.as_str().to_string()),
            ),
            price,
        }
    }
}
