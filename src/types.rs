use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque ID types for type safety
pub type UserId = String;
pub type SessionToken = String;
pub type ConnectionId = String;

/// The three independently-operated realtime transports.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Websocket,
    Channel,
    Sse,
}

impl Protocol {
    pub const ALL: [Protocol; 3] = [Protocol::Websocket, Protocol::Channel, Protocol::Sse];

    /// Wire/registry key, matching the serde representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Websocket => "websocket",
            Protocol::Channel => "channel",
            Protocol::Sse => "sse",
        }
    }

    /// Human-readable name used in server_info payloads and logs.
    pub fn display_name(&self) -> &'static str {
        match self {
            Protocol::Websocket => "WebSocket",
            Protocol::Channel => "Channel",
            Protocol::Sse => "SSE",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
}

/// Stable identity behind a session token, surviving reconnects.
///
/// Created on first sighting of a token on any protocol. The very first
/// session ever created process-wide is granted `Admin`, permanently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserSession {
    pub user_id: UserId,
    pub role: Role,
    pub first_seen: String,
    pub last_ip: String,
}

/// Metadata for one live connection, always backed by a resolved session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    pub id: UserId,
    pub role: Role,
    #[serde(rename = "sessionToken")]
    pub session_token: SessionToken,
    pub ip: String,
    #[serde(rename = "connectedAt")]
    pub connected_at: String,
    #[serde(rename = "userAgent", skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TradeAction {
    Buy,
    Sell,
}

/// A user-submitted trading log event, relayed to other participants.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TradingLogEntry {
    pub id: String,
    pub sender: UserId,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(rename = "tradeAction", skip_serializing_if = "Option::is_none")]
    pub trade_action: Option<TradeAction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
}

/// Per-protocol simulated instrument driving the price tick stream.
#[derive(Debug, Clone)]
pub struct Instrument {
    pub price: f64,
    pub color: &'static str,
    pub name: &'static str,
}

impl Instrument {
    pub fn for_protocol(protocol: Protocol) -> Self {
        match protocol {
            Protocol::Websocket => Self {
                price: 80.0,
                color: "#3b82f6",
                name: "WebSocket",
            },
            Protocol::Channel => Self {
                price: 90.0,
                color: "#8b5cf6",
                name: "Channel",
            },
            Protocol::Sse => Self {
                price: 100.0,
                color: "#ec4899",
                name: "SSE",
            },
        }
    }
}

/// One price observation broadcast to the owning protocol's connections.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceTick {
    pub stock: Protocol,
    pub price: f64,
    pub color: String,
    pub name: String,
    pub timestamp: i64,
}
