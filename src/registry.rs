//! Per-protocol registries of live connections.

use crate::protocol::{ConnectionCounts, ServerMessage};
use crate::types::{ClientInfo, ConnectionId, Protocol};
use std::collections::HashMap;
use std::sync::RwLock;
use tokio::sync::mpsc;

/// One live connection: resolved identity plus the outbound handle its
/// transport task drains.
#[derive(Debug, Clone)]
pub struct ConnectionEntry {
    pub info: ClientInfo,
    pub tx: mpsc::UnboundedSender<ServerMessage>,
}

/// Keyed collection of live connections for a single protocol.
///
/// Iteration is snapshot-based: fan-out clones the current entry set
/// under the read lock, so concurrent removal never panics and no
/// connection is observed twice within one delivery.
#[derive(Debug)]
pub struct ConnectionRegistry {
    protocol: Protocol,
    connections: RwLock<HashMap<ConnectionId, ConnectionEntry>>,
}

impl ConnectionRegistry {
    pub fn new(protocol: Protocol) -> Self {
        Self {
            protocol,
            connections: RwLock::new(HashMap::new()),
        }
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn register(&self, key: ConnectionId, entry: ConnectionEntry) {
        self.connections
            .write()
            .expect("connection registry poisoned")
            .insert(key, entry);
    }

    /// Remove a connection, returning its metadata if it was present.
    pub fn unregister(&self, key: &str) -> Option<ConnectionEntry> {
        self.connections
            .write()
            .expect("connection registry poisoned")
            .remove(key)
    }

    pub fn lookup(&self, key: &str) -> Option<ConnectionEntry> {
        self.connections
            .read()
            .expect("connection registry poisoned")
            .get(key)
            .cloned()
    }

    pub fn count(&self) -> usize {
        self.connections
            .read()
            .expect("connection registry poisoned")
            .len()
    }

    pub fn snapshot(&self) -> Vec<(ConnectionId, ConnectionEntry)> {
        self.connections
            .read()
            .expect("connection registry poisoned")
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// The three per-protocol registries, constructed once and injected by
/// reference into each protocol adapter and the broadcast hub.
#[derive(Debug)]
pub struct ConnectionRegistries {
    websocket: ConnectionRegistry,
    channel: ConnectionRegistry,
    sse: ConnectionRegistry,
}

impl Default for ConnectionRegistries {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistries {
    pub fn new() -> Self {
        Self {
            websocket: ConnectionRegistry::new(Protocol::Websocket),
            channel: ConnectionRegistry::new(Protocol::Channel),
            sse: ConnectionRegistry::new(Protocol::Sse),
        }
    }

    pub fn get(&self, protocol: Protocol) -> &ConnectionRegistry {
        match protocol {
            Protocol::Websocket => &self.websocket,
            Protocol::Channel => &self.channel,
            Protocol::Sse => &self.sse,
        }
    }

    pub fn counts(&self) -> ConnectionCounts {
        ConnectionCounts {
            websocket: self.websocket.count(),
            channel: self.channel.count(),
            sse: self.sse.count(),
        }
    }
}
