//! Broadcast hub: fans out server notifications, price ticks, and
//! trading-log relays to the live connection sets.
//!
//! The hub receives the connection registries and the history buffer at
//! construction; protocol adapters and background tasks share one hub
//! instance instead of reaching into globals.

use crate::history::HistoryBuffer;
use crate::protocol::{ServerEvent, ServerInfoData, ServerMessage};
use crate::registry::{ConnectionEntry, ConnectionRegistries};
use crate::types::{PriceTick, Protocol, TradingLogEntry};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct BroadcastHub {
    registries: Arc<ConnectionRegistries>,
    history: Arc<HistoryBuffer>,
}

impl BroadcastHub {
    pub fn new(registries: Arc<ConnectionRegistries>, history: Arc<HistoryBuffer>) -> Self {
        Self {
            registries,
            history,
        }
    }

    /// Server notification, delivered to every connection of every
    /// protocol, or filtered to one protocol. There is no sender here,
    /// so nothing is excluded.
    pub fn server_info(&self, event: ServerEvent, data: ServerInfoData, protocol: Option<Protocol>) {
        let msg = ServerMessage::server_info(event, data);
        match protocol {
            Some(protocol) => self.deliver(protocol, &msg, None),
            None => {
                for protocol in Protocol::ALL {
                    self.deliver(protocol, &msg, None);
                }
            }
        }
    }

    /// Price tick, delivered only to the owning protocol's connections.
    pub fn tick(&self, protocol: Protocol, tick: PriceTick) {
        self.deliver(protocol, &ServerMessage::tick(tick), None);
    }

    /// Relay an accepted trading-log entry to every *other* live
    /// connection on the protocol it arrived on, then append it to
    /// history. Never crosses protocols; never echoes to any connection
    /// owned by the sender.
    pub fn relay_trading_log(&self, entry: TradingLogEntry, protocol: Protocol) {
        let msg = ServerMessage::trading_log(entry.clone());
        let sender = entry.sender.clone();
        // Relay and append under the history lock, so replays handed to
        // concurrently joining connections partition the stream exactly.
        self.history.with_lock(|entries| {
            self.deliver(protocol, &msg, Some(&sender));
            HistoryBuffer::push_bounded(entries, entry);
        });
    }

    /// Atomically register a connection and take the history snapshot it
    /// must be handed before any live relay traffic reaches it.
    pub fn register_for_replay(
        &self,
        protocol: Protocol,
        key: String,
        entry: ConnectionEntry,
    ) -> Vec<TradingLogEntry> {
        self.history.with_lock(|entries| {
            self.registries.get(protocol).register(key, entry);
            entries.iter().cloned().collect()
        })
    }

    pub fn registries(&self) -> &ConnectionRegistries {
        &self.registries
    }

    pub fn history(&self) -> &HistoryBuffer {
        &self.history
    }

    fn deliver(&self, protocol: Protocol, msg: &ServerMessage, exclude_user: Option<&str>) {
        let registry = self.registries.get(protocol);
        for (key, connection) in registry.snapshot() {
            if exclude_user.is_some_and(|user| connection.info.id == user) {
                continue;
            }
            if connection.tx.send(msg.clone()).is_err() {
                tracing::warn!(
                    "Dropped {} delivery to user {} (connection {} gone)",
                    protocol,
                    connection.info.id,
                    key
                );
                // A dead push-stream recipient can never recover; reap it
                // here instead of waiting for its task to notice.
                if protocol == Protocol::Sse {
                    registry.unregister(&key);
                }
            }
        }
    }
}
