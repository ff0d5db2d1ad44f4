//! Consumer-side connection manager: one optional logical connection per
//! protocol, reconnect with exponential backoff, replay deduplication,
//! and per-protocol transaction counters.

pub mod backoff;
pub mod dedup;
mod sse;
mod ws;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::protocol::{ChannelFrame, ServerEvent, ServerInfoData, ServerMessage, TradingLogSubmission};
use crate::types::Protocol;
use dedup::DedupSet;

/// Connection status of one protocol, surfaced to the host application
/// as information, never as a fatal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Disconnected,
    Connecting,
    Connected,
    Backoff { attempt: u32 },
}

/// Callbacks for inbound traffic and connection status.
#[async_trait]
pub trait ClientEvents: Send + Sync {
    async fn on_tick(&self, protocol: Protocol, tick: crate::types::PriceTick) {
        let _ = (protocol, tick);
    }
    async fn on_trading_log(&self, protocol: Protocol, entry: crate::types::TradingLogEntry) {
        let _ = (protocol, entry);
    }
    async fn on_server_info(&self, protocol: Protocol, event: ServerEvent, data: ServerInfoData) {
        let _ = (protocol, event, data);
    }
    async fn on_state_change(&self, protocol: Protocol, state: ClientState) {
        let _ = (protocol, state);
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// HTTP base of the hub, e.g. `http://localhost:3000`.
    pub base_url: String,
    /// Opaque token identifying this client across reconnects.
    pub session_token: String,
}

impl ClientConfig {
    pub fn socket_url(&self, protocol: Protocol) -> String {
        let ws_base = self
            .base_url
            .replacen("http://", "ws://", 1)
            .replacen("https://", "wss://", 1);
        format!(
            "{}/{}?sessionToken={}",
            ws_base.trim_end_matches('/'),
            protocol.as_str(),
            self.session_token
        )
    }

    pub fn sse_url(&self) -> String {
        format!(
            "{}/sse?sessionToken={}",
            self.base_url.trim_end_matches('/'),
            self.session_token
        )
    }

    pub fn trading_log_url(&self) -> String {
        format!("{}/api/trading-log", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("no protocol is currently connected")]
    NotConnected,
    #[error("http submission failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("encode failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// State shared between the manager handle and the protocol tasks.
pub(crate) struct Shared {
    pub(crate) config: ClientConfig,
    pub(crate) http: reqwest::Client,
    events: Arc<dyn ClientEvents>,
    dedup: Mutex<DedupSet>,
    states: Mutex<HashMap<Protocol, ClientState>>,
    counters: Mutex<HashMap<Protocol, u64>>,
    outbound: Mutex<HashMap<Protocol, tokio::sync::mpsc::UnboundedSender<String>>>,
}

impl Shared {
    pub(crate) async fn set_state(&self, protocol: Protocol, state: ClientState) {
        {
            let mut states = self.states.lock().expect("client states poisoned");
            if states.get(&protocol) == Some(&state) {
                return;
            }
            states.insert(protocol, state);
        }
        self.events.on_state_change(protocol, state).await;
    }

    pub(crate) async fn dispatch(&self, protocol: Protocol, msg: ServerMessage) {
        match msg {
            ServerMessage::Tick { data, .. } => self.events.on_tick(protocol, data).await,
            ServerMessage::TradingLog { data, .. } => {
                let fresh = self
                    .dedup
                    .lock()
                    .expect("dedup set poisoned")
                    .insert(&data.id);
                if fresh {
                    self.events.on_trading_log(protocol, data).await;
                }
            }
            ServerMessage::TradingLogHistory { data, .. } => {
                for entry in data {
                    let fresh = self
                        .dedup
                        .lock()
                        .expect("dedup set poisoned")
                        .insert(&entry.id);
                    if fresh {
                        self.events.on_trading_log(protocol, entry).await;
                    }
                }
            }
            ServerMessage::ServerInfo {
                event_type, data, ..
            } => self.events.on_server_info(protocol, event_type, data).await,
            ServerMessage::Error { code, msg, errors } => {
                tracing::warn!(
                    "Server error on {}: {} {} {:?}",
                    protocol,
                    code,
                    msg,
                    errors
                );
            }
        }
    }

    pub(crate) fn register_outbound(
        &self,
        protocol: Protocol,
        tx: tokio::sync::mpsc::UnboundedSender<String>,
    ) {
        self.outbound
            .lock()
            .expect("outbound map poisoned")
            .insert(protocol, tx);
    }

    pub(crate) fn clear_outbound(&self, protocol: Protocol) {
        self.outbound
            .lock()
            .expect("outbound map poisoned")
            .remove(&protocol);
    }
}

struct ProtocolTask {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Owns up to one logical connection per protocol.
pub struct ConnectionManager {
    shared: Arc<Shared>,
    tasks: Mutex<HashMap<Protocol, ProtocolTask>>,
}

impl ConnectionManager {
    pub fn new(config: ClientConfig, events: Arc<dyn ClientEvents>) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                http: reqwest::Client::new(),
                events,
                dedup: Mutex::new(DedupSet::new()),
                states: Mutex::new(HashMap::new()),
                counters: Mutex::new(HashMap::new()),
                outbound: Mutex::new(HashMap::new()),
            }),
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Start (or restart) the logical connection for one protocol.
    pub fn enable(&self, protocol: Protocol) {
        let mut tasks = self.tasks.lock().expect("task map poisoned");
        if let Some(task) = tasks.get(&protocol) {
            if !task.handle.is_finished() {
                return;
            }
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let shared = self.shared.clone();
        let handle = match protocol {
            Protocol::Websocket | Protocol::Channel => {
                tokio::spawn(ws::run_socket_client(protocol, shared, stop_rx))
            }
            Protocol::Sse => tokio::spawn(sse::run_sse_client(shared, stop_rx)),
        };
        tasks.insert(
            protocol,
            ProtocolTask {
                stop: stop_tx,
                handle,
            },
        );
    }

    /// Manually close one protocol. Cancels any pending reconnect timer,
    /// resets backoff (the next enable starts fresh) and zeroes the
    /// protocol's transaction counter.
    pub fn disable(&self, protocol: Protocol) {
        if let Some(task) = self
            .tasks
            .lock()
            .expect("task map poisoned")
            .remove(&protocol)
        {
            let _ = task.stop.send(true);
        }
        self.shared
            .counters
            .lock()
            .expect("counter map poisoned")
            .insert(protocol, 0);
    }

    /// Close all three protocols and cancel every pending timer.
    pub fn shutdown(&self) {
        for protocol in Protocol::ALL {
            self.disable(protocol);
        }
    }

    pub fn state(&self, protocol: Protocol) -> ClientState {
        self.shared
            .states
            .lock()
            .expect("client states poisoned")
            .get(&protocol)
            .copied()
            .unwrap_or(ClientState::Disconnected)
    }

    pub fn transaction_count(&self, protocol: Protocol) -> u64 {
        self.shared
            .counters
            .lock()
            .expect("counter map poisoned")
            .get(&protocol)
            .copied()
            .unwrap_or(0)
    }

    fn active_protocol(&self) -> Option<Protocol> {
        // Submission preference mirrors the original dashboard: the
        // multiplexed channel first, then websocket, then the REST path.
        [Protocol::Channel, Protocol::Websocket, Protocol::Sse]
            .into_iter()
            .find(|p| self.state(*p) == ClientState::Connected)
    }

    /// Submit a trading log over the first connected protocol.
    pub async fn send_trading_log(
        &self,
        mut submission: TradingLogSubmission,
    ) -> Result<Protocol, ClientError> {
        let protocol = self.active_protocol().ok_or(ClientError::NotConnected)?;
        if submission.id.is_none() {
            submission.id = Some(format!("msg_{}", ulid::Ulid::new()));
        }
        submission.method = Some(protocol.as_str().to_string());

        match protocol {
            Protocol::Websocket => {
                let text = serde_json::to_string(&crate::protocol::ClientMessage::TradingLog {
                    data: submission,
                })?;
                self.send_raw(protocol, text)?;
            }
            Protocol::Channel => {
                let frame = ChannelFrame {
                    event: "trading_log".to_string(),
                    payload: serde_json::to_value(&submission)?,
                };
                self.send_raw(protocol, serde_json::to_string(&frame)?)?;
            }
            Protocol::Sse => {
                self.shared
                    .http
                    .post(self.shared.config.trading_log_url())
                    .json(&submission)
                    .send()
                    .await?
                    .error_for_status()?;
            }
        }

        *self
            .shared
            .counters
            .lock()
            .expect("counter map poisoned")
            .entry(protocol)
            .or_insert(0) += 1;
        Ok(protocol)
    }

    fn send_raw(&self, protocol: Protocol, text: String) -> Result<(), ClientError> {
        let outbound = self.shared.outbound.lock().expect("outbound map poisoned");
        match outbound.get(&protocol) {
            Some(tx) if tx.send(text).is_ok() => Ok(()),
            _ => Err(ClientError::NotConnected),
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PriceTick, TradingLogEntry};

    #[derive(Default)]
    struct Recorder {
        logs: Mutex<Vec<(Protocol, String)>>,
        ticks: Mutex<Vec<f64>>,
        states: Mutex<Vec<(Protocol, ClientState)>>,
    }

    #[async_trait]
    impl ClientEvents for Recorder {
        async fn on_tick(&self, _protocol: Protocol, tick: PriceTick) {
            self.ticks.lock().unwrap().push(tick.price);
        }
        async fn on_trading_log(&self, protocol: Protocol, entry: TradingLogEntry) {
            self.logs.lock().unwrap().push((protocol, entry.id));
        }
        async fn on_state_change(&self, protocol: Protocol, state: ClientState) {
            self.states.lock().unwrap().push((protocol, state));
        }
    }

    fn shared_with(events: Arc<Recorder>) -> Shared {
        Shared {
            config: ClientConfig {
                base_url: "http://localhost:3000".to_string(),
                session_token: "s1".to_string(),
            },
            http: reqwest::Client::new(),
            events,
            dedup: Mutex::new(DedupSet::new()),
            states: Mutex::new(HashMap::new()),
            counters: Mutex::new(HashMap::new()),
            outbound: Mutex::new(HashMap::new()),
        }
    }

    fn log_entry(id: &str) -> TradingLogEntry {
        TradingLogEntry {
            id: id.to_string(),
            sender: "user_2".to_string(),
            timestamp: "t".to_string(),
            text: Some("hello".to_string()),
            trade_action: None,
            method: None,
            price: None,
        }
    }

    #[test]
    fn urls_carry_the_session_token() {
        let config = ClientConfig {
            base_url: "http://localhost:3000".to_string(),
            session_token: "s1".to_string(),
        };
        assert_eq!(
            config.socket_url(Protocol::Websocket),
            "ws://localhost:3000/websocket?sessionToken=s1"
        );
        assert_eq!(
            config.socket_url(Protocol::Channel),
            "ws://localhost:3000/channel?sessionToken=s1"
        );
        assert_eq!(config.sse_url(), "http://localhost:3000/sse?sessionToken=s1");
        assert_eq!(
            config.trading_log_url(),
            "http://localhost:3000/api/trading-log"
        );
    }

    #[tokio::test]
    async fn dispatch_deduplicates_replayed_entries_across_protocols() {
        let recorder = Arc::new(Recorder::default());
        let shared = shared_with(recorder.clone());

        // History replay delivers the entry first...
        shared
            .dispatch(
                Protocol::Websocket,
                ServerMessage::trading_log_history(vec![log_entry("msg_1")]),
            )
            .await;
        // ...then the live relay races in, possibly via another protocol.
        shared
            .dispatch(
                Protocol::Websocket,
                ServerMessage::trading_log(log_entry("msg_1")),
            )
            .await;
        shared
            .dispatch(
                Protocol::Channel,
                ServerMessage::trading_log(log_entry("msg_1")),
            )
            .await;
        shared
            .dispatch(
                Protocol::Websocket,
                ServerMessage::trading_log(log_entry("msg_2")),
            )
            .await;

        let logs = recorder.logs.lock().unwrap();
        assert_eq!(
            *logs,
            vec![
                (Protocol::Websocket, "msg_1".to_string()),
                (Protocol::Websocket, "msg_2".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn state_changes_are_reported_once_per_transition() {
        let recorder = Arc::new(Recorder::default());
        let shared = shared_with(recorder.clone());

        shared.set_state(Protocol::Sse, ClientState::Connecting).await;
        shared.set_state(Protocol::Sse, ClientState::Connecting).await;
        shared.set_state(Protocol::Sse, ClientState::Connected).await;

        let states = recorder.states.lock().unwrap();
        assert_eq!(
            *states,
            vec![
                (Protocol::Sse, ClientState::Connecting),
                (Protocol::Sse, ClientState::Connected),
            ]
        );
    }

    #[tokio::test]
    async fn send_without_any_connection_fails_informationally() {
        let manager = ConnectionManager::new(
            ClientConfig {
                base_url: "http://localhost:3000".to_string(),
                session_token: "s1".to_string(),
            },
            Arc::new(Recorder::default()),
        );

        let result = manager
            .send_trading_log(TradingLogSubmission {
                text: Some("hi".to_string()),
                ..Default::default()
            })
            .await;
        assert!(matches!(result, Err(ClientError::NotConnected)));
        assert_eq!(manager.transaction_count(Protocol::Websocket), 0);
    }

    #[tokio::test]
    async fn disable_resets_the_transaction_counter() {
        let manager = ConnectionManager::new(
            ClientConfig {
                base_url: "http://localhost:3000".to_string(),
                session_token: "s1".to_string(),
            },
            Arc::new(Recorder::default()),
        );
        manager
            .shared
            .counters
            .lock()
            .unwrap()
            .insert(Protocol::Channel, 7);

        manager.disable(Protocol::Channel);
        assert_eq!(manager.transaction_count(Protocol::Channel), 0);
        assert_eq!(manager.state(Protocol::Channel), ClientState::Disconnected);
    }
}
