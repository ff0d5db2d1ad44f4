//! Shared application state: the explicit registry service injected into
//! every protocol adapter. No component reaches into globals.

use crate::config::Config;
use crate::history::HistoryBuffer;
use crate::hub::BroadcastHub;
use crate::registry::ConnectionRegistries;
use crate::session::SessionRegistry;
use std::sync::Arc;
use tokio::sync::watch;

pub struct AppState {
    pub config: Config,
    pub sessions: SessionRegistry,
    pub registries: Arc<ConnectionRegistries>,
    pub history: Arc<HistoryBuffer>,
    pub hub: BroadcastHub,
    pub started_at: chrono::DateTime<chrono::Utc>,
    shutdown_tx: watch::Sender<bool>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let registries = Arc::new(ConnectionRegistries::new());
        let history = Arc::new(HistoryBuffer::new());
        let hub = BroadcastHub::new(registries.clone(), history.clone());
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            config,
            sessions: SessionRegistry::new(),
            registries,
            history,
            hub,
            started_at: chrono::Utc::now(),
            shutdown_tx,
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        (chrono::Utc::now() - self.started_at).num_seconds().max(0) as u64
    }

    /// Subscribe to the cooperative-shutdown flag. Connection tasks break
    /// out of their loops when it flips.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    pub fn begin_shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// New handshakes are rejected once shutdown has begun.
    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(Config::default())
    }
}
