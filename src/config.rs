//! Environment-driven configuration.

use crate::types::Protocol;
use std::time::Duration;

/// Server configuration, loaded from environment variables with the same
/// defaults the service has always shipped with.
#[derive(Debug, Clone)]
pub struct Config {
    /// TCP port to listen on.
    pub port: u16,
    /// Price tick interval for the websocket instrument.
    pub websocket_update_interval: Duration,
    /// Price tick interval for the channel instrument.
    pub channel_update_interval: Duration,
    /// Price tick interval for the sse instrument.
    pub sse_update_interval: Duration,
    /// How long to wait for graceful shutdown before force-terminating.
    pub shutdown_grace: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3000,
            websocket_update_interval: Duration::from_millis(500),
            channel_update_interval: Duration::from_millis(750),
            sse_update_interval: Duration::from_millis(1000),
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!("Invalid {} value {:?}, using default {}", name, raw, default);
            default
        }),
        Err(_) => default,
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            port: env_u64("PORT", defaults.port as u64) as u16,
            websocket_update_interval: Duration::from_millis(env_u64(
                "WEBSOCKET_UPDATE_INTERVAL",
                defaults.websocket_update_interval.as_millis() as u64,
            )),
            channel_update_interval: Duration::from_millis(env_u64(
                "CHANNEL_UPDATE_INTERVAL",
                defaults.channel_update_interval.as_millis() as u64,
            )),
            sse_update_interval: Duration::from_millis(env_u64(
                "SSE_UPDATE_INTERVAL",
                defaults.sse_update_interval.as_millis() as u64,
            )),
            shutdown_grace: defaults.shutdown_grace,
        }
    }

    pub fn update_interval(&self, protocol: Protocol) -> Duration {
        match protocol {
            Protocol::Websocket => self.websocket_update_interval,
            Protocol::Channel => self.channel_update_interval,
            Protocol::Sse => self.sse_update_interval,
        }
    }
}
