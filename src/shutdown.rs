//! Cooperative shutdown: announce, cancel timers, stop accepting, close
//! existing connections, force-terminate after a bounded grace period.

use crate::protocol::{ServerEvent, ServerInfoData};
use crate::state::AppState;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Resolves when SIGINT/SIGTERM arrives, then runs the shutdown
/// sequence. Passed to axum's `with_graceful_shutdown`, so returning
/// from this future stops the listener.
pub async fn shutdown_signal(state: Arc<AppState>, tickers: Vec<JoinHandle<()>>) {
    wait_for_signal().await;

    tracing::info!("Shutting down gracefully...");

    state.hub.server_info(
        ServerEvent::ServerShutdown,
        ServerInfoData {
            message: Some("Server is shutting down".to_string()),
            uptime: Some(state.uptime_secs()),
            active_connections: Some(state.registries.counts()),
            ..Default::default()
        },
        None,
    );

    for ticker in tickers {
        ticker.abort();
    }

    // Flip the flag: connection tasks drain their last messages and exit,
    // and new handshakes are rejected.
    state.begin_shutdown();

    let grace = state.config.shutdown_grace;
    tokio::spawn(async move {
        tokio::time::sleep(grace).await;
        tracing::error!("Forced shutdown after timeout");
        std::process::exit(1);
    });
}

async fn wait_for_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
