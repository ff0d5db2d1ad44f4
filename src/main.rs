use axum::routing::{get, post};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tickerhub::protocol::{ServerEvent, ServerInfoData};
use tickerhub::{api, config::Config, shutdown, state::AppState, ticker, transport};

#[tokio::main]
async fn main() {
    // Load .env file if present (before any env var reads)
    if let Err(e) = dotenvy::dotenv() {
        // Not an error if .env doesn't exist, only log if it's a different issue
        if !matches!(e, dotenvy::Error::Io(_)) {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tickerhub=debug,tower_http=debug,axum=trace".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting TickerHub...");

    let config = Config::from_env();
    let port = config.port;
    let state = Arc::new(AppState::new(config));

    // Per-protocol price tickers
    let tickers = ticker::spawn_tickers(state.hub.clone(), &state.config);

    let app = Router::new()
        .route("/websocket", get(transport::websocket::ws_handler))
        .route("/channel", get(transport::channel::channel_handler))
        .route("/sse", get(transport::sse::sse_handler))
        .route("/health", get(api::health))
        .route("/", get(api::info))
        .route("/api/trading-log", post(api::post_trading_log))
        .fallback(api::fallback)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone());

    // Announce startup to anyone already listening shortly after bind
    let announce_state = state.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        let data = ServerInfoData {
            message: Some("Server started".to_string()),
            start_time: Some(announce_state.started_at.to_rfc3339()),
            port: Some(port),
            ..Default::default()
        };
        announce_state
            .hub
            .server_info(ServerEvent::ServerStart, data, None);
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Listening on http://{}", addr);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    let serve = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown::shutdown_signal(state, tickers));

    if let Err(e) = serve.await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}
