use anyhow::{Context, Result};
use std::time::Duration;

use axum::{extract::State, middleware, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::websocket::ws_handler;
use super::{log_requests, metrics, state::*, ServerConfig};

#[derive(Serialize)]
struct ServerStats {
    pub uptime: String,
    pub connections: usize,
    pub rooms: usize,
}

fn format_uptime(duration: Duration) -> String {
    let total_seconds = duration.as_secs();

    let days = total_seconds / 86_400;
    let hours = (total_seconds % 86_400) / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    format!("{}d {:02}:{:02}:{:02}", days, hours, minutes, seconds)
}

async fn home(State(state): State<ServerState>) -> impl IntoResponse {
    let stats = ServerStats {
        uptime: format_uptime(state.start_time.elapsed()),
        connections: state.chat_relay.connection_count(),
        rooms: state.chat_relay.room_count(),
    };
    Json(stats)
}

pub fn make_app(config: ServerConfig, chat_relay: GuardedChatRelay) -> Router {
    let state = ServerState::new(config, chat_relay);

    let ws_routes: Router<ServerState> = Router::new()
        .route("/chat/{room_name}", get(ws_handler))
        .route("/chat/{room_name}/", get(ws_handler));

    Router::new()
        .route("/", get(home))
        .nest("/ws", ws_routes)
        .layer(middleware::from_fn_with_state(state.clone(), log_requests))
        .with_state(state)
}

pub fn make_metrics_app() -> Router {
    Router::new().route("/metrics", get(metrics::metrics_handler))
}

/// Serve the chat app (and the metrics endpoint if enabled) until `shutdown`
/// is cancelled, then close every chat connection.
pub async fn run_server(
    config: ServerConfig,
    chat_relay: GuardedChatRelay,
    shutdown: CancellationToken,
) -> Result<()> {
    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let metrics_handle = if config.metrics_port > 0 {
        let metrics_addr = format!("{}:{}", config.bind_address, config.metrics_port);
        let metrics_listener = TcpListener::bind(&metrics_addr)
            .await
            .with_context(|| format!("Failed to bind metrics server to {}", metrics_addr))?;
        let token = shutdown.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = axum::serve(metrics_listener, make_metrics_app())
                .with_graceful_shutdown(token.cancelled_owned())
                .await
            {
                error!("Metrics server error: {}", e);
            }
        }))
    } else {
        info!("Metrics server disabled");
        None
    };

    let app = make_app(config, chat_relay.clone());
    let token = shutdown.clone();
    let result = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            token.cancelled().await;
            info!("Closing all chat connections");
            chat_relay.shutdown().await;
        })
        .await;

    // Stop the metrics server too if the main server exited on its own
    shutdown.cancel();
    if let Some(handle) = metrics_handle {
        let _ = handle.await;
    }

    result.context("HTTP server failed")
}
