//! Test server lifecycle management
//!
//! Each test gets an isolated server with its own relay on a random port.

use super::constants::*;
use chat_relay_server::server::server::make_app;
use chat_relay_server::server::websocket::{ChatRelay, RelayConfig};
use chat_relay_server::server::{RequestsLoggingLevel, ServerConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

/// Test server instance with its own relay.
///
/// When dropped, the server gracefully shuts down.
pub struct TestServer {
    /// Base URL for HTTP requests (e.g., "http://127.0.0.1:12345")
    pub base_url: String,

    /// Base URL for WebSocket connections (e.g., "ws://127.0.0.1:12345")
    pub ws_url: String,

    /// The port the server is listening on
    pub port: u16,

    /// The relay behind the server, for direct inspection in tests
    pub relay: Arc<ChatRelay>,

    _shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl TestServer {
    /// Spawns a new test server with the default relay configuration
    pub async fn spawn() -> Self {
        Self::spawn_with(RelayConfig::default()).await
    }

    /// Spawns a new test server on a random port
    ///
    /// # Panics
    ///
    /// Panics if port binding fails or the server doesn't become ready
    /// within timeout.
    pub async fn spawn_with(relay_config: RelayConfig) -> Self {
        let relay = Arc::new(ChatRelay::new(relay_config));

        // Bind to random port
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");

        let port = listener
            .local_addr()
            .expect("Failed to get local address")
            .port();

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        let config = ServerConfig {
            requests_logging_level: RequestsLoggingLevel::None,
            bind_address: "127.0.0.1".to_string(),
            port,
            metrics_port: 0,
        };
        let app = make_app(config, relay.clone());

        // Spawn server in background task with graceful shutdown
        let relay_for_shutdown = relay.clone();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    shutdown_rx.await.ok();
                    relay_for_shutdown.shutdown().await;
                })
                .await
                .expect("Server failed");
        });

        let server = Self {
            base_url: format!("http://127.0.0.1:{}", port),
            ws_url: format!("ws://127.0.0.1:{}", port),
            port,
            relay,
            _shutdown_tx: Some(shutdown_tx),
        };

        server.wait_for_ready().await;

        server
    }

    /// URL of the chat endpoint for `room`
    pub fn room_url(&self, room: &str) -> String {
        format!("{}/ws/chat/{}", self.ws_url, room)
    }

    /// Waits until `room` has exactly `count` members.
    ///
    /// The upgrade completes on the client before the server joins the room,
    /// so tests call this before publishing.
    pub async fn wait_for_members(&self, room: &str, count: usize) {
        let start = std::time::Instant::now();
        let timeout = Duration::from_millis(RECV_TIMEOUT_MS);

        while self.relay.room_members(room).len() != count {
            if start.elapsed() > timeout {
                panic!(
                    "Room {:?} has {} members, expected {}",
                    room,
                    self.relay.room_members(room).len(),
                    count
                );
            }
            tokio::time::sleep(Duration::from_millis(SERVER_READY_POLL_INTERVAL_MS)).await;
        }
    }

    /// Waits for the server to become ready by polling the / endpoint
    async fn wait_for_ready(&self) {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(100))
            .build()
            .expect("Failed to build reqwest client");

        let start = std::time::Instant::now();
        let timeout = Duration::from_millis(SERVER_READY_TIMEOUT_MS);

        loop {
            if start.elapsed() > timeout {
                panic!(
                    "Server did not become ready within {}ms",
                    SERVER_READY_TIMEOUT_MS
                );
            }

            match client.get(format!("{}/", self.base_url)).send().await {
                Ok(response) if response.status().is_success() => {
                    return;
                }
                _ => {
                    tokio::time::sleep(Duration::from_millis(SERVER_READY_POLL_INTERVAL_MS)).await;
                }
            }
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self._shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}
