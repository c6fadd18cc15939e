//! WebSocket test client

use super::constants::*;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

/// A chat participant connected to one room.
pub struct ChatClient {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl ChatClient {
    /// Connects to `url` and completes the WebSocket handshake
    pub async fn connect(url: &str) -> Self {
        let (stream, _response) = connect_async(url)
            .await
            .unwrap_or_else(|e| panic!("Failed to connect to {}: {}", url, e));
        Self { stream }
    }

    /// Sends a raw text frame
    pub async fn send_text(&mut self, text: &str) {
        self.stream
            .send(Message::Text(text.into()))
            .await
            .expect("Failed to send text frame");
    }

    /// Sends `{"message": value}`
    pub async fn send_message(&mut self, value: serde_json::Value) {
        let envelope = serde_json::json!({ "message": value });
        self.send_text(&envelope.to_string()).await;
    }

    /// Sends a raw frame of any kind
    pub async fn send_frame(&mut self, message: Message) {
        self.stream
            .send(message)
            .await
            .expect("Failed to send frame");
    }

    /// Receives the next text frame, skipping control frames
    ///
    /// # Panics
    ///
    /// Panics on timeout, close, or error.
    pub async fn recv_text(&mut self) -> String {
        let timeout = Duration::from_millis(RECV_TIMEOUT_MS);
        loop {
            let next = tokio::time::timeout(timeout, self.stream.next())
                .await
                .expect("Timed out waiting for a text frame");
            match next {
                Some(Ok(Message::Text(text))) => return text.as_str().to_string(),
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                other => panic!("Expected a text frame, got {:?}", other),
            }
        }
    }

    /// Receives the next text frame and parses it as JSON
    pub async fn recv_json(&mut self) -> serde_json::Value {
        let text = self.recv_text().await;
        serde_json::from_str(&text).expect("Received frame is not JSON")
    }

    /// Asserts that no text frame arrives for a while
    pub async fn expect_silence(&mut self) {
        let quiet = Duration::from_millis(SILENCE_MS);
        let start = tokio::time::Instant::now();
        while let Some(remaining) = quiet.checked_sub(start.elapsed()) {
            match tokio::time::timeout(remaining, self.stream.next()).await {
                Err(_) => return,
                Ok(Some(Ok(Message::Ping(_)))) | Ok(Some(Ok(Message::Pong(_)))) => continue,
                Ok(other) => panic!("Expected silence, got {:?}", other),
            }
        }
    }

    /// Waits for the server to close the connection
    pub async fn expect_closed(&mut self) {
        let timeout = Duration::from_millis(RECV_TIMEOUT_MS);
        loop {
            let next = tokio::time::timeout(timeout, self.stream.next())
                .await
                .expect("Timed out waiting for the connection to close");
            match next {
                None | Some(Ok(Message::Close(_))) | Some(Err(_)) => return,
                Some(Ok(_)) => continue,
            }
        }
    }

    /// Closes the connection from the client side
    pub async fn close(mut self) {
        let _ = self.stream.close(None).await;
    }
}
