//! WebSocket route handler.
//!
//! Handles WebSocket upgrade, message loop, and cleanup.

use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::connection::{ConnectionRef, OutboundFrame};
use super::relay::{ChatRelay, OpenedConnection};
use super::session::{MessageOutcome, SessionError};
use crate::server::state::GuardedChatRelay;

/// How long the forwarder gets to flush its close frame once the session ended.
const FORWARDER_GRACE: Duration = Duration::from_millis(250);

/// WebSocket upgrade handler.
///
/// Route handler for `GET /ws/chat/{room_name}`. The room name is used
/// verbatim as the room key.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(room_name): Path<String>,
    State(relay): State<GuardedChatRelay>,
) -> Response {
    debug!("WebSocket upgrade for room {:?}", room_name);
    ws.on_upgrade(move |socket| handle_socket(socket, room_name, relay))
}

/// Handle an established WebSocket connection.
async fn handle_socket(mut socket: WebSocket, room_name: String, relay: GuardedChatRelay) {
    let OpenedConnection {
        connection,
        receiver,
    } = match relay.on_open(&room_name) {
        Ok(opened) => opened,
        Err(e) => {
            warn!("Refusing WebSocket for room {:?}: {}", room_name, e);
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    };

    let (ws_sink, ws_stream) = socket.split();

    // Spawn task to forward outgoing frames to the WebSocket
    let mut outgoing_handle =
        tokio::spawn(forward_outgoing(ws_sink, receiver, connection.clone()));

    process_incoming(ws_stream, &connection, &relay).await;

    // Cleanup
    relay.on_close(&connection.id()).await;
    if tokio::time::timeout(FORWARDER_GRACE, &mut outgoing_handle)
        .await
        .is_err()
    {
        outgoing_handle.abort();
    }
    debug!(
        "WebSocket disconnected: connection {} room {:?}",
        connection.id(),
        room_name
    );
}

/// Forward queued frames to the WebSocket until the connection is closed.
async fn forward_outgoing(
    mut ws_sink: SplitSink<WebSocket, Message>,
    mut outgoing_rx: mpsc::Receiver<OutboundFrame>,
    connection: ConnectionRef,
) {
    loop {
        tokio::select! {
            frame = outgoing_rx.recv() => {
                let Some(frame) = frame else {
                    break;
                };
                if ws_sink.send(Message::Text(frame.to_string().into())).await.is_err() {
                    break;
                }
            }
            _ = connection.closed() => {
                let _ = ws_sink.send(Message::Close(None)).await;
                break;
            }
        }
    }
}

/// Process incoming messages from the WebSocket.
async fn process_incoming(
    mut ws_stream: SplitStream<WebSocket>,
    connection: &ConnectionRef,
    relay: &ChatRelay,
) {
    loop {
        let result = tokio::select! {
            biased;
            _ = connection.closed() => {
                debug!("Connection {} was closed by the relay", connection.id());
                break;
            }
            next = ws_stream.next() => match next {
                Some(result) => result,
                None => break,
            },
        };

        match result {
            Ok(Message::Text(text)) => {
                match relay
                    .on_message(&connection.id(), text.as_str().as_bytes())
                    .await
                {
                    Ok(MessageOutcome::Published(report)) => {
                        if !report.is_complete() {
                            debug!(
                                "Message from {} reached {}/{} members of {:?}",
                                connection.id(),
                                report.delivered.len(),
                                report.recipients(),
                                report.room
                            );
                        }
                    }
                    Ok(MessageOutcome::Dropped(e)) => {
                        debug!("Failed to parse client message: {}", e);
                    }
                    Err(SessionError::Closed) => break,
                    Err(e) => {
                        warn!("Failed to handle message from {}: {}", connection.id(), e);
                    }
                }
            }
            Ok(Message::Binary(_)) => {
                debug!("Received binary message, ignoring");
            }
            Ok(Message::Ping(_)) => {
                // Axum/tungstenite handles pong automatically
                debug!("Received ping");
            }
            Ok(Message::Pong(_)) => {
                debug!("Received pong");
            }
            Ok(Message::Close(_)) => {
                debug!("Received close frame");
                break;
            }
            Err(e) => {
                debug!("WebSocket error: {}", e);
                break;
            }
        }
    }
}
