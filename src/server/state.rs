use axum::extract::FromRef;
use std::sync::Arc;
use std::time::Instant;

use super::websocket::ChatRelay;
use super::ServerConfig;

pub type GuardedChatRelay = Arc<ChatRelay>;

#[derive(Clone)]
pub struct ServerState {
    pub config: ServerConfig,
    pub start_time: Instant,
    pub chat_relay: GuardedChatRelay,
}

impl ServerState {
    pub fn new(config: ServerConfig, chat_relay: GuardedChatRelay) -> Self {
        Self {
            config,
            start_time: Instant::now(),
            chat_relay,
        }
    }
}

impl FromRef<ServerState> for GuardedChatRelay {
    fn from_ref(input: &ServerState) -> Self {
        input.chat_relay.clone()
    }
}

impl FromRef<ServerState> for ServerConfig {
    fn from_ref(input: &ServerState) -> Self {
        input.config.clone()
    }
}
