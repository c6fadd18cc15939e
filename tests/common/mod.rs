//! Common test infrastructure
//!
//! This module provides all the infrastructure needed for end-to-end tests.
//! Tests should only import from this module, not from internal submodules.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::{ChatClient, TestServer, LOBBY};
//!
//! #[tokio::test]
//! async fn test_echo() {
//!     let server = TestServer::spawn().await;
//!     let mut client = ChatClient::connect(&server.room_url(LOBBY)).await;
//!     server.wait_for_members(LOBBY, 1).await;
//!
//!     client.send_message("hi".into()).await;
//!     assert_eq!(client.recv_text().await, r#"{"message": "hi"}"#);
//! }
//! ```

mod client;
mod constants;
mod server;

// Public API - this is what tests import
pub use client::ChatClient;
pub use constants::*;
pub use server::TestServer;
