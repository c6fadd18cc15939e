//! Shared constants for end-to-end tests

// ============================================================================
// Rooms
// ============================================================================

/// Default room used by most tests
pub const LOBBY: &str = "lobby";

/// A second room, used to check room isolation
pub const GAMES: &str = "games";

// ============================================================================
// Timeouts
// ============================================================================

/// Maximum time to wait for the server to become ready
pub const SERVER_READY_TIMEOUT_MS: u64 = 5_000;

/// Interval between readiness polls
pub const SERVER_READY_POLL_INTERVAL_MS: u64 = 10;

/// Maximum time to wait for an expected frame
pub const RECV_TIMEOUT_MS: u64 = 2_000;

/// How long a client must stay quiet to count as "received nothing"
pub const SILENCE_MS: u64 = 200;
