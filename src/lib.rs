//! Self-healing realtime client over websockets.
//!
//! The crate is organized by concern:
//! - `stream`: the connection state machine, transports, heartbeat,
//!   recovery, diagnostics, and event fan-out.
//! - `retry`: reconnect backoff policy and timeout helpers.

/// Reconnect backoff and timeout helpers.
pub mod retry;
/// Realtime client, transports, and supporting state.
pub mod stream;

mod serde_millis;

pub use stream::{ClientError, ClientEvent, ClientOptions, ConnectionState, RealtimeClient};
