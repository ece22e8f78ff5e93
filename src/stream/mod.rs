//! Realtime connection modules.
//!
//! - `client`: connection state machine, reconnect scheduling, and the
//!   public [`RealtimeClient`] handle.
//! - `transport`: link abstraction plus websocket and in-memory connectors.
//! - `proto`: liveness frames shared with the server.
//! - `recovery`: failure classification and per-kind recovery strategies.
//! - `diagnostics`: health reports and remedy suggestions.
//! - `relay`: broadcast fan-out of inbound payloads.

/// Connection state machine and public client handle.
pub mod client;
/// Health evaluation and recovery recommendations.
pub mod diagnostics;
/// Error taxonomy.
pub mod error;
/// Client events and listener registry.
pub mod events;
/// Ping/pong bookkeeping.
pub mod heartbeat;
/// Host-supplied connectivity signal.
pub mod network;
/// Client configuration.
pub mod options;
/// Liveness frames and inbound frame decoding.
pub mod proto;
/// Bounded outbound queue.
pub mod queue;
/// Failure classification and recovery strategies.
pub mod recovery;
/// Broadcast relay of inbound payloads.
pub mod relay;
/// Connection states and transition history.
pub mod state;
/// Link abstraction and connectors.
pub mod transport;

pub use client::{ClientStatus, RealtimeClient, RealtimeClientBuilder};
pub use error::{ClientError, ErrorKind};
pub use events::{ClientEvent, EventKind, ListenerId};
pub use options::ClientOptions;
pub use state::ConnectionState;
