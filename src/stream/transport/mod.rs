//! Duplex transport abstraction underneath the realtime client.
//!
//! A [`Connector`] opens a [`Link`]. The link is channel-based: writes are
//! queued to a worker that owns the socket, and the worker reports inbound
//! frames and closure through [`TransportEvent`]s. Writes never block.

use std::fmt;

use futures_util::future::BoxFuture;
use secrecy::SecretString;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::http::header::InvalidHeaderValue;
use tokio_tungstenite::tungstenite::Error as WsError;

pub mod memory;
pub mod websocket;

pub use memory::{MemoryConnector, MemoryListener, OpenOutcome, ServerEnd};
pub use websocket::WebSocketConnector;

/// Normal closure.
pub const CLOSE_NORMAL: u16 = 1000;
/// Endpoint going away (server shutdown or navigation).
pub const CLOSE_GOING_AWAY: u16 = 1001;
/// No status code was present in the close frame.
pub const CLOSE_NO_STATUS: u16 = 1005;
/// Connection dropped without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;
/// Policy violation, used by servers to reject credentials.
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;
/// Server hit an unexpected condition.
pub const CLOSE_INTERNAL_ERROR: u16 = 1011;
/// Server is restarting.
pub const CLOSE_SERVICE_RESTART: u16 = 1012;
/// Server is overloaded, try again later.
pub const CLOSE_TRY_AGAIN_LATER: u16 = 1013;
/// Upstream gateway failure.
pub const CLOSE_BAD_GATEWAY: u16 = 1014;
/// Application close code used when the heartbeat declares the link dead.
pub const CLOSE_PONG_TIMEOUT: u16 = 4000;

/// Close code plus human readable reason.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CloseInfo {
    pub code: u16,
    pub reason: String,
}

impl CloseInfo {
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// Closure with no close frame, as reported when the peer vanishes.
    pub fn abnormal(reason: impl Into<String>) -> Self {
        Self::new(CLOSE_ABNORMAL, reason)
    }
}

impl fmt::Display for CloseInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.reason)
    }
}

/// Instructions from the client to the socket worker.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Outbound {
    Text(String),
    Close(CloseInfo),
}

/// Notifications from the socket worker to the client.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TransportEvent {
    /// An inbound text frame.
    Message(String),
    /// Frames accepted by [`Link::send`] that never reached the wire, in order.
    Unsent(Vec<String>),
    /// A non-fatal error reported by the socket.
    Errored(String),
    /// The socket is gone. Always the last event of a link.
    Closed(CloseInfo),
}

/// Parameters for opening a link.
#[derive(Clone)]
pub struct OpenRequest {
    pub url: String,
    /// Bearer token presented during the handshake; never logged.
    pub token: Option<SecretString>,
}

impl fmt::Debug for OpenRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenRequest")
            .field("url", &self.url)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Errors produced while opening a link.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Websocket transport error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] WsError),

    /// The server answered the upgrade with a non-101 HTTP status.
    #[error("handshake rejected with http status {0}")]
    Rejected(u16),

    /// Token could not be converted to a valid HTTP header value.
    #[error("invalid authorization header: {0}")]
    InvalidAuthHeader(#[from] InvalidHeaderValue),

    /// The endpoint could not be reached.
    #[error("endpoint unreachable: {0}")]
    Unreachable(String),
}

impl TransportError {
    /// HTTP status the server rejected the upgrade with, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Rejected(status) => Some(*status),
            TransportError::WebSocket(WsError::Http(response)) => {
                Some(response.status().as_u16())
            }
            _ => None,
        }
    }
}

/// Opens links to a server.
pub trait Connector: Send + Sync + 'static {
    /// Resolves once the link is ready for writes; rejects on immediate
    /// failure. Timeouts are applied by the caller.
    fn open(&self, request: OpenRequest) -> BoxFuture<'static, Result<Link, TransportError>>;
}

/// An open duplex link.
///
/// Owned exclusively by the client's state machine and replaced on every
/// connection attempt.
#[derive(Debug)]
pub struct Link {
    outbound: mpsc::UnboundedSender<Outbound>,
    events: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    closed: bool,
}

impl Link {
    pub fn new(
        outbound: mpsc::UnboundedSender<Outbound>,
        events: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> Self {
        Self {
            outbound,
            events: Some(events),
            closed: false,
        }
    }

    /// Hands a text frame to the socket worker.
    ///
    /// Returns `false` when the link is not writable; the caller keeps
    /// ownership of the retry.
    pub fn send(&mut self, text: String) -> bool {
        if !self.is_writable() {
            return false;
        }
        self.outbound.send(Outbound::Text(text)).is_ok()
    }

    /// Closes the link. Calling it again is a no-op.
    pub fn close(&mut self, code: u16, reason: &str) {
        if self.closed {
            return;
        }
        self.closed = true;
        let _ = self.outbound.send(Outbound::Close(CloseInfo::new(code, reason)));
    }

    pub fn is_writable(&self) -> bool {
        !self.closed && !self.outbound.is_closed()
    }

    /// Takes the inbound event stream. Yields `None` after the first call.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        self.events.take()
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;

    #[test]
    fn close_is_idempotent_and_blocks_writes() {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let (_ev_tx, ev_rx) = mpsc::unbounded_channel();
        let mut link = Link::new(out_tx, ev_rx);

        assert!(link.send("a".into()));
        link.close(CLOSE_NORMAL, "bye");
        link.close(CLOSE_NORMAL, "bye");
        assert!(!link.send("b".into()));

        assert_eq!(out_rx.try_recv().ok(), Some(Outbound::Text("a".into())));
        assert_eq!(
            out_rx.try_recv().ok(),
            Some(Outbound::Close(CloseInfo::new(CLOSE_NORMAL, "bye")))
        );
        assert!(out_rx.try_recv().is_err());
    }

    #[test]
    fn send_fails_once_worker_is_gone() {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (_ev_tx, ev_rx) = mpsc::unbounded_channel();
        let mut link = Link::new(out_tx, ev_rx);
        drop(out_rx);
        assert!(!link.send("a".into()));
        assert!(!link.is_writable());
    }

    #[test]
    fn debug_output_redacts_token() {
        let request = OpenRequest {
            url: "ws://localhost/ws".into(),
            token: Some(SecretString::new("hunter2".to_string())),
        };
        let rendered = format!("{request:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("REDACTED"));
    }
}
