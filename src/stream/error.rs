//! Error types surfaced by the realtime client.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Semantic category a failure is classified into.
///
/// Drives which recovery strategy the client applies.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    #[serde(rename = "auth_error")]
    Auth,
    #[serde(rename = "network_error")]
    Network,
    #[serde(rename = "server_error")]
    Server,
    #[serde(rename = "unknown_error")]
    Unknown,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 4] = [
        ErrorKind::Auth,
        ErrorKind::Network,
        ErrorKind::Server,
        ErrorKind::Unknown,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Auth => "auth_error",
            ErrorKind::Network => "network_error",
            ErrorKind::Server => "server_error",
            ErrorKind::Unknown => "unknown_error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors produced by the client.
///
/// Cloneable so the same error can settle several pending `connect()` calls
/// and be delivered to every `error` listener.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum ClientError {
    /// The transport did not become ready within the connection timeout.
    #[error("connection timed out after {0:?}")]
    ConnectionTimeout(Duration),

    /// Outbound payload exceeds `max_message_size`; it was not sent or queued.
    #[error("message of {size} bytes exceeds the {max} byte limit")]
    MessageTooLarge { size: usize, max: usize },

    /// The transport refused a write; the frame was queued for retry.
    #[error("transport rejected the write; message queued for retry")]
    SendFailed,

    /// Outbound payload could not be encoded as JSON.
    #[error("json error: {0}")]
    Serialization(String),

    /// Opening the transport failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// The live connection closed unexpectedly.
    #[error("connection closed ({kind}, code {code}): {reason}")]
    ConnectionClosed {
        kind: ErrorKind,
        code: u16,
        reason: String,
    },

    /// `disconnect()` was called before the pending attempt settled.
    #[error("client disconnected")]
    Disconnected,

    /// Options failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ClientError {
    /// Errors that leave the connection state untouched.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            ClientError::MessageTooLarge { .. }
                | ClientError::SendFailed
                | ClientError::Serialization(_)
        )
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Serialization(err.to_string())
    }
}
