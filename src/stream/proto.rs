//! Transport envelope shared with the stream server.
//!
//! Only the liveness frames are typed here. Every other frame is treated as an
//! opaque application payload and handed to `message` listeners untouched.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reserved control frames exchanged by the heartbeat.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlFrame {
    Ping {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },
    Pong {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },
}

impl ControlFrame {
    pub fn ping(timestamp: u64) -> Self {
        Self::Ping {
            timestamp: Some(timestamp),
        }
    }

    pub fn pong(timestamp: Option<u64>) -> Self {
        Self::Pong { timestamp }
    }

    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// A decoded inbound text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    Control(ControlFrame),
    Payload(Value),
}

impl InboundFrame {
    /// Decodes a text frame.
    ///
    /// Text that is not JSON is surfaced as a JSON string payload rather than
    /// rejected; the transport does not own the business wire format.
    pub fn from_text(text: &str) -> Self {
        let Ok(value) = serde_json::from_str::<Value>(text) else {
            return Self::Payload(Value::String(text.to_string()));
        };
        if is_reserved(&value) {
            if let Ok(control) = serde_json::from_value::<ControlFrame>(value.clone()) {
                return Self::Control(control);
            }
        }
        Self::Payload(value)
    }
}

fn is_reserved(value: &Value) -> bool {
    matches!(
        value.get("type").and_then(Value::as_str),
        Some("ping") | Some("pong")
    )
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
