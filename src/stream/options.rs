//! Client configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retry::ReconnectPolicy;
use crate::serde_millis;
use crate::stream::error::ClientError;
use crate::stream::recovery::RecoveryPolicy;

/// Tunables for [`RealtimeClient`](crate::stream::client::RealtimeClient).
///
/// Every field has a default, so hosts can deserialize a partial JSON object
/// (durations are given in milliseconds, e.g. `"ping_interval_ms": 15000`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientOptions {
    pub max_reconnect_attempts: u32,
    #[serde(rename = "reconnect_delay_ms", with = "serde_millis")]
    pub reconnect_delay: Duration,
    #[serde(rename = "max_reconnect_delay_ms", with = "serde_millis")]
    pub max_reconnect_delay: Duration,
    #[serde(rename = "ping_interval_ms", with = "serde_millis")]
    pub ping_interval: Duration,
    #[serde(rename = "pong_timeout_ms", with = "serde_millis")]
    pub pong_timeout: Duration,
    #[serde(rename = "connection_timeout_ms", with = "serde_millis")]
    pub connection_timeout: Duration,
    /// Largest outbound frame in bytes; bigger messages are rejected locally.
    pub max_message_size: usize,
    pub max_queue_size: usize,
    pub enable_heartbeat: bool,
    pub enable_auto_reconnect: bool,
    pub enable_error_recovery: bool,
    /// Consecutive errors after which the backoff is multiplied again.
    pub error_threshold: u32,
    pub error_backoff_multiplier: u32,
    /// How often to re-check connectivity while waiting to come back online.
    #[serde(rename = "offline_poll_interval_ms", with = "serde_millis")]
    pub offline_poll_interval: Duration,
    pub recovery: RecoveryPolicy,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: 10,
            reconnect_delay: Duration::from_millis(1_000),
            max_reconnect_delay: Duration::from_millis(30_000),
            ping_interval: Duration::from_millis(30_000),
            pong_timeout: Duration::from_millis(10_000),
            connection_timeout: Duration::from_millis(10_000),
            max_message_size: 64 * 1024,
            max_queue_size: 100,
            enable_heartbeat: true,
            enable_auto_reconnect: true,
            enable_error_recovery: true,
            error_threshold: 3,
            error_backoff_multiplier: 2,
            offline_poll_interval: Duration::from_millis(5_000),
            recovery: RecoveryPolicy::default(),
        }
    }
}

impl ClientOptions {
    /// Reconnects allowed after a lost connection before giving up.
    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    /// Base delay of the exponential backoff and its ceiling.
    pub fn with_reconnect_delay(mut self, base: Duration, max: Duration) -> Self {
        self.reconnect_delay = base;
        self.max_reconnect_delay = max;
        self
    }

    /// Enables the heartbeat with the given ping cadence and pong deadline.
    pub fn with_heartbeat(mut self, ping_interval: Duration, pong_timeout: Duration) -> Self {
        self.ping_interval = ping_interval;
        self.pong_timeout = pong_timeout;
        self
    }

    /// How long a single open may take.
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Largest outbound frame, in bytes. Larger sends are rejected.
    pub fn with_max_message_size(mut self, bytes: usize) -> Self {
        self.max_message_size = bytes;
        self
    }

    /// Frames kept while disconnected; the oldest is dropped on overflow.
    pub fn with_max_queue_size(mut self, frames: usize) -> Self {
        self.max_queue_size = frames;
        self
    }

    /// Turns the heartbeat on or off, keeping its timings.
    pub fn with_heartbeat_enabled(mut self, enabled: bool) -> Self {
        self.enable_heartbeat = enabled;
        self
    }

    /// Whether lost connections are retried automatically.
    pub fn with_auto_reconnect(mut self, enabled: bool) -> Self {
        self.enable_auto_reconnect = enabled;
        self
    }

    /// Whether failures go through the per-kind recovery strategies.
    pub fn with_error_recovery(mut self, enabled: bool) -> Self {
        self.enable_error_recovery = enabled;
        self
    }

    /// Sets the consecutive-error backoff rule.
    pub fn with_error_backoff(mut self, threshold: u32, multiplier: u32) -> Self {
        self.error_threshold = threshold;
        self.error_backoff_multiplier = multiplier;
        self
    }

    /// How often `is_online` is polled while waiting for the network.
    pub fn with_offline_poll_interval(mut self, interval: Duration) -> Self {
        self.offline_poll_interval = interval;
        self
    }

    /// Replaces the per-kind recovery strategies.
    pub fn with_recovery_policy(mut self, recovery: RecoveryPolicy) -> Self {
        self.recovery = recovery;
        self
    }

    /// Reconnect policy derived from these options.
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts: self.max_reconnect_attempts,
            base_delay: self.reconnect_delay,
            max_delay: self.max_reconnect_delay,
            error_threshold: self.error_threshold,
            error_multiplier: self.error_backoff_multiplier,
        }
    }

    /// Rejects settings that would spin or never fire.
    pub fn validate(&self) -> Result<(), ClientError> {
        let zero_durations = [
            ("ping_interval", self.ping_interval),
            ("pong_timeout", self.pong_timeout),
            ("connection_timeout", self.connection_timeout),
            ("max_reconnect_delay", self.max_reconnect_delay),
            ("offline_poll_interval", self.offline_poll_interval),
        ];
        for (field, value) in zero_durations {
            if value.is_zero() {
                return Err(ClientError::InvalidConfig(format!("{field} must be > 0")));
            }
        }
        if self.reconnect_delay > self.max_reconnect_delay {
            return Err(ClientError::InvalidConfig(
                "reconnect_delay must not exceed max_reconnect_delay".to_string(),
            ));
        }
        if self.max_queue_size == 0 {
            return Err(ClientError::InvalidConfig(
                "max_queue_size must be > 0".to_string(),
            ));
        }
        if self.max_message_size == 0 {
            return Err(ClientError::InvalidConfig(
                "max_message_size must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::ClientOptions;
    use crate::stream::error::ClientError;

    #[test]
    fn defaults_match_documented_values() {
        let options = ClientOptions::default();
        assert_eq!(options.max_reconnect_attempts, 10);
        assert_eq!(options.reconnect_delay, Duration::from_secs(1));
        assert_eq!(options.max_reconnect_delay, Duration::from_secs(30));
        assert_eq!(options.ping_interval, Duration::from_secs(30));
        assert_eq!(options.pong_timeout, Duration::from_secs(10));
        assert_eq!(options.connection_timeout, Duration::from_secs(10));
        assert_eq!(options.max_message_size, 65_536);
        assert!(options.enable_heartbeat);
        assert!(options.enable_auto_reconnect);
        assert!(options.enable_error_recovery);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let options: ClientOptions =
            serde_json::from_str(r#"{"max_reconnect_attempts":3,"reconnect_delay_ms":100}"#)
                .expect("parse");
        assert_eq!(options.max_reconnect_attempts, 3);
        assert_eq!(options.reconnect_delay, Duration::from_millis(100));
        assert_eq!(options.ping_interval, Duration::from_secs(30));
    }

    #[test]
    fn reconnect_policy_mirrors_options() {
        let options = ClientOptions::default()
            .with_max_reconnect_attempts(3)
            .with_reconnect_delay(Duration::from_millis(100), Duration::from_secs(5))
            .with_error_backoff(5, 4);
        let policy = options.reconnect_policy();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base_delay, Duration::from_millis(100));
        assert_eq!(policy.max_delay, Duration::from_secs(5));
        assert_eq!(policy.error_threshold, 5);
        assert_eq!(policy.error_multiplier, 4);
    }

    #[test]
    fn validation_rejects_inverted_delays() {
        let options = ClientOptions::default()
            .with_reconnect_delay(Duration::from_secs(10), Duration::from_secs(1));
        assert!(matches!(
            options.validate(),
            Err(ClientError::InvalidConfig(_))
        ));
    }

    #[test]
    fn validation_rejects_zero_ping_interval() {
        let options =
            ClientOptions::default().with_heartbeat(Duration::ZERO, Duration::from_secs(1));
        assert!(options.validate().is_err());
    }

    #[test]
    fn validation_rejects_empty_queue() {
        let options = ClientOptions::default().with_max_queue_size(0);
        assert!(options.validate().is_err());
    }
}
