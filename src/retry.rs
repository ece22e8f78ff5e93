//! Reconnect backoff and timeout utilities.
//!
//! The helpers in this module are transport-agnostic: the client asks the
//! policy for a delay and drives the actual timers itself.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::serde_millis;

/// Policy controlling reconnect attempts and exponential backoff behavior.
///
/// Immutable once the client has been constructed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Maximum number of automatic reconnect attempts before giving up.
    pub max_attempts: u32,
    /// Delay used before the first reconnect attempt.
    #[serde(rename = "base_delay_ms", with = "serde_millis")]
    pub base_delay: Duration,
    /// Upper bound for backoff growth.
    #[serde(rename = "max_delay_ms", with = "serde_millis")]
    pub max_delay: Duration,
    /// Consecutive errors above which the backoff is multiplied again.
    pub error_threshold: u32,
    /// Extra factor applied once `error_threshold` is exceeded.
    pub error_multiplier: u32,
}

impl ReconnectPolicy {
    /// Computes the delay to apply before the given reconnect attempt.
    ///
    /// `attempt` is 1-based. The result is
    /// `min(base * 2^(attempt-1) * m, max)` where `m` is `error_multiplier`
    /// when `consecutive_errors > error_threshold` and `1` otherwise.
    pub fn delay_for_attempt(&self, attempt: u32, consecutive_errors: u32) -> Duration {
        let mut delay = self.base_delay;
        for _ in 1..attempt.max(1) {
            delay = delay.saturating_mul(2);
            if delay >= self.max_delay {
                break;
            }
        }
        if consecutive_errors > self.error_threshold {
            delay = delay.saturating_mul(self.error_multiplier.max(1));
        }
        std::cmp::min(delay, self.max_delay)
    }

    /// Returns true when `attempts` has used up the automatic budget.
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_millis(30_000),
            error_threshold: 3,
            error_multiplier: 2,
        }
    }
}

/// Applies a timeout to an async computation.
pub async fn with_timeout<T, Fut>(
    timeout: Duration,
    future: Fut,
) -> Result<T, tokio::time::error::Elapsed>
where
    Fut: Future<Output = T>,
{
    tokio::time::timeout(timeout, future).await
}
