//! Read-only health evaluation and remedy suggestions.

use std::time::Duration;

use serde::Serialize;

use crate::stream::state::ConnectionState;

/// Longest silence since the last pong that still counts as healthy.
pub const HEALTHY_PONG_WINDOW: Duration = Duration::from_secs(60);
/// Consecutive errors at or above which the link is unhealthy.
pub const UNHEALTHY_ERROR_STREAK: u32 = 3;

const RELOAD_ERROR_STREAK: u32 = 5;
const SUPPORT_ERROR_STREAK: u32 = 10;
const SUPPORT_ERROR_RATE: f64 = 0.1;
const SUPPORT_MIN_MESSAGES: u64 = 10;

/// Cumulative counters for the lifetime of a client.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ConnectionStats {
    pub connections: u64,
    pub reconnections: u64,
    pub messages_sent: u64,
    pub messages_received: u64,
    /// Frames evicted from a full outbound queue.
    pub messages_dropped: u64,
    pub errors: u64,
    pub last_connected_ms: Option<u64>,
    pub last_disconnected_ms: Option<u64>,
    /// Time spent connected, excluding the current session.
    #[serde(rename = "connected_duration_ms", with = "crate::serde_millis")]
    pub connected_duration: Duration,
}

impl ConnectionStats {
    pub fn total_messages(&self) -> u64 {
        self.messages_sent + self.messages_received
    }

    /// Errors per message, `0.0` before any traffic.
    pub fn error_rate(&self) -> f64 {
        match self.total_messages() {
            0 => 0.0,
            total => self.errors as f64 / total as f64,
        }
    }
}

/// Point-in-time health report.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HealthReport {
    pub is_connected: bool,
    pub state: ConnectionState,
    pub consecutive_errors: u32,
    pub reconnect_attempts: u32,
    pub queue_length: usize,
    pub queue_capacity: usize,
    #[serde(skip)]
    pub time_since_last_pong: Option<Duration>,
    pub is_online: bool,
    pub is_healthy: bool,
    pub error_rate: f64,
    pub total_messages: u64,
}

/// Raw inputs gathered by the client under its lock.
#[derive(Clone, Debug)]
pub(crate) struct HealthInputs<'a> {
    pub state: ConnectionState,
    pub consecutive_errors: u32,
    pub reconnect_attempts: u32,
    pub queue_length: usize,
    pub queue_capacity: usize,
    pub time_since_last_pong: Option<Duration>,
    pub is_online: bool,
    pub stats: &'a ConnectionStats,
}

impl HealthReport {
    pub(crate) fn evaluate(inputs: HealthInputs<'_>) -> Self {
        let is_connected = inputs.state == ConnectionState::Connected;
        // No pong yet means the heartbeat has not completed a cycle, not
        // that the link is stale.
        let pong_fresh = inputs
            .time_since_last_pong
            .map_or(true, |elapsed| elapsed < HEALTHY_PONG_WINDOW);
        Self {
            is_connected,
            state: inputs.state,
            consecutive_errors: inputs.consecutive_errors,
            reconnect_attempts: inputs.reconnect_attempts,
            queue_length: inputs.queue_length,
            queue_capacity: inputs.queue_capacity,
            time_since_last_pong: inputs.time_since_last_pong,
            is_online: inputs.is_online,
            is_healthy: is_connected
                && inputs.consecutive_errors < UNHEALTHY_ERROR_STREAK
                && pong_fresh,
            error_rate: inputs.stats.error_rate(),
            total_messages: inputs.stats.total_messages(),
        }
    }
}

/// Remedies the diagnostics can suggest.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    CheckNetwork,
    /// Left to the UI; the client only emits `RecommendPageReload`.
    ReloadPage,
    CheckServer,
    ClearQueue,
    ContactSupport,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    Medium,
    Low,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Recommendation {
    pub action: RecoveryAction,
    pub priority: Priority,
    pub message: String,
}

/// Derives suggestions from a report, highest priority first.
///
/// Rules are independent; several may apply at once.
pub fn recommend(report: &HealthReport) -> Vec<Recommendation> {
    let mut out: Vec<Recommendation> = Vec::new();
    let mut push = |action, priority, message: String| {
        if !out.iter().any(|existing| existing.action == action) {
            out.push(Recommendation {
                action,
                priority,
                message,
            });
        }
    };

    if !report.is_online {
        push(
            RecoveryAction::CheckNetwork,
            Priority::High,
            "Check your internet connection.".to_string(),
        );
    }
    if report.state == ConnectionState::Failed {
        push(
            RecoveryAction::CheckServer,
            Priority::High,
            "The server could not be reached. Check that it is running.".to_string(),
        );
    }
    if report.state == ConnectionState::Failed || report.consecutive_errors >= RELOAD_ERROR_STREAK
    {
        push(
            RecoveryAction::ReloadPage,
            Priority::Medium,
            "Reload the page to start a fresh session.".to_string(),
        );
    }
    if report.queue_length > 0 && report.queue_length * 2 >= report.queue_capacity {
        push(
            RecoveryAction::ClearQueue,
            Priority::Medium,
            format!("{} messages are waiting to be sent.", report.queue_length),
        );
    }
    if report.consecutive_errors >= SUPPORT_ERROR_STREAK
        || (report.total_messages >= SUPPORT_MIN_MESSAGES && report.error_rate > SUPPORT_ERROR_RATE)
    {
        push(
            RecoveryAction::ContactSupport,
            Priority::Low,
            "Problems persist. Contact support.".to_string(),
        );
    }

    out.sort_by_key(|recommendation| recommendation.priority);
    out
}
