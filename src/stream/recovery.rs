//! Failure classification and bounded recovery strategies.
//!
//! [`classify`] is a pure mapping from what went wrong to an [`ErrorKind`].
//! [`RecoveryRegistry`] keeps per-kind attempt counters and decides, for each
//! failure, whether the client may retry automatically.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::serde_millis;
use crate::stream::error::ErrorKind;
use crate::stream::proto::now_ms;
use crate::stream::transport::{
    CloseInfo, CLOSE_ABNORMAL, CLOSE_BAD_GATEWAY, CLOSE_GOING_AWAY, CLOSE_INTERNAL_ERROR,
    CLOSE_POLICY_VIOLATION, CLOSE_PONG_TIMEOUT, CLOSE_SERVICE_RESTART, CLOSE_TRY_AGAIN_LATER,
};

/// Number of error records kept for diagnostics.
pub const ERROR_HISTORY_LIMIT: usize = 50;

/// Application close codes servers use for rejected credentials.
const AUTH_CLOSE_CODES: [u16; 5] = [CLOSE_POLICY_VIOLATION, 4001, 4003, 4401, 4403];

const SERVER_CLOSE_CODES: [u16; 5] = [
    CLOSE_GOING_AWAY,
    CLOSE_INTERNAL_ERROR,
    CLOSE_SERVICE_RESTART,
    CLOSE_TRY_AGAIN_LATER,
    CLOSE_BAD_GATEWAY,
];

/// What broke a connection or a connection attempt.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Failure {
    /// The link closed, with or without a close frame.
    Closed(CloseInfo),
    /// Opening the link failed; `status` is the HTTP status of a rejected
    /// upgrade.
    OpenFailed { status: Option<u16>, message: String },
    /// Opening the link exceeded the connection timeout.
    OpenTimedOut,
    /// No pong arrived within the pong timeout.
    HeartbeatTimedOut,
}

impl Failure {
    pub fn close_info(&self) -> CloseInfo {
        match self {
            Failure::Closed(info) => info.clone(),
            Failure::OpenFailed { message, .. } => CloseInfo::abnormal(message.clone()),
            Failure::OpenTimedOut => CloseInfo::abnormal("connection timeout"),
            Failure::HeartbeatTimedOut => CloseInfo::new(CLOSE_PONG_TIMEOUT, "pong timeout"),
        }
    }
}

/// Maps a failure to its semantic category.
///
/// An offline network trumps every other signal.
pub fn classify(failure: &Failure, online: bool) -> ErrorKind {
    if !online {
        return ErrorKind::Network;
    }
    match failure {
        Failure::Closed(info) if AUTH_CLOSE_CODES.contains(&info.code) => ErrorKind::Auth,
        Failure::Closed(info) if SERVER_CLOSE_CODES.contains(&info.code) => ErrorKind::Server,
        Failure::Closed(info) if info.code == CLOSE_ABNORMAL => ErrorKind::Network,
        Failure::Closed(info) if info.code == CLOSE_PONG_TIMEOUT => ErrorKind::Network,
        Failure::Closed(_) => ErrorKind::Unknown,
        Failure::OpenFailed {
            status: Some(401 | 403),
            ..
        } => ErrorKind::Auth,
        Failure::OpenFailed {
            status: Some(500..=599),
            ..
        } => ErrorKind::Server,
        Failure::OpenFailed {
            status: Some(_), ..
        } => ErrorKind::Unknown,
        Failure::OpenFailed { status: None, .. } => ErrorKind::Network,
        Failure::OpenTimedOut | Failure::HeartbeatTimedOut => ErrorKind::Network,
    }
}

/// Step executed when a strategy is invoked.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStep {
    /// Retry with backoff.
    Retry,
    /// Retry once the network reports online.
    CheckNetwork,
    /// Do not retry; ask the host for fresh credentials.
    RequestAuth,
}

/// Bounded recovery plan for one [`ErrorKind`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RecoveryStrategy {
    /// Invocations allowed before the kind is considered unrecoverable.
    pub max_attempts: u32,
    /// Minimum reconnect delay for failures of this kind.
    #[serde(rename = "delay_ms", with = "serde_millis")]
    pub delay: Duration,
    pub step: RecoveryStep,
}

/// Strategy table, one entry per [`ErrorKind`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryPolicy {
    pub auth: RecoveryStrategy,
    pub network: RecoveryStrategy,
    pub server: RecoveryStrategy,
    pub unknown: RecoveryStrategy,
}

impl RecoveryPolicy {
    pub fn strategy(&self, kind: ErrorKind) -> &RecoveryStrategy {
        match kind {
            ErrorKind::Auth => &self.auth,
            ErrorKind::Network => &self.network,
            ErrorKind::Server => &self.server,
            ErrorKind::Unknown => &self.unknown,
        }
    }
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            auth: RecoveryStrategy {
                max_attempts: 1,
                delay: Duration::ZERO,
                step: RecoveryStep::RequestAuth,
            },
            network: RecoveryStrategy {
                max_attempts: 10,
                delay: Duration::ZERO,
                step: RecoveryStep::CheckNetwork,
            },
            server: RecoveryStrategy {
                max_attempts: 5,
                delay: Duration::from_millis(2_000),
                step: RecoveryStep::Retry,
            },
            unknown: RecoveryStrategy {
                max_attempts: 3,
                delay: Duration::ZERO,
                step: RecoveryStep::Retry,
            },
        }
    }
}

/// One classified failure.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub at_ms: u64,
    /// Value of the kind's counter after this failure.
    pub attempt: u32,
}

/// Outcome of invoking a kind's strategy.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RecoveryDecision {
    /// Retry no sooner than `min_delay`.
    Retry { min_delay: Duration },
    /// Retry once the network is back.
    AwaitNetwork { min_delay: Duration },
    /// Stop and signal that credentials need attention.
    NeedsAuth,
    /// The kind used up its attempts.
    Exhausted { attempts: u32 },
}

/// Per-kind counters plus the consecutive error streak.
#[derive(Clone, Debug)]
pub struct RecoveryRegistry {
    policy: RecoveryPolicy,
    attempts: HashMap<ErrorKind, u32>,
    consecutive_errors: u32,
    history: VecDeque<ErrorRecord>,
}

impl RecoveryRegistry {
    pub fn new(policy: RecoveryPolicy) -> Self {
        Self {
            policy,
            attempts: HashMap::new(),
            consecutive_errors: 0,
            history: VecDeque::new(),
        }
    }

    /// Records a failure of `kind` without consulting a strategy.
    pub fn record(&mut self, kind: ErrorKind) -> ErrorRecord {
        self.consecutive_errors = self.consecutive_errors.saturating_add(1);
        let record = ErrorRecord {
            kind,
            at_ms: now_ms(),
            attempt: self.attempts_for(kind),
        };
        if self.history.len() == ERROR_HISTORY_LIMIT {
            self.history.pop_front();
        }
        self.history.push_back(record);
        record
    }

    /// Invokes the strategy for `kind`, bumping its counter.
    ///
    /// `online` is the current network status.
    pub fn invoke(&mut self, kind: ErrorKind, online: bool) -> RecoveryDecision {
        let counter = self.attempts.entry(kind).or_insert(0);
        *counter = counter.saturating_add(1);
        let attempts = *counter;

        let strategy = self.policy.strategy(kind);
        if attempts > strategy.max_attempts {
            return RecoveryDecision::Exhausted {
                attempts: attempts - 1,
            };
        }
        match strategy.step {
            RecoveryStep::RequestAuth => RecoveryDecision::NeedsAuth,
            RecoveryStep::CheckNetwork if !online => RecoveryDecision::AwaitNetwork {
                min_delay: strategy.delay,
            },
            RecoveryStep::CheckNetwork | RecoveryStep::Retry => RecoveryDecision::Retry {
                min_delay: strategy.delay,
            },
        }
    }

    pub fn attempts_for(&self, kind: ErrorKind) -> u32 {
        self.attempts.get(&kind).copied().unwrap_or(0)
    }

    pub fn max_attempts_for(&self, kind: ErrorKind) -> u32 {
        self.policy.strategy(kind).max_attempts
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }

    /// Called on every successful connect.
    pub fn reset_consecutive(&mut self) {
        self.consecutive_errors = 0;
    }

    /// Called on manual reconnect: every counter starts over.
    pub fn reset_all(&mut self) {
        self.attempts.clear();
        self.consecutive_errors = 0;
    }

    pub fn history(&self) -> Vec<ErrorRecord> {
        self.history.iter().copied().collect()
    }
}
