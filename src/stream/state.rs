//! Connection lifecycle states and the permitted transitions between them.

use std::collections::VecDeque;
use std::fmt;

use serde::Serialize;

/// Number of transitions retained in [`TransitionLog`].
pub const TRANSITION_HISTORY_LIMIT: usize = 50;

/// Lifecycle state of the client. Exactly one is active at a time.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Initial state, and terminal after a manual disconnect.
    Disconnected,
    Connecting,
    Connected,
    /// Waiting for a scheduled reconnect (or for the network to return).
    Reconnecting,
    /// Automatic recovery gave up; only a manual reconnect leaves this state.
    Failed,
}

impl ConnectionState {
    /// Returns whether the state machine may move from `self` to `next`.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;

        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connecting, Reconnecting)
                | (Connecting, Failed)
                | (Connecting, Disconnected)
                | (Connected, Reconnecting)
                | (Connected, Disconnected)
                | (Reconnecting, Connecting)
                | (Reconnecting, Failed)
                | (Reconnecting, Disconnected)
                | (Failed, Connecting)
                | (Failed, Disconnected)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Failed => "failed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recorded state change.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub struct StateTransition {
    pub from: ConnectionState,
    pub to: ConnectionState,
    /// Wall-clock time of the transition, milliseconds since the Unix epoch.
    pub at_ms: u64,
}

/// Bounded history of recent transitions, oldest first.
#[derive(Clone, Debug, Default)]
pub struct TransitionLog {
    entries: VecDeque<StateTransition>,
}

impl TransitionLog {
    pub fn record(&mut self, transition: StateTransition) {
        if self.entries.len() == TRANSITION_HISTORY_LIMIT {
            self.entries.pop_front();
        }
        self.entries.push_back(transition);
    }

    pub fn to_vec(&self) -> Vec<StateTransition> {
        self.entries.iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::ConnectionState::*;
    use super::*;

    const ALL: [ConnectionState; 5] = [Disconnected, Connecting, Connected, Reconnecting, Failed];

    #[test]
    fn failed_cannot_jump_to_connected() {
        assert!(!Failed.can_transition_to(Connected));
        assert!(Failed.can_transition_to(Connecting));
    }

    #[test]
    fn only_connecting_reaches_connected() {
        for from in ALL {
            assert_eq!(from.can_transition_to(Connected), from == Connecting, "{from}");
        }
    }

    #[test]
    fn a_live_connection_fails_only_through_reconnecting() {
        assert!(!Connected.can_transition_to(Failed));
        assert!(Connected.can_transition_to(Reconnecting));
        assert!(Reconnecting.can_transition_to(Failed));
    }

    #[test]
    fn self_transitions_are_not_listed() {
        for state in ALL {
            assert!(!state.can_transition_to(state));
        }
    }

    #[test]
    fn every_state_can_be_disconnected_manually() {
        for from in [Connecting, Connected, Reconnecting, Failed] {
            assert!(from.can_transition_to(Disconnected), "{from}");
        }
    }

    #[test]
    fn transition_log_is_bounded() {
        let mut log = TransitionLog::default();
        for at_ms in 0..(TRANSITION_HISTORY_LIMIT as u64 + 5) {
            log.record(StateTransition {
                from: Disconnected,
                to: Connecting,
                at_ms,
            });
        }
        assert_eq!(log.len(), TRANSITION_HISTORY_LIMIT);
        assert_eq!(log.to_vec()[0].at_ms, 5);
    }
}
