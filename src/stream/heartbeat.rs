//! Ping/pong bookkeeping for detecting silently dead links.
//!
//! This type only tracks state; the client owns the interval and timeout
//! timers and consults it when they fire.

use std::time::Duration;

use tokio::time::Instant;

use crate::stream::proto::ControlFrame;

#[derive(Clone, Debug, Default)]
pub struct HeartbeatState {
    /// Timestamp carried by the ping still waiting for its pong.
    outstanding: Option<u64>,
    last_ping_ms: Option<u64>,
    last_pong_ms: Option<u64>,
    last_pong_at: Option<Instant>,
}

impl HeartbeatState {
    /// Starts a ping cycle, or returns `None` while one is still pending.
    pub fn begin_ping(&mut self, now_ms: u64) -> Option<ControlFrame> {
        if self.outstanding.is_some() {
            return None;
        }
        self.outstanding = Some(now_ms);
        self.last_ping_ms = Some(now_ms);
        Some(ControlFrame::ping(now_ms))
    }

    /// Applies a pong. Returns true if it answered the outstanding ping.
    ///
    /// A pong without a timestamp is accepted as an answer.
    pub fn on_pong(&mut self, timestamp: Option<u64>, now_ms: u64) -> bool {
        let Some(expected) = self.outstanding else {
            return false;
        };
        if timestamp.is_some_and(|ts| ts != expected) {
            return false;
        }
        self.outstanding = None;
        self.last_pong_ms = Some(now_ms);
        self.last_pong_at = Some(Instant::now());
        true
    }

    pub fn is_awaiting_pong(&self) -> bool {
        self.outstanding.is_some()
    }

    /// Drops any outstanding ping. Timestamps survive for diagnostics.
    pub fn stop(&mut self) {
        self.outstanding = None;
    }

    /// Starts bookkeeping for a fresh link. The previous link's pong no
    /// longer says anything about liveness; the reported timestamps stay.
    pub fn reset(&mut self) {
        self.outstanding = None;
        self.last_pong_at = None;
    }

    pub fn last_ping_ms(&self) -> Option<u64> {
        self.last_ping_ms
    }

    pub fn last_pong_ms(&self) -> Option<u64> {
        self.last_pong_ms
    }

    pub fn since_last_pong(&self) -> Option<Duration> {
        self.last_pong_at.map(|at| at.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use super::HeartbeatState;
    use crate::stream::proto::ControlFrame;

    #[test]
    fn only_one_ping_outstanding() {
        let mut state = HeartbeatState::default();
        assert_eq!(state.begin_ping(10), Some(ControlFrame::ping(10)));
        assert_eq!(state.begin_ping(20), None);
        assert!(state.is_awaiting_pong());
    }

    #[test]
    fn matching_pong_completes_cycle() {
        let mut state = HeartbeatState::default();
        state.begin_ping(10);
        assert!(!state.on_pong(Some(11), 12));
        assert!(state.is_awaiting_pong());
        assert!(state.on_pong(Some(10), 12));
        assert!(!state.is_awaiting_pong());
        assert_eq!(state.last_pong_ms(), Some(12));
        assert!(state.since_last_pong().is_some());
    }

    #[test]
    fn unsolicited_pong_is_ignored() {
        let mut state = HeartbeatState::default();
        assert!(!state.on_pong(None, 5));
        assert_eq!(state.last_pong_ms(), None);
    }

    #[test]
    fn stop_clears_outstanding_ping() {
        let mut state = HeartbeatState::default();
        state.begin_ping(1);
        state.stop();
        assert!(!state.is_awaiting_pong());
        assert_eq!(state.last_ping_ms(), Some(1));
        assert_eq!(state.begin_ping(2), Some(ControlFrame::ping(2)));
    }

    #[test]
    fn reset_forgets_the_previous_links_pong() {
        let mut state = HeartbeatState::default();
        state.begin_ping(1);
        assert!(state.on_pong(Some(1), 2));
        state.begin_ping(3);
        state.reset();
        assert!(!state.is_awaiting_pong());
        assert_eq!(state.since_last_pong(), None);
        assert_eq!(state.last_pong_ms(), Some(2));
    }
}
