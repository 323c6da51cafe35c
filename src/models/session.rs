//! Per-session counters shared between the transport and the pipeline.
//!
//! The turn-skip mechanism is an integer counter, never a flag: routing
//! operations may stack (classifier routing plus an escalation in the same
//! window), and a boolean silently loses the second one.

use std::time::Duration;

use super::routing::SubjectRoute;

/// Filler escalation saturates here; level 3 yields no more fillers.
const FILLER_LEVEL_MAX: u8 = 3;

/// Mutable per-session state.
///
/// One instance exists per live session id, owned by the session registry
/// and mutated only under the session's own lock.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub session_id: String,
    /// Pending user turns the transport must drop (pre-incremented at
    /// routing, decremented when the routed turn is consumed).
    pub turn_skip_counter: u32,
    /// Subject of the most recent routing decision.
    pub current_subject: Option<SubjectRoute>,
    /// Index into the filler delay ladder, 0..=3.
    pub filler_level: u8,
    /// Set once a human teacher has been pulled in.
    pub escalated: bool,
    /// Total dispatched turns for this session.
    pub turn_count: u64,
}

impl SessionState {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            turn_skip_counter: 0,
            current_subject: None,
            filler_level: 0,
            escalated: false,
            turn_count: 0,
        }
    }

    /// True while the transport must suppress incoming user turns.
    pub fn should_skip_turn(&self) -> bool {
        self.turn_skip_counter > 0
    }

    /// Pre-increment the skip counter for a routing decision.
    pub fn mark_routing(&mut self) {
        self.turn_skip_counter += 1;
    }

    /// Consume one pending skip; no-op at zero (the counter never goes
    /// negative).
    pub fn consume_skip(&mut self) {
        if self.turn_skip_counter > 0 {
            self.turn_skip_counter -= 1;
        }
    }

    /// Delay before the transport may emit the next stall-speech filler.
    /// Returns `None` once the ladder is exhausted.
    pub fn next_filler_delay(&self) -> Option<Duration> {
        match self.filler_level {
            0 => Some(Duration::from_millis(500)),
            1 => Some(Duration::from_millis(1500)),
            2 => Some(Duration::from_millis(3000)),
            _ => None,
        }
    }

    /// Advance the filler ladder, saturating at the top.
    pub fn advance_filler(&mut self) {
        self.filler_level = (self.filler_level + 1).min(FILLER_LEVEL_MAX);
    }

    /// Reset the ladder after the job completes.
    pub fn reset_filler(&mut self) {
        self.filler_level = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skip_counter_stacks_and_drains() {
        let mut s = SessionState::new("s1");
        assert!(!s.should_skip_turn());

        s.mark_routing();
        s.mark_routing();
        assert_eq!(s.turn_skip_counter, 2);
        assert!(s.should_skip_turn());

        s.consume_skip();
        assert!(s.should_skip_turn());
        s.consume_skip();
        assert!(!s.should_skip_turn());
    }

    #[test]
    fn consume_skip_at_zero_is_a_noop() {
        let mut s = SessionState::new("s1");
        s.consume_skip();
        s.consume_skip();
        assert_eq!(s.turn_skip_counter, 0);
    }

    #[test]
    fn filler_ladder_progresses_then_runs_dry() {
        let mut s = SessionState::new("s1");
        assert_eq!(s.next_filler_delay(), Some(Duration::from_millis(500)));

        s.advance_filler();
        assert_eq!(s.next_filler_delay(), Some(Duration::from_millis(1500)));

        s.advance_filler();
        assert_eq!(s.next_filler_delay(), Some(Duration::from_millis(3000)));

        s.advance_filler();
        assert_eq!(s.next_filler_delay(), None);
    }

    #[test]
    fn advance_filler_saturates() {
        let mut s = SessionState::new("s1");
        for _ in 0..10 {
            s.advance_filler();
        }
        assert_eq!(s.filler_level, 3);
        assert_eq!(s.next_filler_delay(), None);
    }

    #[test]
    fn reset_filler_returns_to_the_first_rung() {
        let mut s = SessionState::new("s1");
        s.advance_filler();
        s.advance_filler();
        s.reset_filler();
        assert_eq!(s.filler_level, 0);
        assert_eq!(s.next_filler_delay(), Some(Duration::from_millis(500)));
    }
}
