use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Session state of one verification run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    Pending,
    Grammar,
    Schema,
    Execution,
    Repairing,
    Done,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Done)
    }

    /// Legal edges: PENDING -> GRAMMAR -> SCHEMA -> EXECUTION -> (REPAIRING -> GRAMMAR) | DONE.
    /// GRAMMAR may also go straight to REPAIRING or DONE when a critical
    /// grammar finding skips the remaining stages.
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Pending, Grammar)
                | (Grammar, Schema)
                | (Grammar, Repairing)
                | (Grammar, Done)
                | (Schema, Execution)
                | (Execution, Repairing)
                | (Execution, Done)
                | (Repairing, Grammar)
                | (Repairing, Done)
        )
    }

    /// Move to `next`, logging the edge. An illegal edge is a programming error
    /// and is caught in debug builds.
    pub fn advance(&mut self, next: SessionState) {
        debug_assert!(
            self.can_transition_to(next),
            "illegal transition {} -> {}",
            self,
            next
        );
        debug!("Session state {} -> {}", self, next);
        *self = next;
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Pending => "PENDING",
            SessionState::Grammar => "GRAMMAR",
            SessionState::Schema => "SCHEMA",
            SessionState::Execution => "EXECUTION",
            SessionState::Repairing => "REPAIRING",
            SessionState::Done => "DONE",
        };
        write!(f, "{}", name)
    }
}
