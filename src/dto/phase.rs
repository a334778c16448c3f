use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::state::state_machine::SessionPhase;

/// Publicly visible session phase exposed to clients (REST/SSE/WebSocket).
#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VisiblePhase {
    /// No routine has run yet.
    NotStarted,
    /// The show is live.
    Running,
    /// The director paused the show.
    Paused,
    /// An intermission is active.
    Break,
    /// The day is closed.
    Completed,
}

impl From<SessionPhase> for VisiblePhase {
    fn from(value: SessionPhase) -> Self {
        match value {
            SessionPhase::NotStarted => VisiblePhase::NotStarted,
            SessionPhase::Running => VisiblePhase::Running,
            SessionPhase::Paused => VisiblePhase::Paused,
            SessionPhase::Break => VisiblePhase::Break,
            SessionPhase::Completed => VisiblePhase::Completed,
        }
    }
}

impl From<VisiblePhase> for SessionPhase {
    fn from(value: VisiblePhase) -> Self {
        match value {
            VisiblePhase::NotStarted => SessionPhase::NotStarted,
            VisiblePhase::Running => SessionPhase::Running,
            VisiblePhase::Paused => SessionPhase::Paused,
            VisiblePhase::Break => SessionPhase::Break,
            VisiblePhase::Completed => SessionPhase::Completed,
        }
    }
}
