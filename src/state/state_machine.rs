use std::time::Instant;

use thiserror::Error;
use uuid::Uuid;

/// High-level phases a competition session can be in over one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// No routine has run yet; the routine list can still be replaced.
    NotStarted,
    /// The show is live and exactly one routine is current.
    Running,
    /// The director paused the show without leaving the current routine.
    Paused,
    /// An intermission is active; no routine is current.
    Break,
    /// Every routine has been dealt with; the session is closed.
    Completed,
}

/// Events that can be applied to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// Move the show forward one routine (`next`), starting it if needed.
    Advance,
    /// Re-open the prior routine (`previous`), also out of `completed`.
    Rewind,
    /// Mark the current routine withdrawn and move forward (`skip`).
    Skip,
    /// Halt the clock without touching the current routine.
    Pause,
    /// Return from a pause to the live show.
    Resume,
    /// Enter an intermission.
    BreakStart,
    /// Leave the intermission and go back to the live show.
    BreakEnd,
    /// Close the session for the day.
    Complete,
}

/// Error returned when attempting to apply an invalid transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while in {from:?}")]
pub struct InvalidTransition {
    /// The phase the state machine was in when the invalid event was received.
    pub from: SessionPhase,
    /// The event that cannot be applied from this phase.
    pub event: SessionEvent,
}

/// Errors that can occur when planning a state machine transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    /// A transition is already pending and must be applied or aborted.
    AlreadyPending,
    /// The requested transition is not valid from the current phase.
    InvalidTransition(InvalidTransition),
}

/// Errors that can occur when applying a planned state machine transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyError {
    /// No transition is currently pending.
    NoPending,
    /// Plan ID does not match the pending plan.
    IdMismatch {
        /// Expected plan ID.
        expected: PlanId,
        /// Provided plan ID.
        got: PlanId,
    },
    /// State machine phase changed since the plan was created.
    PhaseMismatch {
        /// Phase when plan was created.
        expected: SessionPhase,
        /// Current phase.
        actual: SessionPhase,
    },
    /// State machine version changed since the plan was created.
    VersionMismatch {
        /// Version when plan was created.
        expected: usize,
        /// Current version.
        actual: usize,
    },
}

/// Errors that can occur when aborting a planned state machine transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortError {
    /// No transition is currently pending.
    NoPending,
    /// Plan ID does not match the pending plan.
    IdMismatch {
        /// Expected plan ID.
        expected: PlanId,
        /// Provided plan ID.
        got: PlanId,
    },
}

/// Unique identifier for a planned state transition.
pub type PlanId = Uuid;

/// A planned state machine transition that has been validated but not yet applied.
#[derive(Debug, Clone)]
pub struct Plan {
    /// Unique identifier for this plan.
    pub id: PlanId,
    /// Phase the state machine is currently in.
    pub from: SessionPhase,
    /// Phase the state machine will transition to.
    pub to: SessionPhase,
    /// Event that triggered this transition.
    pub event: SessionEvent,
    /// Version number after applying this transition.
    pub version_next: usize,
    /// Timestamp when this plan was created.
    pub pending_since: Instant,
}

/// Snapshot of the current state machine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseSnapshot {
    /// Current phase of the state machine.
    pub phase: SessionPhase,
    /// Version number of the state machine (increments on each transition).
    pub version: usize,
    /// Pending transition phase, if a transition is planned but not yet applied.
    pub pending: Option<SessionPhase>,
}

/// State machine governing one competition session's execution flow.
///
/// Transitions are planned first so that side effects (routine bookkeeping,
/// persistence) run between validation and commit; a failed or timed-out
/// effect aborts the plan and leaves the phase untouched.
#[derive(Debug, Clone)]
pub struct SessionStateMachine {
    phase: SessionPhase,
    version: usize,
    pending: Option<Plan>,
}

impl Default for SessionStateMachine {
    fn default() -> Self {
        Self {
            phase: SessionPhase::NotStarted,
            version: 0,
            pending: None,
        }
    }
}

impl SessionStateMachine {
    /// Create a new state machine for a session that has not started.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a state machine restored to a known phase, e.g. from a snapshot.
    pub fn restored(phase: SessionPhase) -> Self {
        Self {
            phase,
            version: 0,
            pending: None,
        }
    }

    /// Inspect the current phase.
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Create a snapshot of the current state machine state.
    pub fn snapshot(&self) -> PhaseSnapshot {
        PhaseSnapshot {
            phase: self.phase,
            version: self.version,
            pending: self.pending.as_ref().map(|plan| plan.to),
        }
    }

    /// Plan a transition by validating that the event can be applied from the current phase.
    /// Returns a Plan that can later be applied or aborted.
    pub fn plan(&mut self, event: SessionEvent) -> Result<Plan, PlanError> {
        if self.pending.is_some() {
            return Err(PlanError::AlreadyPending);
        }

        let next = self
            .compute_transition(event)
            .map_err(PlanError::InvalidTransition)?;

        let plan = Plan {
            id: Uuid::new_v4(),
            from: self.phase,
            to: next,
            event,
            version_next: self.version + 1,
            pending_since: Instant::now(),
        };

        self.pending = Some(plan.clone());

        Ok(plan)
    }

    /// Apply a planned transition, moving the state machine to the next phase.
    /// Returns the new phase after the transition.
    pub fn apply(&mut self, plan_id: PlanId) -> Result<SessionPhase, ApplyError> {
        let plan = self.pending.take().ok_or(ApplyError::NoPending)?;

        if plan.id != plan_id {
            let expected_plan_id = plan.id;
            self.pending = Some(plan);
            return Err(ApplyError::IdMismatch {
                expected: expected_plan_id,
                got: plan_id,
            });
        }

        if self.phase != plan.from {
            return Err(ApplyError::PhaseMismatch {
                expected: plan.from,
                actual: self.phase,
            });
        }

        if self.version + 1 != plan.version_next {
            return Err(ApplyError::VersionMismatch {
                expected: plan.version_next,
                actual: self.version + 1,
            });
        }

        self.phase = plan.to;
        self.version = plan.version_next;
        self.pending = None;

        Ok(self.phase)
    }

    /// Abort a planned transition without applying it, returning the state machine to its previous state.
    pub fn abort(&mut self, plan_id: PlanId) -> Result<(), AbortError> {
        let plan = self.pending.as_ref().ok_or(AbortError::NoPending)?;

        if plan.id != plan_id {
            return Err(AbortError::IdMismatch {
                expected: plan.id,
                got: plan_id,
            });
        }

        self.pending = None;
        Ok(())
    }

    /// Compute a transition from an event if the transition is valid.
    fn compute_transition(&self, event: SessionEvent) -> Result<SessionPhase, InvalidTransition> {
        use SessionEvent::*;
        use SessionPhase::*;

        let next = match (self.phase, event) {
            // The very first `next` starts the show.
            (NotStarted, Advance) => Running,
            (Running, Advance | Skip) => Running,
            (Running, Rewind) => Running,
            // Directors may re-run a routine after closing the day.
            (Completed, Rewind) => Running,
            (Running, Pause) => Paused,
            (Paused, Resume) => Running,
            (Running, BreakStart) => Break,
            (Break, BreakEnd) => Running,
            (Running, Complete) => Completed,
            (from, event) => return Err(InvalidTransition { from, event }),
        };

        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(sm: &mut SessionStateMachine, event: SessionEvent) -> SessionPhase {
        let plan = sm.plan(event).unwrap();
        sm.apply(plan.id).unwrap()
    }

    #[test]
    fn initial_state_is_not_started() {
        let sm = SessionStateMachine::new();
        assert_eq!(sm.phase(), SessionPhase::NotStarted);
    }

    #[test]
    fn full_happy_path_through_a_day() {
        let mut sm = SessionStateMachine::new();

        assert_eq!(apply(&mut sm, SessionEvent::Advance), SessionPhase::Running);
        assert_eq!(apply(&mut sm, SessionEvent::Advance), SessionPhase::Running);
        assert_eq!(apply(&mut sm, SessionEvent::Pause), SessionPhase::Paused);
        assert_eq!(apply(&mut sm, SessionEvent::Resume), SessionPhase::Running);
        assert_eq!(
            apply(&mut sm, SessionEvent::BreakStart),
            SessionPhase::Break
        );
        assert_eq!(apply(&mut sm, SessionEvent::BreakEnd), SessionPhase::Running);
        assert_eq!(apply(&mut sm, SessionEvent::Skip), SessionPhase::Running);
        assert_eq!(
            apply(&mut sm, SessionEvent::Complete),
            SessionPhase::Completed
        );
    }

    #[test]
    fn rewind_reopens_a_completed_session() {
        let mut sm = SessionStateMachine::new();
        apply(&mut sm, SessionEvent::Advance);
        apply(&mut sm, SessionEvent::Complete);

        assert_eq!(apply(&mut sm, SessionEvent::Rewind), SessionPhase::Running);
    }

    #[test]
    fn advance_is_refused_while_paused() {
        let mut sm = SessionStateMachine::new();
        apply(&mut sm, SessionEvent::Advance);
        apply(&mut sm, SessionEvent::Pause);

        let err = sm.plan(SessionEvent::Advance).unwrap_err();
        match err {
            PlanError::InvalidTransition(invalid) => {
                assert_eq!(invalid.from, SessionPhase::Paused);
                assert_eq!(invalid.event, SessionEvent::Advance);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn double_break_start_is_an_invalid_transition() {
        let mut sm = SessionStateMachine::new();
        apply(&mut sm, SessionEvent::Advance);
        apply(&mut sm, SessionEvent::BreakStart);

        let err = sm.plan(SessionEvent::BreakStart).unwrap_err();
        assert!(matches!(err, PlanError::InvalidTransition(_)));
    }

    #[test]
    fn commands_after_complete_are_invalid_except_rewind() {
        let mut sm = SessionStateMachine::new();
        apply(&mut sm, SessionEvent::Advance);
        apply(&mut sm, SessionEvent::Complete);

        for event in [
            SessionEvent::Advance,
            SessionEvent::Skip,
            SessionEvent::Pause,
            SessionEvent::BreakStart,
        ] {
            assert!(matches!(
                sm.plan(event),
                Err(PlanError::InvalidTransition(_))
            ));
        }
    }

    #[test]
    fn plan_then_plan_reports_pending() {
        let mut sm = SessionStateMachine::new();
        let _plan = sm.plan(SessionEvent::Advance).unwrap();
        assert_eq!(
            sm.plan(SessionEvent::Advance).unwrap_err(),
            PlanError::AlreadyPending
        );
    }

    #[test]
    fn abort_clears_pending() {
        let mut sm = SessionStateMachine::new();
        let plan = sm.plan(SessionEvent::Advance).unwrap();
        sm.abort(plan.id).unwrap();
        assert!(sm.snapshot().pending.is_none());
        assert_eq!(sm.phase(), SessionPhase::NotStarted);
    }

    #[test]
    fn apply_with_wrong_id_keeps_plan_pending() {
        let mut sm = SessionStateMachine::new();
        let plan = sm.plan(SessionEvent::Advance).unwrap();
        let err = sm.apply(Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, ApplyError::IdMismatch { .. }));
        // The original plan is still applicable.
        assert_eq!(sm.apply(plan.id).unwrap(), SessionPhase::Running);
    }
}
