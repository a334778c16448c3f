use std::time::SystemTime;

use indexmap::IndexMap;
use time::Date;
use uuid::Uuid;

use crate::error::{CommandRejection, RejectCode};

/// Identifier of a routine within a competition day.
pub type RoutineId = Uuid;

/// Live status of one routine over the competition day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutineStatus {
    /// Not yet performed.
    Queued,
    /// On stage right now.
    Current,
    /// Performed and closed out.
    Completed,
    /// Withdrawn by the director.
    Skipped,
}

impl RoutineStatus {
    /// Whether the routine no longer needs stage time.
    pub fn is_settled(self) -> bool {
        matches!(self, RoutineStatus::Completed | RoutineStatus::Skipped)
    }
}

/// Runtime state of a single routine, derived from the externally supplied
/// routine list plus the session's transitions.
#[derive(Debug, Clone)]
pub struct RoutineRuntimeState {
    /// Stable identifier shared with the management platform.
    pub id: RoutineId,
    /// Display title of the entry.
    pub title: String,
    /// Studio that fields the entry.
    pub studio_name: String,
    /// Position in the day's running order, starting at 1.
    pub order: u32,
    /// Expected performance length.
    pub duration_ms: u64,
    /// Live status.
    pub status: RoutineStatus,
    /// Set when the routine last left `current`; anchors the scoring grace window.
    pub left_current_at: Option<SystemTime>,
}

/// Seed data for one routine, supplied by the routine-ordering collaborator.
#[derive(Debug, Clone)]
pub struct RoutineSeed {
    /// Stable identifier shared with the management platform.
    pub id: RoutineId,
    /// Display title of the entry.
    pub title: String,
    /// Studio that fields the entry.
    pub studio_name: String,
    /// Expected performance length.
    pub duration_ms: u64,
}

/// Active intermission data; mutually exclusive with a current routine.
#[derive(Debug, Clone)]
pub struct BreakState {
    /// Planned length of the intermission.
    pub duration_minutes: u32,
    /// Optional operator-facing reason.
    pub reason: Option<String>,
    /// When the intermission began.
    pub started_at: SystemTime,
}

/// A judge's pending request for an intermission, awaiting director decision.
#[derive(Debug, Clone)]
pub struct BreakRequest {
    /// Identifier used by the director to approve or deny.
    pub request_id: Uuid,
    /// Judge who asked.
    pub judge_id: String,
    /// Display name of the judge who asked.
    pub judge_name: String,
    /// Requested length.
    pub duration_minutes: u32,
    /// When the request was made.
    pub requested_at: SystemTime,
}

/// Outcome of a routine-level transition, used to drive broadcasts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutineShift {
    /// Routine that left `current` during this transition, if any.
    pub finished: Option<RoutineId>,
    /// Routine that is `current` after this transition, if any.
    pub current: Option<RoutineId>,
}

/// The single authoritative mutable state for one competition's execution on
/// one day. Owned exclusively by its session hub; every mutation happens
/// under the hub's serialized command gate.
#[derive(Debug, Clone)]
pub struct CompetitionSession {
    /// Competition this session belongs to.
    pub competition_id: String,
    /// Calendar day the session covers.
    pub day: Date,
    /// Routines in running order (map iteration order is the running order).
    pub routines: IndexMap<RoutineId, RoutineRuntimeState>,
    /// Index of the current routine into the running order.
    pub current_index: Option<usize>,
    /// Routine to re-promote when an intermission ends.
    pub resume_index: Option<usize>,
    /// When the first routine went current.
    pub start_time: Option<SystemTime>,
    /// When the director last paused, for elapsed-time accounting.
    pub paused_at: Option<SystemTime>,
    /// Running schedule delay communicated to all clients.
    pub delay_minutes: u32,
    /// Active intermission, if any.
    pub active_break: Option<BreakState>,
    /// Judge break requests awaiting a director decision.
    pub pending_break_requests: Vec<BreakRequest>,
    /// Set when the session was rebuilt after a day change; the director must
    /// confirm before authoritative commands are accepted again.
    pub needs_day_confirmation: bool,
    /// Last mutation timestamp.
    pub updated_at: SystemTime,
}

impl CompetitionSession {
    /// Build a fresh session for a competition day from the ordered routine list.
    pub fn new(competition_id: String, day: Date, seeds: Vec<RoutineSeed>) -> Self {
        Self {
            competition_id,
            day,
            routines: routines_from_seeds(seeds),
            current_index: None,
            resume_index: None,
            start_time: None,
            paused_at: None,
            delay_minutes: 0,
            active_break: None,
            pending_break_requests: Vec::new(),
            needs_day_confirmation: false,
            updated_at: SystemTime::now(),
        }
    }

    /// Replace the routine list wholesale; only legal before the first advance.
    pub fn replace_routines(&mut self, seeds: Vec<RoutineSeed>) {
        self.routines = routines_from_seeds(seeds);
        self.current_index = None;
        self.resume_index = None;
        self.updated_at = SystemTime::now();
    }

    /// The routine currently on stage, if any.
    pub fn current_routine(&self) -> Option<&RoutineRuntimeState> {
        let index = self.current_index?;
        self.routines.get_index(index).map(|(_, routine)| routine)
    }

    /// Look up a routine by id.
    pub fn routine(&self, id: &RoutineId) -> Option<&RoutineRuntimeState> {
        self.routines.get(id)
    }

    /// `next`: close out the current routine and promote the following one.
    pub fn advance(&mut self, now: SystemTime) -> Result<RoutineShift, CommandRejection> {
        let next_index = match self.current_index {
            None if !self.routines.is_empty() => 0,
            Some(index) if index + 1 < self.routines.len() => index + 1,
            _ => {
                return Err(CommandRejection::new(
                    RejectCode::NoNextRoutine,
                    "no routine left to advance to",
                ));
            }
        };

        let finished = self.settle_current(RoutineStatus::Completed, now);
        self.promote(next_index, now);

        Ok(RoutineShift {
            finished,
            current: self.current_routine().map(|routine| routine.id),
        })
    }

    /// `skip`: mark the current routine withdrawn and promote the following one.
    pub fn skip(&mut self, now: SystemTime) -> Result<RoutineShift, CommandRejection> {
        let Some(index) = self.current_index else {
            return Err(CommandRejection::new(
                RejectCode::InvalidPhase,
                "no routine is current",
            ));
        };
        if index + 1 >= self.routines.len() {
            return Err(CommandRejection::new(
                RejectCode::NoNextRoutine,
                "cannot skip the final routine; close the day instead",
            ));
        }

        let finished = self.settle_current(RoutineStatus::Skipped, now);
        self.promote(index + 1, now);

        Ok(RoutineShift {
            finished,
            current: self.current_routine().map(|routine| routine.id),
        })
    }

    /// `previous`: demote the current routine back to queued and re-open the
    /// one before it, even if that one was already completed.
    pub fn rewind(&mut self, now: SystemTime) -> Result<RoutineShift, CommandRejection> {
        let Some(index) = self.current_index.filter(|index| *index > 0) else {
            return Err(CommandRejection::new(
                RejectCode::NoPreviousRoutine,
                "no earlier routine to return to",
            ));
        };

        if let Some((_, routine)) = self.routines.get_index_mut(index) {
            routine.status = RoutineStatus::Queued;
            routine.left_current_at = None;
        }
        self.promote(index - 1, now);

        Ok(RoutineShift {
            finished: None,
            current: self.current_routine().map(|routine| routine.id),
        })
    }

    /// Re-open the last routine of a closed session (`previous` out of `completed`).
    pub fn reopen(&mut self, now: SystemTime) -> Result<RoutineShift, CommandRejection> {
        let Some(index) = self.current_index else {
            return Err(CommandRejection::new(
                RejectCode::NoPreviousRoutine,
                "session has no routine to re-open",
            ));
        };

        self.promote(index, now);

        Ok(RoutineShift {
            finished: None,
            current: self.current_routine().map(|routine| routine.id),
        })
    }

    /// Begin an intermission; the current routine goes back to queued so a
    /// break and a current routine never coexist.
    pub fn begin_break(
        &mut self,
        duration_minutes: u32,
        reason: Option<String>,
        now: SystemTime,
    ) -> Result<(), CommandRejection> {
        if self.active_break.is_some() {
            return Err(CommandRejection::new(
                RejectCode::AlreadyOnBreak,
                "an intermission is already active",
            ));
        }

        self.resume_index = self.current_index.take();
        if let Some(index) = self.resume_index
            && let Some((_, routine)) = self.routines.get_index_mut(index)
        {
            routine.status = RoutineStatus::Queued;
            routine.left_current_at = None;
        }

        self.active_break = Some(BreakState {
            duration_minutes,
            reason,
            started_at: now,
        });
        self.updated_at = now;
        Ok(())
    }

    /// End the intermission and put the interrupted routine back on stage.
    /// Returns the break that ended, or `None` when none was active (a no-op).
    pub fn end_break(&mut self, now: SystemTime) -> Option<(BreakState, RoutineShift)> {
        let ended = self.active_break.take()?;

        if let Some(index) = self.resume_index.take() {
            self.promote(index, now);
        }
        self.updated_at = now;

        Some((
            ended,
            RoutineShift {
                finished: None,
                current: self.current_routine().map(|routine| routine.id),
            },
        ))
    }

    /// `complete`: close the day. Every routine other than the current one
    /// must already be settled; the current one is closed out here.
    pub fn finish(&mut self, now: SystemTime) -> Result<RoutineShift, CommandRejection> {
        let open = self
            .routines
            .values()
            .enumerate()
            .filter(|(index, routine)| {
                Some(*index) != self.current_index && !routine.status.is_settled()
            })
            .count();
        if open > 0 {
            return Err(CommandRejection::new(
                RejectCode::InvalidPhase,
                format!("{open} routine(s) still queued; advance or skip them first"),
            ));
        }

        let finished = self.settle_current(RoutineStatus::Completed, now);
        self.updated_at = now;

        Ok(RoutineShift {
            finished,
            current: None,
        })
    }

    /// `pause` bookkeeping; the current routine is untouched.
    pub fn pause(&mut self, now: SystemTime) {
        self.paused_at = Some(now);
        self.updated_at = now;
    }

    /// `resume` bookkeeping.
    pub fn resume(&mut self, now: SystemTime) {
        self.paused_at = None;
        self.updated_at = now;
    }

    /// Update the running schedule delay, returning the previous value.
    pub fn set_delay(&mut self, minutes: u32) -> u32 {
        let previous = self.delay_minutes;
        self.delay_minutes = minutes;
        self.updated_at = SystemTime::now();
        previous
    }

    /// Record operator confirmation after a day transition.
    pub fn confirm_day(&mut self) {
        self.needs_day_confirmation = false;
        self.updated_at = SystemTime::now();
    }

    /// Queue a judge's break request for director review.
    pub fn push_break_request(&mut self, request: BreakRequest) {
        self.pending_break_requests.push(request);
        self.updated_at = SystemTime::now();
    }

    /// Remove a pending break request, returning it when found.
    pub fn take_break_request(&mut self, request_id: Uuid) -> Option<BreakRequest> {
        let position = self
            .pending_break_requests
            .iter()
            .position(|request| request.request_id == request_id)?;
        self.updated_at = SystemTime::now();
        Some(self.pending_break_requests.remove(position))
    }

    fn settle_current(&mut self, status: RoutineStatus, now: SystemTime) -> Option<RoutineId> {
        let index = self.current_index?;
        let (_, routine) = self.routines.get_index_mut(index)?;
        routine.status = status;
        routine.left_current_at = Some(now);
        Some(routine.id)
    }

    fn promote(&mut self, index: usize, now: SystemTime) {
        if let Some((_, routine)) = self.routines.get_index_mut(index) {
            routine.status = RoutineStatus::Current;
            routine.left_current_at = None;
        }
        self.current_index = Some(index);
        self.start_time.get_or_insert(now);
        self.updated_at = now;
    }
}

fn routines_from_seeds(seeds: Vec<RoutineSeed>) -> IndexMap<RoutineId, RoutineRuntimeState> {
    seeds
        .into_iter()
        .enumerate()
        .map(|(index, seed)| {
            (
                seed.id,
                RoutineRuntimeState {
                    id: seed.id,
                    title: seed.title,
                    studio_name: seed.studio_name,
                    order: index as u32 + 1,
                    duration_ms: seed.duration_ms,
                    status: RoutineStatus::Queued,
                    left_current_at: None,
                },
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use time::macros::date;

    use super::*;

    fn session_with(count: usize) -> CompetitionSession {
        let seeds = (0..count)
            .map(|index| RoutineSeed {
                id: Uuid::new_v4(),
                title: format!("Routine {}", index + 1),
                studio_name: "Starlight Dance Co".into(),
                duration_ms: 180_000,
            })
            .collect();
        CompetitionSession::new("comp-1".into(), date!(2026 - 08 - 07), seeds)
    }

    fn current_count(session: &CompetitionSession) -> usize {
        session
            .routines
            .values()
            .filter(|routine| routine.status == RoutineStatus::Current)
            .count()
    }

    fn status_at(session: &CompetitionSession, index: usize) -> RoutineStatus {
        session.routines.get_index(index).unwrap().1.status
    }

    #[test]
    fn three_advances_on_a_five_routine_day() {
        let mut session = session_with(5);
        let now = SystemTime::now();

        for _ in 0..4 {
            session.advance(now).unwrap();
        }

        assert_eq!(status_at(&session, 0), RoutineStatus::Completed);
        assert_eq!(status_at(&session, 1), RoutineStatus::Completed);
        assert_eq!(status_at(&session, 2), RoutineStatus::Completed);
        assert_eq!(status_at(&session, 3), RoutineStatus::Current);
        assert_eq!(status_at(&session, 4), RoutineStatus::Queued);
        assert_eq!(current_count(&session), 1);
    }

    #[test]
    fn advance_past_the_last_routine_is_rejected_without_changes() {
        let mut session = session_with(2);
        let now = SystemTime::now();
        session.advance(now).unwrap();
        session.advance(now).unwrap();

        let before = session.current_index;
        let err = session.advance(now).unwrap_err();
        assert_eq!(err.code, RejectCode::NoNextRoutine);
        assert_eq!(session.current_index, before);
        assert_eq!(status_at(&session, 1), RoutineStatus::Current);
    }

    #[test]
    fn rewind_reopens_the_prior_routine() {
        let mut session = session_with(3);
        let now = SystemTime::now();
        session.advance(now).unwrap();
        session.advance(now).unwrap();

        let shift = session.rewind(now).unwrap();
        assert_eq!(status_at(&session, 0), RoutineStatus::Current);
        assert_eq!(status_at(&session, 1), RoutineStatus::Queued);
        assert_eq!(session.current_index, Some(0));
        assert_eq!(
            shift.current,
            Some(session.routines.get_index(0).unwrap().1.id)
        );
        // Re-opening clears the grace-window anchor.
        assert!(session.current_routine().unwrap().left_current_at.is_none());
    }

    #[test]
    fn rewind_at_the_first_routine_is_rejected() {
        let mut session = session_with(3);
        let now = SystemTime::now();
        session.advance(now).unwrap();

        let err = session.rewind(now).unwrap_err();
        assert_eq!(err.code, RejectCode::NoPreviousRoutine);
    }

    #[test]
    fn skip_marks_withdrawn_and_advances() {
        let mut session = session_with(3);
        let now = SystemTime::now();
        session.advance(now).unwrap();

        let shift = session.skip(now).unwrap();
        assert_eq!(status_at(&session, 0), RoutineStatus::Skipped);
        assert_eq!(status_at(&session, 1), RoutineStatus::Current);
        assert!(shift.finished.is_some());
    }

    #[test]
    fn break_and_current_routine_never_coexist() {
        let mut session = session_with(3);
        let now = SystemTime::now();
        session.advance(now).unwrap();
        let interrupted = session.current_routine().unwrap().id;

        session.begin_break(15, Some("judges meal".into()), now).unwrap();
        assert_eq!(current_count(&session), 0);
        assert!(session.active_break.is_some());

        let err = session.begin_break(5, None, now).unwrap_err();
        assert_eq!(err.code, RejectCode::AlreadyOnBreak);

        let (ended, shift) = session.end_break(now).unwrap();
        assert_eq!(ended.duration_minutes, 15);
        assert_eq!(shift.current, Some(interrupted));
        assert_eq!(current_count(&session), 1);

        // A second end is a no-op rather than an error.
        assert!(session.end_break(now).is_none());
    }

    #[test]
    fn finish_requires_every_other_routine_settled() {
        let mut session = session_with(3);
        let now = SystemTime::now();
        session.advance(now).unwrap();

        let err = session.finish(now).unwrap_err();
        assert_eq!(err.code, RejectCode::InvalidPhase);

        session.advance(now).unwrap();
        session.advance(now).unwrap();
        let shift = session.finish(now).unwrap();
        assert!(shift.finished.is_some());
        assert_eq!(current_count(&session), 0);
        assert!(session.routines.values().all(|r| r.status.is_settled()));
    }

    #[test]
    fn exactly_one_current_while_advancing_and_rewinding() {
        let mut session = session_with(5);
        let now = SystemTime::now();

        session.advance(now).unwrap();
        session.advance(now).unwrap();
        session.skip(now).unwrap();
        session.rewind(now).unwrap();
        session.advance(now).unwrap();
        session.advance(now).unwrap();

        assert_eq!(current_count(&session), 1);
    }
}
