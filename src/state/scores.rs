use std::collections::HashSet;
use std::time::SystemTime;

use indexmap::IndexMap;

use crate::state::session::RoutineId;

/// One judge's score for one routine. At most one current submission exists
/// per (routine, judge) pair; resubmission overwrites while the routine's
/// scoring window is open.
#[derive(Debug, Clone)]
pub struct ScoreSubmission {
    /// Routine being scored.
    pub routine_id: RoutineId,
    /// Authenticated identity of the submitting judge.
    pub judge_id: String,
    /// Display name of the submitting judge.
    pub judge_name: String,
    /// Numeric score within the competition's configured range.
    pub score: f64,
    /// Free-form judge notes.
    pub notes: Option<String>,
    /// When this (latest) submission arrived.
    pub submitted_at: SystemTime,
}

/// Collected score submissions for one competition session.
///
/// The book only collects and hands frozen scores to the persistence sink;
/// averages and award tiers are computed downstream by the reporting
/// collaborator.
#[derive(Debug, Default)]
pub struct ScoreBook {
    by_routine: IndexMap<RoutineId, IndexMap<String, ScoreSubmission>>,
    flushed: HashSet<RoutineId>,
}

impl ScoreBook {
    /// Create an empty book.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the submission for its (routine, judge) pair.
    /// Returns the submission it replaced, if any.
    pub fn upsert(&mut self, submission: ScoreSubmission) -> Option<ScoreSubmission> {
        self.by_routine
            .entry(submission.routine_id)
            .or_default()
            .insert(submission.judge_id.clone(), submission)
    }

    /// Scores currently recorded for a routine.
    pub fn routine_scores(&self, routine_id: &RoutineId) -> Vec<&ScoreSubmission> {
        self.by_routine
            .get(routine_id)
            .map(|scores| scores.values().collect())
            .unwrap_or_default()
    }

    /// Whether a routine's scores were already handed to the sink.
    pub fn is_flushed(&self, routine_id: &RoutineId) -> bool {
        self.flushed.contains(routine_id)
    }

    /// Hand over the scores of the given routines, marking them flushed so a
    /// later pass does not persist them twice. Routines without scores are
    /// marked flushed as well (there is nothing to report for them).
    pub fn drain_for_sink<I>(&mut self, routine_ids: I) -> Vec<ScoreSubmission>
    where
        I: IntoIterator<Item = RoutineId>,
    {
        let mut drained = Vec::new();
        for routine_id in routine_ids {
            if !self.flushed.insert(routine_id) {
                continue;
            }
            if let Some(scores) = self.by_routine.get(&routine_id) {
                drained.extend(scores.values().cloned());
            }
        }
        drained
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    fn submission(routine_id: RoutineId, judge_id: &str, score: f64) -> ScoreSubmission {
        ScoreSubmission {
            routine_id,
            judge_id: judge_id.into(),
            judge_name: "Judge A".into(),
            score,
            notes: None,
            submitted_at: SystemTime::now(),
        }
    }

    #[test]
    fn amend_replaces_the_previous_submission() {
        let routine_id = Uuid::new_v4();
        let mut book = ScoreBook::new();

        assert!(book.upsert(submission(routine_id, "judge-1", 87.5)).is_none());
        let replaced = book.upsert(submission(routine_id, "judge-1", 88.0)).unwrap();
        assert_eq!(replaced.score, 87.5);

        let scores = book.routine_scores(&routine_id);
        assert_eq!(scores.len(), 1);
        assert_eq!(scores[0].score, 88.0);
    }

    #[test]
    fn judges_do_not_overwrite_each_other() {
        let routine_id = Uuid::new_v4();
        let mut book = ScoreBook::new();

        book.upsert(submission(routine_id, "judge-1", 81.0));
        book.upsert(submission(routine_id, "judge-2", 92.5));

        assert_eq!(book.routine_scores(&routine_id).len(), 2);
    }

    #[test]
    fn drain_marks_routines_flushed_exactly_once() {
        let routine_id = Uuid::new_v4();
        let mut book = ScoreBook::new();
        book.upsert(submission(routine_id, "judge-1", 81.0));

        let first = book.drain_for_sink([routine_id]);
        assert_eq!(first.len(), 1);
        assert!(book.is_flushed(&routine_id));

        let second = book.drain_for_sink([routine_id]);
        assert!(second.is_empty());
    }
}
