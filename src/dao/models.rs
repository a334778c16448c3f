use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    dao::storage::StorageError,
    dto::{format_day, parse_day},
    state::{
        scores::ScoreSubmission,
        session::{BreakState, CompetitionSession, RoutineRuntimeState, RoutineStatus},
        state_machine::SessionPhase,
    },
};

/// Version stamped into every stored snapshot so future format changes can be
/// migrated instead of silently misparsed.
pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

/// Stored projection of a session phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseRecord {
    /// No routine has run yet.
    NotStarted,
    /// The show was live.
    Running,
    /// The director had paused.
    Paused,
    /// An intermission was active.
    Break,
    /// The day was closed.
    Completed,
}

impl From<SessionPhase> for PhaseRecord {
    fn from(value: SessionPhase) -> Self {
        match value {
            SessionPhase::NotStarted => PhaseRecord::NotStarted,
            SessionPhase::Running => PhaseRecord::Running,
            SessionPhase::Paused => PhaseRecord::Paused,
            SessionPhase::Break => PhaseRecord::Break,
            SessionPhase::Completed => PhaseRecord::Completed,
        }
    }
}

impl From<PhaseRecord> for SessionPhase {
    fn from(value: PhaseRecord) -> Self {
        match value {
            PhaseRecord::NotStarted => SessionPhase::NotStarted,
            PhaseRecord::Running => SessionPhase::Running,
            PhaseRecord::Paused => SessionPhase::Paused,
            PhaseRecord::Break => SessionPhase::Break,
            PhaseRecord::Completed => SessionPhase::Completed,
        }
    }
}

/// Stored projection of a routine's live status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutineStatusRecord {
    /// Not yet performed.
    Queued,
    /// On stage when the snapshot was taken.
    Current,
    /// Performed and closed out.
    Completed,
    /// Withdrawn by the director.
    Skipped,
}

impl From<RoutineStatus> for RoutineStatusRecord {
    fn from(value: RoutineStatus) -> Self {
        match value {
            RoutineStatus::Queued => RoutineStatusRecord::Queued,
            RoutineStatus::Current => RoutineStatusRecord::Current,
            RoutineStatus::Completed => RoutineStatusRecord::Completed,
            RoutineStatus::Skipped => RoutineStatusRecord::Skipped,
        }
    }
}

impl From<RoutineStatusRecord> for RoutineStatus {
    fn from(value: RoutineStatusRecord) -> Self {
        match value {
            RoutineStatusRecord::Queued => RoutineStatus::Queued,
            RoutineStatusRecord::Current => RoutineStatus::Current,
            RoutineStatusRecord::Completed => RoutineStatus::Completed,
            RoutineStatusRecord::Skipped => RoutineStatus::Skipped,
        }
    }
}

/// Stored projection of one routine's runtime state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutineRecord {
    /// Stable routine identifier.
    pub id: Uuid,
    /// Display title of the entry.
    pub title: String,
    /// Studio that fields the entry.
    pub studio_name: String,
    /// Position in the running order, starting at 1.
    pub order: u32,
    /// Expected performance length.
    pub duration_ms: u64,
    /// Live status when the snapshot was taken.
    pub status: RoutineStatusRecord,
    /// When the routine last left `current` (unix milliseconds).
    #[serde(default)]
    pub left_current_at_unix_ms: Option<i64>,
}

/// Stored projection of an active intermission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakRecord {
    /// Planned length of the intermission.
    pub duration_minutes: u32,
    /// Optional operator-facing reason.
    #[serde(default)]
    pub reason: Option<String>,
    /// When the intermission began (unix milliseconds).
    pub started_at_unix_ms: i64,
}

/// Durable copy of one competition session's last-known state, keyed by
/// competition id; one record per competition being tracked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotRecord {
    /// Record format version; see [`SNAPSHOT_SCHEMA_VERSION`].
    pub schema_version: u32,
    /// Competition the record belongs to.
    pub competition_id: String,
    /// Day the session covered (`YYYY-MM-DD`).
    pub competition_day: String,
    /// Phase when the snapshot was taken.
    pub phase: PhaseRecord,
    /// Index of the current routine into the running order.
    pub current_routine_index: Option<usize>,
    /// Routine to re-promote when the stored intermission ends.
    #[serde(default)]
    pub resume_routine_index: Option<usize>,
    /// Running schedule delay in minutes.
    pub delay_minutes: u32,
    /// When the first routine went current (unix milliseconds).
    pub start_time_unix_ms: Option<i64>,
    /// When the director last paused (unix milliseconds).
    pub paused_at_unix_ms: Option<i64>,
    /// Active intermission, if any.
    #[serde(default)]
    pub active_break: Option<BreakRecord>,
    /// Every routine of the day in running order.
    pub routines: Vec<RoutineRecord>,
    /// When this record was last written (unix milliseconds).
    pub last_synced_at_unix_ms: i64,
}

impl SnapshotRecord {
    /// Capture the durable projection of a live session.
    pub fn capture(phase: SessionPhase, session: &CompetitionSession, now: SystemTime) -> Self {
        Self {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            competition_id: session.competition_id.clone(),
            competition_day: format_day(session.day),
            phase: phase.into(),
            current_routine_index: session.current_index,
            resume_routine_index: session.resume_index,
            delay_minutes: session.delay_minutes,
            start_time_unix_ms: session.start_time.map(unix_ms),
            paused_at_unix_ms: session.paused_at.map(unix_ms),
            active_break: session.active_break.as_ref().map(|state| BreakRecord {
                duration_minutes: state.duration_minutes,
                reason: state.reason.clone(),
                started_at_unix_ms: unix_ms(state.started_at),
            }),
            routines: session
                .routines
                .values()
                .map(|routine| RoutineRecord {
                    id: routine.id,
                    title: routine.title.clone(),
                    studio_name: routine.studio_name.clone(),
                    order: routine.order,
                    duration_ms: routine.duration_ms,
                    status: routine.status.into(),
                    left_current_at_unix_ms: routine.left_current_at.map(unix_ms),
                })
                .collect(),
            last_synced_at_unix_ms: unix_ms(now),
        }
    }

    /// Rebuild the live state from a stored record.
    pub fn restore(self) -> Result<(SessionPhase, CompetitionSession), StorageError> {
        let day = parse_day(&self.competition_day).map_err(|err| {
            StorageError::corrupted(format!(
                "unparseable competition day `{}`: {err}",
                self.competition_day
            ))
        })?;

        let routines = self
            .routines
            .into_iter()
            .map(|record| {
                (
                    record.id,
                    RoutineRuntimeState {
                        id: record.id,
                        title: record.title,
                        studio_name: record.studio_name,
                        order: record.order,
                        duration_ms: record.duration_ms,
                        status: record.status.into(),
                        left_current_at: record.left_current_at_unix_ms.map(from_unix_ms),
                    },
                )
            })
            .collect();

        let session = CompetitionSession {
            competition_id: self.competition_id,
            day,
            routines,
            current_index: self.current_routine_index,
            resume_index: self.resume_routine_index,
            start_time: self.start_time_unix_ms.map(from_unix_ms),
            paused_at: self.paused_at_unix_ms.map(from_unix_ms),
            delay_minutes: self.delay_minutes,
            active_break: self.active_break.map(|record| BreakState {
                duration_minutes: record.duration_minutes,
                reason: record.reason,
                started_at: from_unix_ms(record.started_at_unix_ms),
            }),
            pending_break_requests: Vec::new(),
            needs_day_confirmation: false,
            updated_at: from_unix_ms(self.last_synced_at_unix_ms),
        };

        Ok((self.phase.into(), session))
    }

    /// Age of the record relative to `now`.
    pub fn age(&self, now: SystemTime) -> Duration {
        now.duration_since(from_unix_ms(self.last_synced_at_unix_ms))
            .unwrap_or(Duration::ZERO)
    }
}

/// One finalized score handed to the reporting collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreRecord {
    /// Competition the score belongs to.
    pub competition_id: String,
    /// Routine being scored.
    pub routine_id: Uuid,
    /// Judge identity.
    pub judge_id: String,
    /// Judge display name.
    pub judge_name: String,
    /// The accepted score.
    pub score: f64,
    /// Free-form judge notes.
    #[serde(default)]
    pub notes: Option<String>,
    /// Submission timestamp (unix milliseconds).
    pub submitted_at_unix_ms: i64,
}

impl ScoreRecord {
    /// Build the durable record for one accepted submission.
    pub fn from_submission(competition_id: &str, submission: &ScoreSubmission) -> Self {
        Self {
            competition_id: competition_id.to_string(),
            routine_id: submission.routine_id,
            judge_id: submission.judge_id.clone(),
            judge_name: submission.judge_name.clone(),
            score: submission.score,
            notes: submission.notes.clone(),
            submitted_at_unix_ms: unix_ms(submission.submitted_at),
        }
    }
}

fn unix_ms(time: SystemTime) -> i64 {
    time.duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or(0)
}

fn from_unix_ms(ms: i64) -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(ms.max(0) as u64)
}

#[cfg(test)]
mod tests {
    use time::macros::date;

    use super::*;
    use crate::state::session::RoutineSeed;

    fn sample_session() -> CompetitionSession {
        let seeds = (0..3)
            .map(|index| RoutineSeed {
                id: Uuid::new_v4(),
                title: format!("Routine {}", index + 1),
                studio_name: "Starlight Dance Co".into(),
                duration_ms: 180_000,
            })
            .collect();
        CompetitionSession::new("comp-1".into(), date!(2026 - 08 - 07), seeds)
    }

    #[test]
    fn capture_then_restore_preserves_progress() {
        let mut session = sample_session();
        let now = SystemTime::now();
        session.advance(now).unwrap();
        session.advance(now).unwrap();
        session.set_delay(10);

        let record = SnapshotRecord::capture(SessionPhase::Running, &session, now);
        assert_eq!(record.schema_version, SNAPSHOT_SCHEMA_VERSION);

        let (phase, restored) = record.restore().unwrap();
        assert_eq!(phase, SessionPhase::Running);
        assert_eq!(restored.current_index, Some(1));
        assert_eq!(restored.delay_minutes, 10);
        assert_eq!(restored.day, session.day);
        assert_eq!(restored.routines.len(), 3);
        assert_eq!(
            restored.routines.get_index(0).unwrap().1.status,
            RoutineStatus::Completed
        );
        assert_eq!(
            restored.routines.get_index(1).unwrap().1.status,
            RoutineStatus::Current
        );
    }

    #[test]
    fn restore_rejects_garbage_day() {
        let session = sample_session();
        let mut record =
            SnapshotRecord::capture(SessionPhase::NotStarted, &session, SystemTime::now());
        record.competition_day = "yesterday-ish".into();

        assert!(matches!(
            record.restore(),
            Err(StorageError::Corrupted { .. })
        ));
    }

    #[test]
    fn age_is_measured_from_last_sync() {
        let session = sample_session();
        let written = SystemTime::now() - Duration::from_secs(3600);
        let record = SnapshotRecord::capture(SessionPhase::NotStarted, &session, written);

        let age = record.age(SystemTime::now());
        assert!(age >= Duration::from_secs(3599));
        assert!(age < Duration::from_secs(3700));
    }
}
