use std::time::{Duration, SystemTime};

use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    dao::models::ScoreRecord,
    dto::{format_system_time, ws::{ClientRole, ServerMessage}},
    error::{RejectCode, ServiceError},
    state::{
        SessionHub, SharedState,
        scores::ScoreSubmission,
        session::{CompetitionSession, RoutineId, RoutineStatus},
    },
};

/// Scoring-window verdict for one routine at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScoreWindow {
    /// The routine accepts (re)submissions.
    Open,
    /// The routine is past its live window; scores are frozen.
    Closed,
    /// The routine does not exist on this competition day.
    Unknown,
}

/// Accept or refuse a judge's score for a routine.
///
/// The score must be inside the configured range, and the routine must be
/// `current` or `completed` within the grace window. The submission upserts
/// the judge's own previous score; other judges' scores are untouchable by
/// construction (keyed by the authenticated identity, not the payload).
pub async fn submit_score(
    state: &SharedState,
    hub: &SessionHub,
    connection_id: Uuid,
    routine_id: RoutineId,
    score: f64,
    notes: Option<String>,
) -> Result<(), ServiceError> {
    let Some(sender) = hub.registry().get(connection_id) else {
        return Err(ServiceError::rejected(
            RejectCode::NoAuthority,
            "connection is not registered with this competition",
        ));
    };
    if sender.role != ClientRole::Judge {
        return Err(ServiceError::rejected(
            RejectCode::NoAuthority,
            "only judges may submit scores",
        ));
    }

    if !state.config().score_in_range(score) {
        return Err(ServiceError::rejected(
            RejectCode::ScoreOutOfRange,
            format!(
                "score {score} is outside the allowed range [{}, {}]",
                state.config().score_min,
                state.config().score_max
            ),
        ));
    }

    let judge_name = hub
        .registry()
        .judge(&sender.identity)
        .map(|judge| judge.display_name)
        .unwrap_or_else(|| sender.identity.clone());
    let grace = state.config().grace_window;

    let accepted = hub
        .run_serialized(|| async {
            let now = SystemTime::now();
            let window = hub
                .read_session(|session| classify_window(session, &routine_id, now, grace))
                .await;

            match window {
                ScoreWindow::Unknown => Err(ServiceError::rejected(
                    RejectCode::NotFound,
                    format!("routine `{routine_id}` is not on this competition day"),
                )),
                ScoreWindow::Closed => Err(ServiceError::rejected(
                    RejectCode::ScoreWindowClosed,
                    "routine is no longer accepting scores",
                )),
                ScoreWindow::Open => {
                    let mut book = hub.scores().write().await;
                    if book.is_flushed(&routine_id) {
                        return Err(ServiceError::rejected(
                            RejectCode::ScoreWindowClosed,
                            "routine scores were already finalized",
                        ));
                    }

                    let submission = ScoreSubmission {
                        routine_id,
                        judge_id: sender.identity.clone(),
                        judge_name: judge_name.clone(),
                        score,
                        notes: notes.clone(),
                        submitted_at: now,
                    };
                    let amended = book.upsert(submission.clone()).is_some();
                    Ok((submission, amended))
                }
            }
        })
        .await?;

    let (submission, amended) = accepted;
    info!(
        competition_id = hub.competition_id(),
        routine_id = %routine_id,
        judge_id = %submission.judge_id,
        score,
        amended,
        "score submitted"
    );

    // Live monitoring goes to directors only, never to other judges.
    hub.send_to_directors(&ServerMessage::ScoreSubmitted {
        routine_id,
        judge_id: submission.judge_id.clone(),
        judge_name: submission.judge_name.clone(),
        score: submission.score,
        notes: submission.notes.clone(),
        submitted_at: format_system_time(submission.submitted_at),
    });

    Ok(())
}

/// Idempotently update a judge's readiness flag and tell the directors.
pub async fn set_ready(
    hub: &SessionHub,
    connection_id: Uuid,
    ready: bool,
) -> Result<(), ServiceError> {
    let Some(sender) = hub.registry().get(connection_id) else {
        return Err(ServiceError::rejected(
            RejectCode::NoAuthority,
            "connection is not registered with this competition",
        ));
    };
    if sender.role != ClientRole::Judge {
        return Err(ServiceError::rejected(
            RejectCode::NoAuthority,
            "only judges may signal readiness",
        ));
    }

    let Some(judge) = hub.registry().set_judge_ready(&sender.identity, ready) else {
        return Err(ServiceError::NotFound(format!(
            "judge `{}` is not on this competition's panel",
            sender.identity
        )));
    };

    hub.send_to_directors(&ServerMessage::JudgeStatus {
        judge_id: judge.judge_id,
        display_name: judge.display_name,
        ready: judge.ready,
        connected: judge.connected,
    });
    Ok(())
}

/// Hand the scores of every routine whose window has closed to the reporting
/// sink. Invoked opportunistically after routine transitions.
pub async fn flush_closed(state: &SharedState, hub: &SessionHub) {
    let grace = state.config().grace_window;
    let now = SystemTime::now();
    let closed: Vec<RoutineId> = hub
        .read_session(|session| {
            session
                .routines
                .values()
                .filter(|routine| window_expired(routine.status, routine.left_current_at, now, grace))
                .map(|routine| routine.id)
                .collect()
        })
        .await;

    flush(state, hub, closed).await;
}

/// Hand everything still unflushed to the reporting sink; used when the
/// session completes and the day is final.
pub async fn flush_all(state: &SharedState, hub: &SessionHub) {
    let all: Vec<RoutineId> = hub
        .read_session(|session| session.routines.keys().copied().collect())
        .await;
    flush(state, hub, all).await;
}

async fn flush(state: &SharedState, hub: &SessionHub, routine_ids: Vec<RoutineId>) {
    if routine_ids.is_empty() {
        return;
    }

    let drained = {
        let mut book = hub.scores().write().await;
        book.drain_for_sink(routine_ids)
    };
    if drained.is_empty() {
        return;
    }

    let records: Vec<ScoreRecord> = drained
        .iter()
        .map(|submission| ScoreRecord::from_submission(hub.competition_id(), submission))
        .collect();
    let count = records.len();

    match state.score_sink().await {
        Some(sink) => {
            if let Err(err) = sink.append(records).await {
                warn!(
                    competition_id = hub.competition_id(),
                    error = %err,
                    "failed to persist finalized scores; reporting will be incomplete"
                );
            } else {
                info!(
                    competition_id = hub.competition_id(),
                    count, "finalized scores handed to reporting sink"
                );
            }
        }
        None => warn!(
            competition_id = hub.competition_id(),
            count, "no score sink installed (degraded mode); finalized scores kept in memory only"
        ),
    }
}

fn classify_window(
    session: &CompetitionSession,
    routine_id: &RoutineId,
    now: SystemTime,
    grace: Duration,
) -> ScoreWindow {
    let Some(routine) = session.routine(routine_id) else {
        return ScoreWindow::Unknown;
    };

    match routine.status {
        RoutineStatus::Current => ScoreWindow::Open,
        RoutineStatus::Completed => match routine.left_current_at {
            Some(left) if now.duration_since(left).unwrap_or(Duration::ZERO) <= grace => {
                ScoreWindow::Open
            }
            _ => ScoreWindow::Closed,
        },
        RoutineStatus::Queued | RoutineStatus::Skipped => ScoreWindow::Closed,
    }
}

fn window_expired(
    status: RoutineStatus,
    left_current_at: Option<SystemTime>,
    now: SystemTime,
    grace: Duration,
) -> bool {
    match status {
        RoutineStatus::Skipped => true,
        RoutineStatus::Completed => match left_current_at {
            Some(left) => now.duration_since(left).unwrap_or(Duration::ZERO) > grace,
            None => true,
        },
        RoutineStatus::Queued | RoutineStatus::Current => false,
    }
}

#[cfg(test)]
mod tests {
    use time::macros::date;

    use super::*;
    use crate::state::session::RoutineSeed;

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

    #[test]
    fn current_routine_is_open() {
        let mut session = session_with(2);
        let now = SystemTime::now();
        session.advance(now).unwrap();
        let current = session.current_routine().unwrap().id;

        assert_eq!(
            classify_window(&session, &current, now, Duration::from_secs(120)),
            ScoreWindow::Open
        );
    }

    #[test]
    fn queued_routine_is_closed() {
        let mut session = session_with(2);
        let now = SystemTime::now();
        session.advance(now).unwrap();
        let queued = session.routines.get_index(1).unwrap().1.id;

        assert_eq!(
            classify_window(&session, &queued, now, Duration::from_secs(120)),
            ScoreWindow::Closed
        );
    }

    #[test]
    fn completed_routine_is_open_inside_grace_then_closes() {
        let mut session = session_with(2);
        let performed_at = SystemTime::now();
        session.advance(performed_at).unwrap();
        let first = session.current_routine().unwrap().id;
        session.advance(performed_at).unwrap();

        let grace = Duration::from_secs(120);
        let just_after = performed_at + Duration::from_secs(30);
        assert_eq!(
            classify_window(&session, &first, just_after, grace),
            ScoreWindow::Open
        );

        let long_after = performed_at + Duration::from_secs(300);
        assert_eq!(
            classify_window(&session, &first, long_after, grace),
            ScoreWindow::Closed
        );
    }

    #[test]
    fn skipped_routine_is_closed_immediately() {
        let mut session = session_with(3);
        let now = SystemTime::now();
        session.advance(now).unwrap();
        let first = session.current_routine().unwrap().id;
        session.skip(now).unwrap();

        assert_eq!(
            classify_window(&session, &first, now, Duration::from_secs(120)),
            ScoreWindow::Closed
        );
    }

    #[test]
    fn unknown_routine_is_reported_as_such() {
        let session = session_with(1);
        assert_eq!(
            classify_window(
                &session,
                &Uuid::new_v4(),
                SystemTime::now(),
                Duration::from_secs(120)
            ),
            ScoreWindow::Unknown
        );
    }
}
