use std::time::SystemTime;

use tracing::info;
use uuid::Uuid;

use crate::{
    dto::{format_system_time, session::RoutineSnapshot, ws::{ClientRole, DirectorCommand, ServerMessage}},
    error::{RejectCode, ServiceError},
    services::scoring_service,
    state::{
        SessionHub, SharedState,
        session::{BreakRequest, RoutineShift},
        state_machine::{SessionEvent, SessionPhase},
        transitions::run_transition_with_broadcast,
    },
};

/// Execute one authoritative director command for a competition.
///
/// All checks and effects run behind the hub's serialized gate, so commands
/// accepted for one competition apply and broadcast in the order received.
/// Rejections are returned to the caller (the sender's connection) and never
/// cross the broadcast boundary.
pub async fn execute(
    state: &SharedState,
    hub: &SessionHub,
    connection_id: Uuid,
    command: DirectorCommand,
) -> Result<(), ServiceError> {
    let Some(sender) = hub.registry().get(connection_id) else {
        return Err(ServiceError::rejected(
            RejectCode::NoAuthority,
            "connection is not registered with this competition",
        ));
    };
    // Role is re-read on every command: a demoted director loses authority
    // with no director reconnect required for the refusal.
    if sender.role != ClientRole::Director {
        return Err(ServiceError::rejected(
            RejectCode::NoAuthority,
            "only the director console may issue commands",
        ));
    }

    let phase = hub.phase().await;
    if phase == SessionPhase::Completed && !matches!(command, DirectorCommand::Previous) {
        return Err(ServiceError::rejected(
            RejectCode::SessionClosed,
            "session is completed; only `previous` can re-open it",
        ));
    }

    let awaiting_confirmation = hub
        .read_session(|session| session.needs_day_confirmation)
        .await;
    if awaiting_confirmation && !matches!(command, DirectorCommand::ConfirmDay) {
        return Err(ServiceError::rejected(
            RejectCode::DayUnconfirmed,
            "session was rebuilt for a new day; confirm it before issuing commands",
        ));
    }

    info!(
        competition_id = hub.competition_id(),
        command = command.name(),
        identity = %sender.identity,
        "director command"
    );
    let command_name = command.name();

    match command {
        DirectorCommand::Next => {
            if state.config().require_all_judges_ready
                && !hub.registry().all_connected_judges_ready()
            {
                return Err(ServiceError::rejected(
                    RejectCode::JudgesNotReady,
                    "a connected judge has not signalled ready",
                ));
            }

            let shift = run_transition_with_broadcast(hub, SessionEvent::Advance, || async {
                let now = SystemTime::now();
                hub.with_session_mut(|session| session.advance(now))
                    .await
                    .map_err(ServiceError::from)
            })
            .await?;
            broadcast_shift(hub, shift).await;
            scoring_service::flush_closed(state, hub).await;
        }
        DirectorCommand::Previous => {
            let shift = run_transition_with_broadcast(hub, SessionEvent::Rewind, || async {
                let now = SystemTime::now();
                hub.with_session_mut(|session| {
                    if phase == SessionPhase::Completed {
                        session.reopen(now)
                    } else {
                        session.rewind(now)
                    }
                })
                .await
                .map_err(ServiceError::from)
            })
            .await?;
            broadcast_shift(hub, shift).await;
        }
        DirectorCommand::Skip => {
            let shift = run_transition_with_broadcast(hub, SessionEvent::Skip, || async {
                let now = SystemTime::now();
                hub.with_session_mut(|session| session.skip(now))
                    .await
                    .map_err(ServiceError::from)
            })
            .await?;
            broadcast_shift(hub, shift).await;
            scoring_service::flush_closed(state, hub).await;
        }
        DirectorCommand::Pause => {
            run_transition_with_broadcast(hub, SessionEvent::Pause, || async {
                let now = SystemTime::now();
                hub.with_session_mut(|session| session.pause(now)).await;
                Ok(())
            })
            .await?;
        }
        DirectorCommand::Resume => {
            run_transition_with_broadcast(hub, SessionEvent::Resume, || async {
                let now = SystemTime::now();
                hub.with_session_mut(|session| session.resume(now)).await;
                Ok(())
            })
            .await?;
        }
        DirectorCommand::BreakStart {
            duration_minutes,
            reason,
        } => {
            // Checked ahead of the machine so the caller sees the typed code
            // instead of a generic invalid-transition message.
            if phase == SessionPhase::Break {
                return Err(ServiceError::rejected(
                    RejectCode::AlreadyOnBreak,
                    "an intermission is already active",
                ));
            }

            let started_at =
                run_transition_with_broadcast(hub, SessionEvent::BreakStart, || async {
                    let now = SystemTime::now();
                    hub.with_session_mut(|session| {
                        session
                            .begin_break(duration_minutes, reason.clone(), now)
                            .map(|_| now)
                    })
                    .await
                    .map_err(ServiceError::from)
                })
                .await?;

            hub.broadcast_all(&ServerMessage::BreakStarted {
                duration_minutes,
                reason,
                started_at: format_system_time(started_at),
            });
        }
        DirectorCommand::BreakEnd => {
            // Ending a break that is not running is a no-op, not an error.
            if phase != SessionPhase::Break {
                hub.send_to_connection(
                    sender.id,
                    &ServerMessage::CommandAccepted {
                        command: command_name.into(),
                        phase: phase.into(),
                    },
                );
                return Ok(());
            }

            run_transition_with_broadcast(hub, SessionEvent::BreakEnd, || async {
                let now = SystemTime::now();
                hub.with_session_mut(|session| session.end_break(now)).await;
                Ok(())
            })
            .await?;

            hub.broadcast_all(&ServerMessage::BreakEnded);
            let current = hub
                .read_session(|session| session.current_routine().map(RoutineSnapshot::from))
                .await;
            if let Some(routine) = current {
                hub.broadcast_all(&ServerMessage::RoutineCurrent { routine });
            }
        }
        DirectorCommand::BreakApprove { request_id } => {
            let request = hub
                .run_serialized(|| async {
                    hub.with_session_mut(|session| session.take_break_request(request_id))
                        .await
                        .ok_or_else(|| {
                            ServiceError::rejected(
                                RejectCode::NotFound,
                                format!("break request `{request_id}` is not pending"),
                            )
                        })
                })
                .await?;

            hub.broadcast_all(&ServerMessage::BreakApproved {
                request_id,
                duration_minutes: request.duration_minutes,
            });
        }
        DirectorCommand::BreakDeny { request_id, reason } => {
            hub.run_serialized(|| async {
                hub.with_session_mut(|session| session.take_break_request(request_id))
                    .await
                    .ok_or_else(|| {
                        ServiceError::rejected(
                            RejectCode::NotFound,
                            format!("break request `{request_id}` is not pending"),
                        )
                    })
            })
            .await?;

            hub.broadcast_all(&ServerMessage::BreakDenied { request_id, reason });
        }
        DirectorCommand::SetDelay { delay_minutes } => {
            let previous = hub
                .run_serialized(|| async {
                    Ok(hub
                        .with_session_mut(|session| session.set_delay(delay_minutes))
                        .await)
                })
                .await?;

            hub.broadcast_all(&ServerMessage::DelayUpdated {
                delay_minutes,
                previous_delay_minutes: previous,
            });
        }
        DirectorCommand::ConfirmDay => {
            hub.run_serialized(|| async {
                hub.with_session_mut(|session| session.confirm_day()).await;
                Ok(())
            })
            .await?;

            let snapshot = hub.snapshot().await;
            hub.broadcast_all(&ServerMessage::SyncState { snapshot });
        }
        DirectorCommand::Complete => {
            let shift = run_transition_with_broadcast(hub, SessionEvent::Complete, || async {
                let now = SystemTime::now();
                hub.with_session_mut(|session| session.finish(now))
                    .await
                    .map_err(ServiceError::from)
            })
            .await?;
            broadcast_shift(hub, shift).await;
            // Terminal: everything collected so far goes to the reporting sink.
            scoring_service::flush_all(state, hub).await;
        }
    }

    hub.send_to_connection(
        sender.id,
        &ServerMessage::CommandAccepted {
            command: command_name.into(),
            phase: hub.phase().await.into(),
        },
    );

    Ok(())
}

/// A judge asks the director for an intermission; queued on the session and
/// surfaced to director consoles only.
pub async fn judge_break_request(
    hub: &SessionHub,
    connection_id: Uuid,
    duration_minutes: u32,
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
            "only judges may request a break",
        ));
    }

    let judge_name = hub
        .registry()
        .judge(&sender.identity)
        .map(|judge| judge.display_name)
        .unwrap_or_else(|| sender.identity.clone());

    let request = BreakRequest {
        request_id: Uuid::new_v4(),
        judge_id: sender.identity.clone(),
        judge_name: judge_name.clone(),
        duration_minutes,
        requested_at: SystemTime::now(),
    };
    let message = ServerMessage::BreakRequested {
        request_id: request.request_id,
        judge_id: request.judge_id.clone(),
        judge_name,
        duration_minutes,
        requested_at: format_system_time(request.requested_at),
    };

    hub.run_serialized(|| async {
        hub.with_session_mut(|session| session.push_break_request(request))
            .await;
        Ok(())
    })
    .await?;

    hub.send_to_directors(&message);
    // The requesting judge gets the request id back for its own display.
    hub.send_to_connection(sender.id, &message);
    Ok(())
}

async fn broadcast_shift(hub: &SessionHub, shift: RoutineShift) {
    let (finished, current) = hub
        .read_session(|session| {
            (
                shift
                    .finished
                    .and_then(|id| session.routine(&id).map(RoutineSnapshot::from)),
                shift
                    .current
                    .and_then(|id| session.routine(&id).map(RoutineSnapshot::from)),
            )
        })
        .await;

    if let Some(routine) = finished {
        hub.broadcast_all(&ServerMessage::RoutineCompleted { routine });
    }
    if let Some(routine) = current {
        hub.broadcast_all(&ServerMessage::RoutineCurrent { routine });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::SystemTime;

    use axum::extract::ws::Message;
    use time::macros::date;
    use tokio::sync::mpsc;

    use super::*;
    use crate::{
        config::AppConfig,
        error::CommandRejection,
        services::scoring_service,
        state::{
            AppState,
            registry::ClientConnection,
            session::{CompetitionSession, RoutineSeed, RoutineStatus},
        },
    };

    struct Client {
        id: Uuid,
        rx: mpsc::UnboundedReceiver<Message>,
    }

    impl Client {
        fn drain_kinds(&mut self) -> Vec<String> {
            let mut kinds = Vec::new();
            while let Ok(Message::Text(text)) = self.rx.try_recv() {
                let value: serde_json::Value = serde_json::from_str(&text).unwrap();
                kinds.push(value["type"].as_str().unwrap_or_default().to_string());
            }
            kinds
        }
    }

    fn harness(routines: usize, config: AppConfig) -> (SharedState, Arc<SessionHub>) {
        let state = AppState::new(config);
        let seeds = (0..routines)
            .map(|index| RoutineSeed {
                id: Uuid::new_v4(),
                title: format!("Routine {}", index + 1),
                studio_name: "Starlight Dance Co".into(),
                duration_ms: 180_000,
            })
            .collect();
        let session = CompetitionSession::new("comp-1".into(), date!(2026 - 08 - 07), seeds);
        let hub = Arc::new(SessionHub::new(
            session,
            SessionPhase::NotStarted,
            8,
            None,
            state.dirty_sender(),
        ));
        state.hubs().insert("comp-1".into(), hub.clone());
        (state, hub)
    }

    fn connect(hub: &SessionHub, identity: &str, role: ClientRole) -> Client {
        let (tx, rx) = mpsc::unbounded_channel();
        let connection = ClientConnection {
            id: Uuid::new_v4(),
            identity: identity.into(),
            role,
            tx,
            connected_at: SystemTime::now(),
        };
        let id = connection.id;
        hub.registry().register(connection);
        Client { id, rx }
    }

    fn rejection_code(err: ServiceError) -> RejectCode {
        CommandRejection::from(err).code
    }

    #[tokio::test]
    async fn non_directors_have_no_authority() {
        let (state, hub) = harness(3, AppConfig::default());
        let judge = connect(&hub, "judge-1", ClientRole::Judge);

        let err = execute(&state, &hub, judge.id, DirectorCommand::Next)
            .await
            .unwrap_err();
        assert_eq!(rejection_code(err), RejectCode::NoAuthority);
    }

    #[tokio::test]
    async fn three_nexts_leave_routine_four_current() {
        let (state, hub) = harness(5, AppConfig::default());
        let mut director = connect(&hub, "cd-1", ClientRole::Director);

        for _ in 0..4 {
            execute(&state, &hub, director.id, DirectorCommand::Next)
                .await
                .unwrap();
        }

        let statuses = hub
            .read_session(|session| {
                session
                    .routines
                    .values()
                    .map(|routine| routine.status)
                    .collect::<Vec<_>>()
            })
            .await;
        assert_eq!(
            statuses,
            vec![
                RoutineStatus::Completed,
                RoutineStatus::Completed,
                RoutineStatus::Completed,
                RoutineStatus::Current,
                RoutineStatus::Queued,
            ]
        );

        let kinds = director.drain_kinds();
        assert!(kinds.iter().any(|kind| kind == "routine_current"));
        assert!(kinds.iter().any(|kind| kind == "command_accepted"));
    }

    #[tokio::test]
    async fn next_on_the_last_routine_is_rejected_unchanged() {
        let (state, hub) = harness(2, AppConfig::default());
        let director = connect(&hub, "cd-1", ClientRole::Director);

        execute(&state, &hub, director.id, DirectorCommand::Next)
            .await
            .unwrap();
        execute(&state, &hub, director.id, DirectorCommand::Next)
            .await
            .unwrap();

        let err = execute(&state, &hub, director.id, DirectorCommand::Next)
            .await
            .unwrap_err();
        assert_eq!(rejection_code(err), RejectCode::NoNextRoutine);
        assert_eq!(hub.phase().await, SessionPhase::Running);
        assert_eq!(
            hub.read_session(|session| session.current_index).await,
            Some(1)
        );
    }

    #[tokio::test]
    async fn double_break_start_is_already_on_break() {
        let (state, hub) = harness(3, AppConfig::default());
        let director = connect(&hub, "cd-1", ClientRole::Director);

        execute(&state, &hub, director.id, DirectorCommand::Next)
            .await
            .unwrap();
        execute(
            &state,
            &hub,
            director.id,
            DirectorCommand::BreakStart {
                duration_minutes: 15,
                reason: None,
            },
        )
        .await
        .unwrap();

        let err = execute(
            &state,
            &hub,
            director.id,
            DirectorCommand::BreakStart {
                duration_minutes: 5,
                reason: None,
            },
        )
        .await
        .unwrap_err();
        assert_eq!(rejection_code(err), RejectCode::AlreadyOnBreak);

        // Ending twice: the second end is an accepted no-op.
        execute(&state, &hub, director.id, DirectorCommand::BreakEnd)
            .await
            .unwrap();
        execute(&state, &hub, director.id, DirectorCommand::BreakEnd)
            .await
            .unwrap();
        assert_eq!(hub.phase().await, SessionPhase::Running);
    }

    #[tokio::test]
    async fn completed_session_refuses_commands_but_allows_previous() {
        let (state, hub) = harness(1, AppConfig::default());
        let director = connect(&hub, "cd-1", ClientRole::Director);

        execute(&state, &hub, director.id, DirectorCommand::Next)
            .await
            .unwrap();
        execute(&state, &hub, director.id, DirectorCommand::Complete)
            .await
            .unwrap();

        let err = execute(&state, &hub, director.id, DirectorCommand::Next)
            .await
            .unwrap_err();
        assert_eq!(rejection_code(err), RejectCode::SessionClosed);

        execute(&state, &hub, director.id, DirectorCommand::Previous)
            .await
            .unwrap();
        assert_eq!(hub.phase().await, SessionPhase::Running);
        assert_eq!(
            hub.read_session(|session| session.current_routine().map(|r| r.status))
                .await,
            Some(RoutineStatus::Current)
        );
    }

    #[tokio::test]
    async fn rebuilt_day_locks_commands_until_confirmed() {
        let (state, hub) = harness(2, AppConfig::default());
        hub.with_session_mut(|session| session.needs_day_confirmation = true)
            .await;
        let director = connect(&hub, "cd-1", ClientRole::Director);

        let err = execute(&state, &hub, director.id, DirectorCommand::Next)
            .await
            .unwrap_err();
        assert_eq!(rejection_code(err), RejectCode::DayUnconfirmed);

        execute(&state, &hub, director.id, DirectorCommand::ConfirmDay)
            .await
            .unwrap();
        execute(&state, &hub, director.id, DirectorCommand::Next)
            .await
            .unwrap();
        assert_eq!(hub.phase().await, SessionPhase::Running);
    }

    #[tokio::test]
    async fn ready_gating_refuses_next_until_judges_signal() {
        let config = AppConfig {
            require_all_judges_ready: true,
            ..AppConfig::default()
        };
        let (state, hub) = harness(2, config);
        let director = connect(&hub, "cd-1", ClientRole::Director);
        let judge = connect(&hub, "judge-1", ClientRole::Judge);

        let err = execute(&state, &hub, director.id, DirectorCommand::Next)
            .await
            .unwrap_err();
        assert_eq!(rejection_code(err), RejectCode::JudgesNotReady);

        scoring_service::set_ready(&hub, judge.id, true).await.unwrap();
        execute(&state, &hub, director.id, DirectorCommand::Next)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn amended_score_is_the_one_kept() {
        let (state, hub) = harness(2, AppConfig::default());
        let director = connect(&hub, "cd-1", ClientRole::Director);
        let judge = connect(&hub, "judge-1", ClientRole::Judge);

        execute(&state, &hub, director.id, DirectorCommand::Next)
            .await
            .unwrap();
        let routine_id = hub
            .read_session(|session| session.current_routine().map(|r| r.id))
            .await
            .unwrap();

        scoring_service::submit_score(&state, &hub, judge.id, routine_id, 87.5, None)
            .await
            .unwrap();
        scoring_service::submit_score(&state, &hub, judge.id, routine_id, 88.0, None)
            .await
            .unwrap();

        let scores = hub.scores().read().await.routine_scores(&routine_id).len();
        assert_eq!(scores, 1);
        let kept = hub
            .scores()
            .read()
            .await
            .routine_scores(&routine_id)
            .first()
            .map(|submission| submission.score)
            .unwrap();
        assert_eq!(kept, 88.0);
    }

    #[tokio::test]
    async fn scores_for_queued_routines_are_window_closed() {
        let (state, hub) = harness(2, AppConfig::default());
        let director = connect(&hub, "cd-1", ClientRole::Director);
        let judge = connect(&hub, "judge-1", ClientRole::Judge);

        execute(&state, &hub, director.id, DirectorCommand::Next)
            .await
            .unwrap();
        let queued_id = hub
            .read_session(|session| session.routines.get_index(1).map(|(id, _)| *id))
            .await
            .unwrap();

        let err = scoring_service::submit_score(&state, &hub, judge.id, queued_id, 90.0, None)
            .await
            .unwrap_err();
        assert_eq!(rejection_code(err), RejectCode::ScoreWindowClosed);
    }

    #[tokio::test]
    async fn out_of_range_score_is_rejected() {
        let (state, hub) = harness(1, AppConfig::default());
        let director = connect(&hub, "cd-1", ClientRole::Director);
        let judge = connect(&hub, "judge-1", ClientRole::Judge);

        execute(&state, &hub, director.id, DirectorCommand::Next)
            .await
            .unwrap();
        let routine_id = hub
            .read_session(|session| session.current_routine().map(|r| r.id))
            .await
            .unwrap();

        let err = scoring_service::submit_score(&state, &hub, judge.id, routine_id, 120.0, None)
            .await
            .unwrap_err();
        assert_eq!(rejection_code(err), RejectCode::ScoreOutOfRange);
    }

    #[tokio::test]
    async fn judge_break_request_reaches_directors_only() {
        let (_state, hub) = harness(2, AppConfig::default());
        let mut director = connect(&hub, "cd-1", ClientRole::Director);
        let judge = connect(&hub, "judge-1", ClientRole::Judge);
        let mut viewer = connect(&hub, "viewer-1", ClientRole::Viewer);

        judge_break_request(&hub, judge.id, 10).await.unwrap();

        let director_kinds = director.drain_kinds();
        assert!(director_kinds.iter().any(|kind| kind == "break_requested"));
        assert!(viewer.drain_kinds().is_empty());

        let pending = hub
            .read_session(|session| session.pending_break_requests.len())
            .await;
        assert_eq!(pending, 1);
    }

    #[tokio::test]
    async fn delay_update_is_broadcast_with_previous_value() {
        let (state, hub) = harness(2, AppConfig::default());
        let director = connect(&hub, "cd-1", ClientRole::Director);
        let mut viewer = connect(&hub, "viewer-1", ClientRole::Viewer);

        execute(
            &state,
            &hub,
            director.id,
            DirectorCommand::SetDelay { delay_minutes: 20 },
        )
        .await
        .unwrap();

        assert_eq!(
            hub.read_session(|session| session.delay_minutes).await,
            20
        );
        let kinds = viewer.drain_kinds();
        assert!(kinds.iter().any(|kind| kind == "delay_updated"));
    }
}
