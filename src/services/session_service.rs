use std::sync::Arc;
use std::time::SystemTime;

use time::Date;
use tracing::{info, warn};

use crate::{
    dao::models::SnapshotRecord,
    dto::{
        self, format_day,
        routines::RoutineListInput,
        session::SessionSnapshot,
        ws::ServerMessage,
    },
    error::ServiceError,
    state::{
        SessionHub, SharedState,
        session::{CompetitionSession, RoutineSeed},
        state_machine::SessionPhase,
    },
};

/// Fetch the hub coordinating a competition, bootstrapping it from the
/// durable store on first contact.
///
/// Bootstrap policy: a stored snapshot is adopted only when it is younger
/// than the staleness threshold **and** covers today's date. A stale or
/// day-mismatched record keeps its routine roster but resets every routine to
/// queued and locks authoritative commands behind an explicit director
/// confirmation; prior-day state is never resumed automatically.
pub async fn open_session(
    state: &SharedState,
    competition_id: &str,
) -> Result<Arc<SessionHub>, ServiceError> {
    if let Some(hub) = state.hub(competition_id) {
        return Ok(hub);
    }

    let today = dto::today();
    let (phase, session) = bootstrap_session(state, competition_id, today).await;

    let hub = Arc::new(SessionHub::new(
        session,
        phase,
        state.config().viewer_channel_capacity,
        Some(state.config().command_timeout),
        state.dirty_sender(),
    ));

    // Another connection may have won the race; keep whichever hub landed first.
    let hub = state
        .hubs()
        .entry(competition_id.to_string())
        .or_insert_with(|| hub.clone())
        .clone();

    Ok(hub)
}

async fn bootstrap_session(
    state: &SharedState,
    competition_id: &str,
    today: Date,
) -> (SessionPhase, CompetitionSession) {
    let Some(store) = state.snapshot_store().await else {
        info!(competition_id, "no durable store available; starting a fresh session");
        return fresh(competition_id, today, Vec::new(), false);
    };

    match store.load(competition_id.to_string()).await {
        Ok(Some(record)) => adopt_or_reset(competition_id, record, today, state),
        Ok(None) => {
            info!(competition_id, "no stored snapshot; starting a fresh session");
            fresh(competition_id, today, Vec::new(), false)
        }
        Err(err) => {
            // An unreadable record may hide real prior state, so the operator
            // has to confirm before commands flow again.
            warn!(
                competition_id,
                error = %err,
                "failed to load stored snapshot; starting fresh pending confirmation"
            );
            fresh(competition_id, today, Vec::new(), true)
        }
    }
}

fn adopt_or_reset(
    competition_id: &str,
    record: SnapshotRecord,
    today: Date,
    state: &SharedState,
) -> (SessionPhase, CompetitionSession) {
    let day_matches = record.competition_day == format_day(today);
    let age = record.age(SystemTime::now());
    let fresh_enough = age <= state.config().snapshot_staleness;

    if day_matches && fresh_enough {
        match record.restore() {
            Ok((phase, session)) => {
                info!(
                    competition_id,
                    ?phase,
                    age_secs = age.as_secs(),
                    "restored session from stored snapshot"
                );
                return (phase, session);
            }
            Err(err) => {
                warn!(competition_id, error = %err, "stored snapshot unusable; resetting");
                return fresh(competition_id, today, Vec::new(), true);
            }
        }
    }

    // Keep the roster so the director does not have to re-ingest the routine
    // list, but drop all runtime statuses and demand confirmation.
    let seeds = record
        .routines
        .iter()
        .map(|routine| RoutineSeed {
            id: routine.id,
            title: routine.title.clone(),
            studio_name: routine.studio_name.clone(),
            duration_ms: routine.duration_ms,
        })
        .collect();

    if !day_matches {
        info!(
            competition_id,
            stored_day = %record.competition_day,
            "stored snapshot covers another day; rebuilding pending confirmation"
        );
    } else {
        info!(
            competition_id,
            age_secs = age.as_secs(),
            "stored snapshot is stale; rebuilding pending confirmation"
        );
    }

    fresh(competition_id, today, seeds, true)
}

fn fresh(
    competition_id: &str,
    today: Date,
    seeds: Vec<RoutineSeed>,
    needs_day_confirmation: bool,
) -> (SessionPhase, CompetitionSession) {
    let mut session = CompetitionSession::new(competition_id.to_string(), today, seeds);
    session.needs_day_confirmation = needs_day_confirmation;
    (SessionPhase::NotStarted, session)
}

/// Replace a competition day's routine list from the ordering collaborator.
/// Only legal before the first advance.
pub async fn ingest_routines(
    state: &SharedState,
    competition_id: &str,
    input: RoutineListInput,
) -> Result<SessionSnapshot, ServiceError> {
    let day = match &input.competition_day {
        Some(raw) => dto::parse_day(raw)
            .map_err(|err| ServiceError::InvalidInput(format!("invalid competition day: {err}")))?,
        None => dto::today(),
    };
    let seeds: Vec<RoutineSeed> = input.routines.into_iter().map(Into::into).collect();

    let hub = open_session(state, competition_id).await?;

    hub.run_serialized(|| async {
        if hub.phase().await != SessionPhase::NotStarted {
            return Err(ServiceError::InvalidState(
                "routine list can only be replaced before the first routine runs".into(),
            ));
        }
        hub.with_session_mut(|session| {
            session.day = day;
            session.replace_routines(seeds);
        })
        .await;
        Ok(())
    })
    .await?;

    let snapshot = hub.snapshot().await;
    // Everyone already connected adopts the new roster.
    hub.broadcast_all(&ServerMessage::SyncState {
        snapshot: snapshot.clone(),
    });

    info!(
        competition_id,
        routines = snapshot.routines.len(),
        "routine list ingested"
    );
    Ok(snapshot)
}

/// Canonical snapshot for REST viewers; competitions never contacted before
/// are reported as unknown rather than implicitly created.
pub async fn query_snapshot(
    state: &SharedState,
    competition_id: &str,
) -> Result<SessionSnapshot, ServiceError> {
    let hub = state
        .hub(competition_id)
        .ok_or_else(|| ServiceError::NotFound(format!("competition `{competition_id}` not live")))?;
    Ok(hub.snapshot().await)
}
