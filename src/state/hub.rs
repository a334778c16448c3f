use std::time::Duration;

use axum::extract::ws::Message;
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio::time::timeout;
use tracing::warn;
use uuid::Uuid;

use crate::{
    dto::{
        session::SessionSnapshot,
        sse::ServerEvent,
        ws::{ClientRole, ServerMessage},
    },
    error::ServiceError,
    state::{
        registry::ConnectionRegistry,
        scores::ScoreBook,
        session::CompetitionSession,
        sse::SseHub,
        state_machine::{
            AbortError, ApplyError, Plan, PlanError, PlanId, SessionEvent, SessionPhase,
            SessionStateMachine,
        },
    },
};

/// One logical hub per competition: the single authoritative session state,
/// the connection set, and the serialized entry point every state-mutating
/// message goes through. Command ordering is total per competition; nothing
/// is guaranteed across competitions.
pub struct SessionHub {
    competition_id: String,
    machine: RwLock<SessionStateMachine>,
    session: RwLock<CompetitionSession>,
    scores: RwLock<ScoreBook>,
    registry: ConnectionRegistry,
    viewer_sse: SseHub,
    command_gate: Mutex<()>,
    command_timeout: Option<Duration>,
    dirty_tx: mpsc::UnboundedSender<String>,
}

impl SessionHub {
    /// Build a hub around a (fresh or restored) session.
    pub fn new(
        session: CompetitionSession,
        phase: SessionPhase,
        viewer_capacity: usize,
        command_timeout: Option<Duration>,
        dirty_tx: mpsc::UnboundedSender<String>,
    ) -> Self {
        Self {
            competition_id: session.competition_id.clone(),
            machine: RwLock::new(SessionStateMachine::restored(phase)),
            session: RwLock::new(session),
            scores: RwLock::new(ScoreBook::new()),
            registry: ConnectionRegistry::new(),
            viewer_sse: SseHub::new(viewer_capacity),
            command_gate: Mutex::new(()),
            command_timeout,
            dirty_tx,
        }
    }

    /// Competition this hub coordinates.
    pub fn competition_id(&self) -> &str {
        &self.competition_id
    }

    /// Connection registry of this competition.
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Broadcast hub for the read-only viewer SSE stream.
    pub fn viewer_sse(&self) -> &SseHub {
        &self.viewer_sse
    }

    /// Collected score submissions.
    pub fn scores(&self) -> &RwLock<ScoreBook> {
        &self.scores
    }

    /// Snapshot the current phase.
    pub async fn phase(&self) -> SessionPhase {
        self.machine.read().await.phase()
    }

    /// Run a closure over the immutable session state.
    pub async fn read_session<F, T>(&self, reader: F) -> T
    where
        F: FnOnce(&CompetitionSession) -> T,
    {
        let guard = self.session.read().await;
        reader(&guard)
    }

    /// Run a closure over the mutable session state. Callers must hold the
    /// command gate (i.e. run inside [`Self::run_transition`] or
    /// [`Self::run_serialized`]) so mutations stay totally ordered.
    pub async fn with_session_mut<F, T>(&self, mutator: F) -> T
    where
        F: FnOnce(&mut CompetitionSession) -> T,
    {
        let mut guard = self.session.write().await;
        mutator(&mut guard)
    }

    /// Assemble the canonical snapshot clients adopt unconditionally.
    pub async fn snapshot(&self) -> SessionSnapshot {
        let phase = self.phase().await;
        let judges = self
            .registry
            .judges_snapshot()
            .iter()
            .map(Into::into)
            .collect();
        let guard = self.session.read().await;
        SessionSnapshot::collect(phase, &guard, judges)
    }

    /// Signal the snapshot supervisor that durable state changed.
    pub fn mark_dirty(&self) {
        let _ = self.dirty_tx.send(self.competition_id.clone());
    }

    /// Capture the durable record the snapshot supervisor writes.
    pub async fn snapshot_record(&self, now: std::time::SystemTime) -> crate::dao::models::SnapshotRecord {
        let phase = self.phase().await;
        let guard = self.session.read().await;
        crate::dao::models::SnapshotRecord::capture(phase, &guard, now)
    }

    /// Execute a phase transition with its side effects under the command
    /// gate: plan the transition, run `effect`, then apply. A failed or
    /// timed-out effect aborts the plan and leaves the phase untouched.
    pub async fn run_transition<F, Fut, T>(
        &self,
        event: SessionEvent,
        effect: F,
    ) -> Result<(T, SessionPhase), ServiceError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, ServiceError>>,
    {
        let gate = self.acquire_gate().await?;
        let Plan { id: plan_id, .. } = self.plan_transition(event).await?;

        let effect_future = effect();
        let outcome = if let Some(limit) = self.command_timeout {
            match timeout(limit, effect_future).await {
                Ok(result) => result,
                Err(_) => {
                    if let Err(abort_err) = self.abort_transition(plan_id).await {
                        warn!(
                            event = ?event,
                            plan_id = %plan_id,
                            error = ?abort_err,
                            "failed to abort transition after timeout"
                        );
                    }
                    drop(gate);
                    return Err(ServiceError::Timeout);
                }
            }
        } else {
            effect_future.await
        };

        match outcome {
            Ok(value) => {
                let next = self.apply_planned_transition(plan_id).await?;
                drop(gate);
                self.mark_dirty();
                Ok((value, next))
            }
            Err(err) => {
                if let Err(abort_err) = self.abort_transition(plan_id).await {
                    warn!(
                        event = ?event,
                        plan_id = %plan_id,
                        error = ?abort_err,
                        "failed to abort transition after effect error"
                    );
                }
                drop(gate);
                Err(err)
            }
        }
    }

    /// Execute a state mutation that does not change the phase (score
    /// submissions, delay updates, break-request bookkeeping) under the same
    /// serialized gate that phase transitions use.
    pub async fn run_serialized<F, Fut, T>(&self, work: F) -> Result<T, ServiceError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, ServiceError>>,
    {
        let gate = self.acquire_gate().await?;
        let outcome = if let Some(limit) = self.command_timeout {
            timeout(limit, work())
                .await
                .map_err(|_| ServiceError::Timeout)?
        } else {
            work().await
        };
        drop(gate);
        if outcome.is_ok() {
            self.mark_dirty();
        }
        outcome
    }

    /// Serialize a message once and deliver it to every live connection,
    /// mirroring it onto the viewer SSE stream.
    pub fn broadcast_all(&self, message: &ServerMessage) {
        let Some(payload) = serialize(message) else {
            return;
        };

        for connection in self.registry.connections_snapshot() {
            self.push_payload(connection.id, &connection.tx, &payload);
        }

        self.viewer_sse.broadcast(ServerEvent::new(
            Some(message.kind().to_string()),
            payload,
        ));
    }

    /// Deliver a message to director connections only (judge readiness and
    /// score traffic never reaches other judges or viewers).
    pub fn send_to_directors(&self, message: &ServerMessage) {
        let Some(payload) = serialize(message) else {
            return;
        };

        for connection in self.registry.connections_snapshot() {
            if connection.role == ClientRole::Director {
                self.push_payload(connection.id, &connection.tx, &payload);
            }
        }
    }

    /// Deliver a message to a single connection.
    pub fn send_to_connection(&self, connection_id: Uuid, message: &ServerMessage) {
        let Some(connection) = self.registry.get(connection_id) else {
            return;
        };
        let Some(payload) = serialize(message) else {
            return;
        };
        self.push_payload(connection.id, &connection.tx, &payload);
    }

    async fn acquire_gate(&self) -> Result<tokio::sync::MutexGuard<'_, ()>, ServiceError> {
        match self.command_timeout {
            Some(limit) => timeout(limit, self.command_gate.lock())
                .await
                .map_err(|_| ServiceError::Timeout),
            None => Ok(self.command_gate.lock().await),
        }
    }

    async fn plan_transition(&self, event: SessionEvent) -> Result<Plan, PlanError> {
        let mut machine = self.machine.write().await;
        machine.plan(event)
    }

    async fn apply_planned_transition(&self, plan_id: PlanId) -> Result<SessionPhase, ApplyError> {
        let mut machine = self.machine.write().await;
        machine.apply(plan_id)
    }

    async fn abort_transition(&self, plan_id: PlanId) -> Result<(), AbortError> {
        let mut machine = self.machine.write().await;
        machine.abort(plan_id)
    }

    fn push_payload(&self, connection_id: Uuid, tx: &mpsc::UnboundedSender<Message>, payload: &str) {
        if tx.send(Message::Text(payload.to_string().into())).is_err() {
            // Writer task is gone; the socket handler cleans the registry up,
            // but drop the entry now so we stop queueing to a dead channel.
            self.registry.remove(connection_id);
        }
    }
}

fn serialize(message: &ServerMessage) -> Option<String> {
    match serde_json::to_string(message) {
        Ok(payload) => Some(payload),
        Err(err) => {
            warn!(kind = message.kind(), error = %err, "failed to serialize outbound message");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use time::macros::date;

    use super::*;
    use crate::state::session::RoutineSeed;

    fn hub_with(count: usize) -> SessionHub {
        let seeds = (0..count)
            .map(|index| RoutineSeed {
                id: Uuid::new_v4(),
                title: format!("Routine {}", index + 1),
                studio_name: "Starlight Dance Co".into(),
                duration_ms: 180_000,
            })
            .collect();
        let session = CompetitionSession::new("comp-1".into(), date!(2026 - 08 - 07), seeds);
        let (dirty_tx, _dirty_rx) = mpsc::unbounded_channel();
        SessionHub::new(
            session,
            SessionPhase::NotStarted,
            4,
            Some(Duration::from_millis(200)),
            dirty_tx,
        )
    }

    #[tokio::test]
    async fn transition_applies_after_effect_succeeds() {
        let hub = hub_with(2);
        let (_, next) = hub
            .run_transition(SessionEvent::Advance, || async { Ok(()) })
            .await
            .unwrap();
        assert_eq!(next, SessionPhase::Running);
        assert_eq!(hub.phase().await, SessionPhase::Running);
    }

    #[tokio::test]
    async fn failed_effect_keeps_the_phase() {
        let hub = hub_with(2);
        let result: Result<((), SessionPhase), _> = hub
            .run_transition(SessionEvent::Advance, || async {
                Err(ServiceError::InvalidState("effect failed".into()))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(hub.phase().await, SessionPhase::NotStarted);
    }

    #[tokio::test]
    async fn slow_effect_times_out_and_aborts() {
        let hub = hub_with(2);
        let result: Result<((), SessionPhase), _> = hub
            .run_transition(SessionEvent::Advance, || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(ServiceError::Timeout)));
        assert_eq!(hub.phase().await, SessionPhase::NotStarted);
        // The gate and the machine are free again afterwards.
        let (_, next) = hub
            .run_transition(SessionEvent::Advance, || async { Ok(()) })
            .await
            .unwrap();
        assert_eq!(next, SessionPhase::Running);
    }

    #[tokio::test]
    async fn dirty_signal_fires_on_applied_transition() {
        let seeds = vec![RoutineSeed {
            id: Uuid::new_v4(),
            title: "Solo".into(),
            studio_name: "Starlight Dance Co".into(),
            duration_ms: 150_000,
        }];
        let session = CompetitionSession::new("comp-9".into(), date!(2026 - 08 - 07), seeds);
        let (dirty_tx, mut dirty_rx) = mpsc::unbounded_channel();
        let hub = SessionHub::new(session, SessionPhase::NotStarted, 4, None, dirty_tx);

        hub.run_transition(SessionEvent::Advance, || async { Ok(()) })
            .await
            .unwrap();

        assert_eq!(dirty_rx.try_recv().unwrap(), "comp-9");
    }
}
