use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    dto::{format_day, format_system_time, phase::VisiblePhase},
    state::{
        registry::JudgeConnection,
        session::{
            BreakRequest, BreakState, CompetitionSession, RoutineRuntimeState, RoutineStatus,
        },
        state_machine::SessionPhase,
    },
};

/// Wire projection of a routine's live status.
#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RoutineStatusDto {
    /// Not yet performed.
    Queued,
    /// On stage right now.
    Current,
    /// Performed and closed out.
    Completed,
    /// Withdrawn by the director.
    Skipped,
}

impl From<RoutineStatus> for RoutineStatusDto {
    fn from(value: RoutineStatus) -> Self {
        match value {
            RoutineStatus::Queued => RoutineStatusDto::Queued,
            RoutineStatus::Current => RoutineStatusDto::Current,
            RoutineStatus::Completed => RoutineStatusDto::Completed,
            RoutineStatus::Skipped => RoutineStatusDto::Skipped,
        }
    }
}

/// Snapshot of one routine as broadcast to every role.
#[derive(Debug, Serialize, ToSchema, Clone)]
pub struct RoutineSnapshot {
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
    /// Live status.
    pub status: RoutineStatusDto,
}

impl From<&RoutineRuntimeState> for RoutineSnapshot {
    fn from(routine: &RoutineRuntimeState) -> Self {
        Self {
            id: routine.id,
            title: routine.title.clone(),
            studio_name: routine.studio_name.clone(),
            order: routine.order,
            duration_ms: routine.duration_ms,
            status: routine.status.into(),
        }
    }
}

/// Snapshot of an active intermission.
#[derive(Debug, Serialize, ToSchema, Clone)]
pub struct BreakSnapshot {
    /// Planned length of the intermission.
    pub duration_minutes: u32,
    /// Optional operator-facing reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// When the intermission began (RFC 3339).
    pub started_at: String,
}

impl From<&BreakState> for BreakSnapshot {
    fn from(value: &BreakState) -> Self {
        Self {
            duration_minutes: value.duration_minutes,
            reason: value.reason.clone(),
            started_at: format_system_time(value.started_at),
        }
    }
}

/// Snapshot of a pending judge break request.
#[derive(Debug, Serialize, ToSchema, Clone)]
pub struct BreakRequestSnapshot {
    /// Identifier used by the director to approve or deny.
    pub request_id: Uuid,
    /// Judge who asked.
    pub judge_id: String,
    /// Display name of the judge who asked.
    pub judge_name: String,
    /// Requested length.
    pub duration_minutes: u32,
    /// When the request was made (RFC 3339).
    pub requested_at: String,
}

impl From<&BreakRequest> for BreakRequestSnapshot {
    fn from(value: &BreakRequest) -> Self {
        Self {
            request_id: value.request_id,
            judge_id: value.judge_id.clone(),
            judge_name: value.judge_name.clone(),
            duration_minutes: value.duration_minutes,
            requested_at: format_system_time(value.requested_at),
        }
    }
}

/// One judge's readiness and connectivity as shown to directors.
#[derive(Debug, Serialize, ToSchema, Clone)]
pub struct JudgeStatusEntry {
    /// Authenticated identity of the judge.
    pub judge_id: String,
    /// Display name shown on the director console.
    pub display_name: String,
    /// Whether the judge signalled readiness.
    pub ready: bool,
    /// Whether the judge currently holds a live connection.
    pub connected: bool,
}

impl From<&JudgeConnection> for JudgeStatusEntry {
    fn from(value: &JudgeConnection) -> Self {
        Self {
            judge_id: value.judge_id.clone(),
            display_name: value.display_name.clone(),
            ready: value.ready,
            connected: value.connected,
        }
    }
}

/// Canonical session snapshot: what a reconnecting client adopts wholesale
/// and what viewers can query over REST.
#[derive(Debug, Serialize, ToSchema, Clone)]
pub struct SessionSnapshot {
    /// Competition this session belongs to.
    pub competition_id: String,
    /// Calendar day the session covers (`YYYY-MM-DD`).
    pub competition_day: String,
    /// Current phase.
    pub phase: VisiblePhase,
    /// Index of the current routine into the running order.
    pub current_routine_index: Option<usize>,
    /// Running schedule delay in minutes.
    pub delay_minutes: u32,
    /// When the first routine went current (RFC 3339).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    /// When the director last paused (RFC 3339).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paused_at: Option<String>,
    /// Active intermission, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_break: Option<BreakSnapshot>,
    /// Set until the director confirms a rebuilt session after a day change.
    pub needs_day_confirmation: bool,
    /// Every routine of the day in running order.
    pub routines: Vec<RoutineSnapshot>,
    /// Judge panel status (directors see this live, reconnects adopt it).
    pub judges: Vec<JudgeStatusEntry>,
    /// Break requests awaiting a director decision.
    pub pending_break_requests: Vec<BreakRequestSnapshot>,
}

impl SessionSnapshot {
    /// Assemble the canonical snapshot from the authoritative state.
    pub fn collect(
        phase: SessionPhase,
        session: &CompetitionSession,
        judges: Vec<JudgeStatusEntry>,
    ) -> Self {
        Self {
            competition_id: session.competition_id.clone(),
            competition_day: format_day(session.day),
            phase: phase.into(),
            current_routine_index: session.current_index,
            delay_minutes: session.delay_minutes,
            start_time: session.start_time.map(format_system_time),
            paused_at: session.paused_at.map(format_system_time),
            active_break: session.active_break.as_ref().map(Into::into),
            needs_day_confirmation: session.needs_day_confirmation,
            routines: session.routines.values().map(Into::into).collect(),
            judges,
            pending_break_requests: session
                .pending_break_requests
                .iter()
                .map(Into::into)
                .collect(),
        }
    }
}
