use serde::{Deserialize, Serialize};
use serde_json::Error as JsonError;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    dto::{
        phase::VisiblePhase,
        session::{RoutineSnapshot, SessionSnapshot},
    },
    error::RejectCode,
};

/// Role a WebSocket connection authenticates as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ClientRole {
    /// The single authoritative console issuing state-changing commands.
    Director,
    /// Submits scores and readiness signals.
    Judge,
    /// Read-only subscriber.
    Viewer,
}

impl ClientRole {
    /// Lowercase wire name, used in logs and presence payloads.
    pub fn as_str(self) -> &'static str {
        match self {
            ClientRole::Director => "director",
            ClientRole::Judge => "judge",
            ClientRole::Viewer => "viewer",
        }
    }
}

/// Authoritative commands a director console can issue.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, ToSchema)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum DirectorCommand {
    /// Close out the current routine and put the next one on stage.
    Next,
    /// Re-open the prior routine.
    Previous,
    /// Withdraw the current routine and move on.
    Skip,
    /// Halt the clock.
    Pause,
    /// Return to the live show.
    Resume,
    /// Begin an intermission.
    BreakStart {
        /// Planned length of the intermission.
        duration_minutes: u32,
        /// Optional operator-facing reason.
        #[serde(default)]
        reason: Option<String>,
    },
    /// End the intermission.
    BreakEnd,
    /// Approve a judge's pending break request.
    BreakApprove {
        /// Request being approved.
        request_id: Uuid,
    },
    /// Deny a judge's pending break request.
    BreakDeny {
        /// Request being denied.
        request_id: Uuid,
        /// Optional reason relayed to the requesting judge.
        #[serde(default)]
        reason: Option<String>,
    },
    /// Update the running schedule delay.
    SetDelay {
        /// New delay in minutes.
        delay_minutes: u32,
    },
    /// Confirm reuse of the competition after a day transition.
    ConfirmDay,
    /// Close the session for the day.
    Complete,
}

impl DirectorCommand {
    /// Wire name of the command, used in acknowledgments and logs.
    pub fn name(&self) -> &'static str {
        match self {
            DirectorCommand::Next => "next",
            DirectorCommand::Previous => "previous",
            DirectorCommand::Skip => "skip",
            DirectorCommand::Pause => "pause",
            DirectorCommand::Resume => "resume",
            DirectorCommand::BreakStart { .. } => "break_start",
            DirectorCommand::BreakEnd => "break_end",
            DirectorCommand::BreakApprove { .. } => "break_approve",
            DirectorCommand::BreakDeny { .. } => "break_deny",
            DirectorCommand::SetDelay { .. } => "set_delay",
            DirectorCommand::ConfirmDay => "confirm_day",
            DirectorCommand::Complete => "complete",
        }
    }
}

/// Messages accepted from WebSocket clients.
#[derive(Debug, Deserialize, Serialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Mandatory first message on every connection.
    Authenticate {
        /// Competition the client wants to join.
        competition_id: String,
        /// Stable identity of the person or device.
        identity: String,
        /// Role the client claims.
        role: ClientRole,
        /// Credential issued by the management platform.
        token: String,
        /// Optional display name (judges show this on the director console).
        #[serde(default)]
        display_name: Option<String>,
    },
    /// An authoritative command; directors only.
    DirectorCommand {
        /// The command and its arguments.
        #[serde(flatten)]
        command: DirectorCommand,
    },
    /// A judge submits or amends a score for a routine.
    #[serde(rename = "score_submitted")]
    SubmitScore {
        /// Routine being scored.
        routine_id: Uuid,
        /// Numeric score.
        score: f64,
        /// Free-form judge notes.
        #[serde(default)]
        notes: Option<String>,
    },
    /// A judge toggles readiness; idempotent.
    JudgeReady {
        /// New readiness flag.
        ready: bool,
    },
    /// A judge asks the director for an intermission.
    BreakRequest {
        /// Requested length.
        duration_minutes: u32,
    },
    /// Ask for the canonical state, e.g. after a reconnect.
    SyncRequest,
    /// Latency probe.
    Ping {
        /// Client wall clock in unix milliseconds.
        client_time: i64,
    },
}

impl ClientMessage {
    /// Parse and minimally shape-check an incoming text frame.
    pub fn from_json_str(payload: &str) -> Result<Self, JsonError> {
        serde_json::from_str(payload)
    }
}

/// Messages pushed to WebSocket clients and mirrored (where viewer-visible)
/// onto the SSE stream.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Positive reply to `authenticate`, carrying the canonical state.
    Authenticated {
        /// Competition the connection joined.
        competition_id: String,
        /// Role granted (may differ from the claimed one after demotion).
        role: ClientRole,
        /// Canonical session snapshot to adopt unconditionally.
        snapshot: SessionSnapshot,
    },
    /// Typed rejection of the sender's last message; never broadcast.
    Error {
        /// Machine-readable rejection code.
        code: RejectCode,
        /// Human-readable detail.
        message: String,
    },
    /// Acknowledgment that a director command was applied.
    CommandAccepted {
        /// Wire name of the accepted command.
        command: String,
        /// Phase after the command.
        phase: VisiblePhase,
    },
    /// The session phase changed.
    PhaseChanged {
        /// New phase.
        phase: VisiblePhase,
    },
    /// A routine went on stage.
    RoutineCurrent {
        /// The routine now current.
        routine: RoutineSnapshot,
    },
    /// A routine was closed out (completed or skipped).
    RoutineCompleted {
        /// The routine that finished.
        routine: RoutineSnapshot,
    },
    /// Judge readiness or connectivity changed; directors only.
    JudgeStatus {
        /// Judge identity.
        judge_id: String,
        /// Display name shown on the director console.
        display_name: String,
        /// Readiness flag.
        ready: bool,
        /// Connectivity flag.
        connected: bool,
    },
    /// A judge submitted or amended a score; directors only.
    ScoreSubmitted {
        /// Routine being scored.
        routine_id: Uuid,
        /// Judge identity.
        judge_id: String,
        /// Judge display name.
        judge_name: String,
        /// The score as accepted.
        score: f64,
        /// Free-form judge notes.
        #[serde(skip_serializing_if = "Option::is_none")]
        notes: Option<String>,
        /// Submission timestamp (RFC 3339).
        submitted_at: String,
    },
    /// An intermission began.
    BreakStarted {
        /// Planned length.
        duration_minutes: u32,
        /// Optional operator-facing reason.
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        /// Start timestamp (RFC 3339).
        started_at: String,
    },
    /// The intermission ended.
    BreakEnded,
    /// A judge asked for an intermission; directors only.
    BreakRequested {
        /// Identifier for the approve/deny decision.
        request_id: Uuid,
        /// Judge who asked.
        judge_id: String,
        /// Display name of the judge who asked.
        judge_name: String,
        /// Requested length.
        duration_minutes: u32,
        /// Request timestamp (RFC 3339).
        requested_at: String,
    },
    /// The director approved a break request.
    BreakApproved {
        /// The approved request.
        request_id: Uuid,
        /// Approved length.
        duration_minutes: u32,
    },
    /// The director denied a break request.
    BreakDenied {
        /// The denied request.
        request_id: Uuid,
        /// Optional reason relayed to the requesting judge.
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    /// The running schedule delay changed.
    DelayUpdated {
        /// New delay in minutes.
        delay_minutes: u32,
        /// Delay before the change.
        previous_delay_minutes: u32,
    },
    /// Someone joined the competition session.
    PresenceJoined {
        /// Identity of the client that joined.
        identity: String,
        /// Role it joined as.
        role: ClientRole,
    },
    /// Someone left the competition session.
    PresenceLeft {
        /// Identity of the client that left.
        identity: String,
        /// Role it held.
        role: ClientRole,
    },
    /// The server changed this connection's role (e.g. director demotion).
    RoleChanged {
        /// The role now in effect.
        role: ClientRole,
    },
    /// The session was rebuilt for a new day and awaits confirmation.
    DayConfirmationRequired {
        /// The day the session now covers (`YYYY-MM-DD`).
        competition_day: String,
    },
    /// Reply to `sync_request` with the canonical state.
    SyncState {
        /// Canonical session snapshot to adopt unconditionally.
        snapshot: SessionSnapshot,
    },
    /// Durability indicator: set while snapshots are not being persisted.
    SystemStatus {
        /// Whether the backend runs in memory only right now.
        degraded: bool,
    },
    /// Latency probe reply.
    Pong {
        /// Echoed client wall clock.
        client_time: i64,
        /// Server wall clock in unix milliseconds.
        server_time: i64,
    },
}

impl ServerMessage {
    /// Wire name of the message, reused as the SSE event name.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Authenticated { .. } => "authenticated",
            ServerMessage::Error { .. } => "error",
            ServerMessage::CommandAccepted { .. } => "command_accepted",
            ServerMessage::PhaseChanged { .. } => "phase_changed",
            ServerMessage::RoutineCurrent { .. } => "routine_current",
            ServerMessage::RoutineCompleted { .. } => "routine_completed",
            ServerMessage::JudgeStatus { .. } => "judge_status",
            ServerMessage::ScoreSubmitted { .. } => "score_submitted",
            ServerMessage::BreakStarted { .. } => "break_started",
            ServerMessage::BreakEnded => "break_ended",
            ServerMessage::BreakRequested { .. } => "break_requested",
            ServerMessage::BreakApproved { .. } => "break_approved",
            ServerMessage::BreakDenied { .. } => "break_denied",
            ServerMessage::DelayUpdated { .. } => "delay_updated",
            ServerMessage::PresenceJoined { .. } => "presence_joined",
            ServerMessage::PresenceLeft { .. } => "presence_left",
            ServerMessage::RoleChanged { .. } => "role_changed",
            ServerMessage::DayConfirmationRequired { .. } => "day_confirmation_required",
            ServerMessage::SyncState { .. } => "sync_state",
            ServerMessage::SystemStatus { .. } => "system_status",
            ServerMessage::Pong { .. } => "pong",
        }
    }

    /// Build an error message from a typed rejection.
    pub fn rejection(rejection: crate::error::CommandRejection) -> Self {
        ServerMessage::Error {
            code: rejection.code,
            message: rejection.message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authenticate_parses_with_optional_display_name() {
        let message = ClientMessage::from_json_str(
            r#"{"type":"authenticate","competition_id":"comp-1","identity":"judge-7",
                "role":"judge","token":"tok","display_name":"Dana"}"#,
        )
        .unwrap();
        match message {
            ClientMessage::Authenticate {
                role, display_name, ..
            } => {
                assert_eq!(role, ClientRole::Judge);
                assert_eq!(display_name.as_deref(), Some("Dana"));
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn director_command_flattens_onto_the_envelope() {
        let message = ClientMessage::from_json_str(
            r#"{"type":"director_command","command":"break_start","duration_minutes":15,
                "reason":"floor repair"}"#,
        )
        .unwrap();
        match message {
            ClientMessage::DirectorCommand {
                command: DirectorCommand::BreakStart {
                    duration_minutes,
                    reason,
                },
            } => {
                assert_eq!(duration_minutes, 15);
                assert_eq!(reason.as_deref(), Some("floor repair"));
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn score_submission_uses_the_shared_event_name() {
        let message = ClientMessage::from_json_str(&format!(
            r#"{{"type":"score_submitted","routine_id":"{}","score":87.5}}"#,
            uuid::Uuid::new_v4()
        ))
        .unwrap();
        match message {
            ClientMessage::SubmitScore { score, notes, .. } => {
                assert_eq!(score, 87.5);
                assert!(notes.is_none());
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn unknown_role_is_rejected_at_parse_time() {
        let result = ClientMessage::from_json_str(
            r#"{"type":"authenticate","competition_id":"c","identity":"i",
                "role":"backstage","token":"t"}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn error_message_carries_wire_code() {
        let message = ServerMessage::Error {
            code: RejectCode::ScoreWindowClosed,
            message: "window closed".into(),
        };
        let encoded = serde_json::to_string(&message).unwrap();
        assert!(encoded.contains("\"SCORE_WINDOW_CLOSED\""));
        assert!(encoded.contains("\"error\""));
    }
}
