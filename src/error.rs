use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;
use validator::ValidationErrors;

use crate::{
    dao::storage::StorageError,
    state::{AbortError, ApplyError, PlanError},
};

/// Typed rejection codes returned to the connection that sent an offending
/// command. Serialized in SCREAMING_SNAKE_CASE on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectCode {
    /// Connection failed authentication or claimed an unknown role.
    AuthRejected,
    /// Sender is not allowed to issue authoritative commands.
    NoAuthority,
    /// `next`/`skip` issued while the last routine is already current.
    NoNextRoutine,
    /// `previous` issued with nothing before the current routine.
    NoPreviousRoutine,
    /// `break_start` issued while a break is already active.
    AlreadyOnBreak,
    /// Command issued after the session reached `completed`.
    SessionClosed,
    /// Commands are locked until the director confirms the new day.
    DayUnconfirmed,
    /// `next` refused because a connected judge is not ready.
    JudgesNotReady,
    /// Submitted score falls outside the configured range.
    ScoreOutOfRange,
    /// Routine is neither current nor within its grace window.
    ScoreWindowClosed,
    /// Command cannot be applied in the current session phase.
    InvalidPhase,
    /// Referenced entity (routine, break request) does not exist.
    NotFound,
    /// Command was not acknowledged within the configured deadline.
    CommandTimeout,
    /// Backend cannot serve the request right now.
    ServiceUnavailable,
}

/// A typed, per-command rejection delivered only to the sender.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code:?}: {message}")]
pub struct CommandRejection {
    /// Machine-readable rejection code.
    pub code: RejectCode,
    /// Human-readable detail for operator displays.
    pub message: String,
}

impl CommandRejection {
    /// Build a rejection from a code and message.
    pub fn new(code: RejectCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Errors that can occur in service layer operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Storage backend is unavailable.
    #[error("storage unavailable")]
    Unavailable(#[source] StorageError),
    /// Application is running in degraded mode without storage.
    #[error("storage unavailable (degraded mode)")]
    Degraded,
    /// A command was refused with a typed rejection code.
    #[error(transparent)]
    Rejected(#[from] CommandRejection),
    /// Invalid input provided by the client.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Operation cannot be performed in the current state.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// Requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Operation exceeded its timeout limit.
    #[error("operation timed out")]
    Timeout,
}

impl ServiceError {
    /// Shorthand for a typed rejection.
    pub fn rejected(code: RejectCode, message: impl Into<String>) -> Self {
        ServiceError::Rejected(CommandRejection::new(code, message))
    }
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        ServiceError::Unavailable(err)
    }
}

impl From<ServiceError> for CommandRejection {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Rejected(rejection) => rejection,
            ServiceError::Timeout => {
                CommandRejection::new(RejectCode::CommandTimeout, "command timed out")
            }
            ServiceError::NotFound(message) => CommandRejection::new(RejectCode::NotFound, message),
            ServiceError::InvalidState(message) => {
                CommandRejection::new(RejectCode::InvalidPhase, message)
            }
            ServiceError::InvalidInput(message) => {
                CommandRejection::new(RejectCode::InvalidPhase, message)
            }
            ServiceError::Unavailable(source) => {
                CommandRejection::new(RejectCode::ServiceUnavailable, source.to_string())
            }
            ServiceError::Degraded => CommandRejection::new(
                RejectCode::ServiceUnavailable,
                "backend is running without durable storage",
            ),
        }
    }
}

impl From<ValidationErrors> for AppError {
    fn from(err: ValidationErrors) -> Self {
        AppError::BadRequest(format!("validation failed: {}", err))
    }
}

/// Application-level errors that are converted to HTTP responses.
#[derive(Debug, Error)]
pub enum AppError {
    /// Bad request with invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),
    /// Unauthorized access attempt.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Requested resource not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Conflict with current state.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Service unavailable or degraded.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Unavailable(source) => AppError::ServiceUnavailable(source.to_string()),
            ServiceError::Degraded => AppError::ServiceUnavailable("degraded mode".into()),
            ServiceError::Rejected(rejection) => match rejection.code {
                RejectCode::AuthRejected | RejectCode::NoAuthority => {
                    AppError::Unauthorized(rejection.message)
                }
                RejectCode::NotFound => AppError::NotFound(rejection.message),
                RejectCode::ServiceUnavailable | RejectCode::CommandTimeout => {
                    AppError::ServiceUnavailable(rejection.message)
                }
                _ => AppError::Conflict(rejection.message),
            },
            ServiceError::InvalidInput(message) => AppError::BadRequest(message),
            ServiceError::InvalidState(message) => AppError::Conflict(message),
            ServiceError::NotFound(message) => AppError::NotFound(message),
            ServiceError::Timeout => AppError::ServiceUnavailable("operation timed out".into()),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let payload = Json(ErrorBody {
            message: self.to_string(),
        });

        (status, payload).into_response()
    }
}

impl From<PlanError> for ServiceError {
    fn from(err: PlanError) -> Self {
        match err {
            PlanError::AlreadyPending => {
                ServiceError::InvalidState("state transition already pending".into())
            }
            PlanError::InvalidTransition(invalid) => {
                ServiceError::InvalidState(invalid.to_string())
            }
        }
    }
}

impl From<ApplyError> for ServiceError {
    fn from(err: ApplyError) -> Self {
        match err {
            ApplyError::NoPending => ServiceError::InvalidState("no transition is pending".into()),
            ApplyError::IdMismatch { .. } => {
                ServiceError::InvalidState("pending transition does not match".into())
            }
            ApplyError::PhaseMismatch { expected, actual } => ServiceError::InvalidState(format!(
                "state changed during transition (expected {expected:?}, got {actual:?})"
            )),
            ApplyError::VersionMismatch { expected, actual } => {
                ServiceError::InvalidState(format!(
                    "state version mismatch during transition (expected {expected}, got {actual})"
                ))
            }
        }
    }
}
