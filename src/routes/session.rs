use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, put},
};
use validator::Validate;

use crate::{
    dto::{routines::RoutineListInput, session::SessionSnapshot},
    error::AppError,
    services::session_service,
    state::SharedState,
};

/// Routes exposing the canonical session snapshot and the routine ingest
/// endpoint used by the management platform.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/api/competitions/{id}/session", get(session_snapshot))
        .route("/api/competitions/{id}/routines", put(ingest_routines))
}

/// Query the canonical session snapshot of a live competition.
#[utoipa::path(
    get,
    path = "/api/competitions/{id}/session",
    tag = "session",
    params(("id" = String, Path, description = "Competition identifier")),
    responses(
        (status = 200, description = "Current session snapshot", body = SessionSnapshot),
        (status = 404, description = "Competition is not live")
    )
)]
pub async fn session_snapshot(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<SessionSnapshot>, AppError> {
    let snapshot = session_service::query_snapshot(&state, &id).await?;
    Ok(Json(snapshot))
}

/// Replace the day's ordered routine list; only legal before the first advance.
#[utoipa::path(
    put,
    path = "/api/competitions/{id}/routines",
    tag = "session",
    params(("id" = String, Path, description = "Competition identifier")),
    request_body = RoutineListInput,
    responses(
        (status = 200, description = "Routine list installed", body = SessionSnapshot),
        (status = 409, description = "The session already started")
    )
)]
pub async fn ingest_routines(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(payload): Json<RoutineListInput>,
) -> Result<Json<SessionSnapshot>, AppError> {
    payload.validate()?;
    let snapshot = session_service::ingest_routines(&state, &id, payload).await?;
    Ok(Json(snapshot))
}
