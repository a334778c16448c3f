use std::convert::Infallible;

use axum::{
    Router,
    extract::{Path, State},
    response::sse::Sse,
    routing::get,
};
use futures::Stream;
use tracing::info;

use crate::{error::AppError, services::sse_service, services::session_service, state::SharedState};

#[utoipa::path(
    get,
    path = "/sse/competitions/{id}",
    tag = "sse",
    params(("id" = String, Path, description = "Competition identifier")),
    responses((status = 200, description = "Viewer SSE stream", content_type = "text/event-stream", body = String))
)]
/// Stream a competition's broadcast events to a read-only viewer.
pub async fn viewer_stream(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<axum::response::sse::Event, Infallible>>>, AppError> {
    // Viewers may arrive before the director; subscribing bootstraps the hub.
    let hub = session_service::open_session(&state, &id).await?;
    let receiver = sse_service::subscribe_viewer(&hub);
    info!(competition_id = %id, "new viewer SSE connection");
    sse_service::broadcast_viewer_info(&hub, "viewer stream connected");
    Ok(sse_service::to_sse_stream(receiver, id))
}

/// Configure the SSE endpoints.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/sse/competitions/{id}", get(viewer_stream))
}
