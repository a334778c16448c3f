use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for the CompSync live backend.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::session::session_snapshot,
        crate::routes::session::ingest_routines,
        crate::routes::sse::viewer_stream,
        crate::routes::websocket::ws_handler,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::phase::VisiblePhase,
            crate::dto::routines::RoutineListInput,
            crate::dto::routines::RoutineInput,
            crate::dto::session::SessionSnapshot,
            crate::dto::session::RoutineSnapshot,
            crate::dto::session::RoutineStatusDto,
            crate::dto::session::JudgeStatusEntry,
            crate::dto::ws::ClientMessage,
            crate::dto::ws::ServerMessage,
            crate::dto::ws::DirectorCommand,
            crate::dto::ws::ClientRole,
            crate::error::RejectCode,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "session", description = "Competition session state and routine ingest"),
        (name = "sse", description = "Read-only viewer event streams"),
        (name = "live", description = "WebSocket operations for director and judge clients"),
    )
)]
pub struct ApiDoc;
