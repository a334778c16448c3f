/// Director command execution and judge break requests.
pub mod command_service;
/// OpenAPI documentation generation.
pub mod documentation;
/// Health check service.
pub mod health_service;
/// Judge readiness and score collection/validation.
pub mod scoring_service;
/// Session bootstrap, reconciliation, and routine ingest.
pub mod session_service;
/// Snapshot persistence coordinator and degraded-mode supervision.
pub mod snapshot_supervisor;
/// Server-Sent Events broadcasting for viewers.
pub mod sse_service;
/// WebSocket connection and message handling service.
pub mod websocket_service;
