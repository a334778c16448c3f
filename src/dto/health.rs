use serde::Serialize;
use utoipa::ToSchema;

/// Simple health response returned by the `/healthcheck` route.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Health status ("ok" or "degraded").
    pub status: String,
    /// Number of competition sessions currently held in memory.
    pub tracked_competitions: usize,
}

impl HealthResponse {
    /// Create a health response indicating the system is operational.
    pub fn ok(tracked_competitions: usize) -> Self {
        Self {
            status: "ok".to_string(),
            tracked_competitions,
        }
    }

    /// Create a health response indicating snapshots are not being persisted.
    pub fn degraded(tracked_competitions: usize) -> Self {
        Self {
            status: "degraded".to_string(),
            tracked_competitions,
        }
    }
}
