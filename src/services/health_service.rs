use tracing::warn;

use crate::{dto::health::HealthResponse, state::SharedState};

/// Respond with the backend health, probing the snapshot store on the way.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    match state.require_snapshot_store().await {
        Ok(store) => {
            if let Err(err) = store.health_check().await {
                warn!(error = %err, "snapshot store health check failed");
            }
        }
        Err(_) => warn!("snapshot store unavailable (degraded mode)"),
    }

    let tracked = state.hubs().len();
    if state.is_degraded().await {
        HealthResponse::degraded(tracked)
    } else {
        HealthResponse::ok(tracked)
    }
}
