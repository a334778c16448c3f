use crate::{
    dto::ws::ServerMessage,
    error::ServiceError,
    state::{SessionHub, state_machine::SessionEvent},
};

/// Execute a planned phase transition, then broadcast the resulting phase
/// change to every connection and the viewer stream.
pub async fn run_transition_with_broadcast<F, Fut, T>(
    hub: &SessionHub,
    event: SessionEvent,
    effect: F,
) -> Result<T, ServiceError>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<T, ServiceError>>,
{
    let (result, next) = hub.run_transition(event, effect).await?;
    hub.broadcast_all(&ServerMessage::PhaseChanged { phase: next.into() });
    Ok(result)
}
