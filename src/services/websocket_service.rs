use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    dto::ws::{ClientMessage, ClientRole, ServerMessage},
    error::{CommandRejection, RejectCode},
    services::{command_service, scoring_service, session_service},
    state::{
        SessionHub, SharedState,
        registry::ClientConnection,
    },
};

/// How long a fresh socket gets to send its `authenticate` message.
const AUTH_TIMEOUT: Duration = Duration::from_secs(10);

/// Handle the full lifecycle of one director/judge/viewer WebSocket connection.
pub async fn handle_socket(state: SharedState, socket: WebSocket) {
    let (mut sender, mut receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

    // Dedicated writer task keeps outbound messages flowing even while we await inbound frames.
    let writer_task = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if sender.send(message).await.is_err() {
                break;
            }
        }
    });

    let initial_message = match tokio::time::timeout(AUTH_TIMEOUT, receiver.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => text,
        Ok(Some(Ok(Message::Close(_)))) => {
            finalize(writer_task, outbound_tx).await;
            return;
        }
        Ok(Some(Ok(_))) => {
            let _ = outbound_tx.send(Message::Close(None));
            finalize(writer_task, outbound_tx).await;
            return;
        }
        Ok(Some(Err(err))) => {
            warn!(error = %err, "websocket receive error");
            finalize(writer_task, outbound_tx).await;
            return;
        }
        Ok(None) | Err(_) => {
            warn!("websocket authentication timed out");
            finalize(writer_task, outbound_tx).await;
            return;
        }
    };

    let inbound = match ClientMessage::from_json_str(&initial_message) {
        Ok(message) => message,
        Err(err) => {
            warn!(error = %err, "failed to parse first websocket message");
            reject_and_close(&outbound_tx, "first message must be a valid `authenticate`");
            finalize(writer_task, outbound_tx).await;
            return;
        }
    };

    let ClientMessage::Authenticate {
        competition_id,
        identity,
        role,
        token,
        display_name,
    } = inbound
    else {
        warn!("first websocket message was not authenticate");
        reject_and_close(&outbound_tx, "first message must be `authenticate`");
        finalize(writer_task, outbound_tx).await;
        return;
    };

    // Identity issuance lives in the management platform; here we only demand
    // a complete, token-bearing claim for a known competition/role pair.
    if competition_id.trim().is_empty() || identity.trim().is_empty() || token.trim().is_empty() {
        warn!(%competition_id, %identity, "incomplete authentication claim");
        reject_and_close(&outbound_tx, "competitionId, identity, and token are required");
        finalize(writer_task, outbound_tx).await;
        return;
    }

    let hub = match session_service::open_session(&state, &competition_id).await {
        Ok(hub) => hub,
        Err(err) => {
            warn!(%competition_id, error = %err, "failed to open session for connection");
            reject_and_close(&outbound_tx, "competition session unavailable");
            finalize(writer_task, outbound_tx).await;
            return;
        }
    };

    let connection = ClientConnection {
        id: Uuid::new_v4(),
        identity: identity.clone(),
        role,
        tx: outbound_tx.clone(),
        connected_at: SystemTime::now(),
    };
    let connection_id = connection.id;

    let demoted = hub.registry().register(connection);
    for prior in &demoted {
        info!(
            competition_id = hub.competition_id(),
            identity = %prior.identity,
            "director superseded; demoting prior console to viewer"
        );
        hub.send_to_connection(
            prior.id,
            &ServerMessage::RoleChanged {
                role: ClientRole::Viewer,
            },
        );
    }

    if role == ClientRole::Judge {
        if let Some(name) = display_name {
            hub.registry().set_judge_display_name(&identity, name);
        }
        if let Some(judge) = hub.registry().judge(&identity) {
            hub.send_to_directors(&ServerMessage::JudgeStatus {
                judge_id: judge.judge_id,
                display_name: judge.display_name,
                ready: judge.ready,
                connected: judge.connected,
            });
        }
    }

    info!(
        competition_id = hub.competition_id(),
        %identity,
        role = role.as_str(),
        "client authenticated"
    );

    hub.broadcast_all(&ServerMessage::PresenceJoined {
        identity: identity.clone(),
        role,
    });

    hub.send_to_connection(
        connection_id,
        &ServerMessage::Authenticated {
            competition_id: hub.competition_id().to_string(),
            role,
            snapshot: hub.snapshot().await,
        },
    );

    if role == ClientRole::Director {
        let pending_day = hub
            .read_session(|session| {
                session
                    .needs_day_confirmation
                    .then(|| crate::dto::format_day(session.day))
            })
            .await;
        if let Some(competition_day) = pending_day {
            hub.send_to_connection(
                connection_id,
                &ServerMessage::DayConfirmationRequired { competition_day },
            );
        }
    }

    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => match ClientMessage::from_json_str(&text) {
                Ok(inbound) => {
                    dispatch(&state, &hub, connection_id, inbound).await;
                }
                Err(err) => {
                    warn!(%identity, error = %err, "unparseable client message");
                    send_rejection(
                        &hub,
                        connection_id,
                        CommandRejection::new(RejectCode::InvalidPhase, "unparseable message"),
                    );
                }
            },
            Ok(Message::Ping(payload)) => {
                let _ = outbound_tx.send(Message::Pong(payload));
            }
            Ok(Message::Close(frame)) => {
                info!(%identity, "client closed connection");
                let _ = outbound_tx.send(Message::Close(frame));
                break;
            }
            Ok(Message::Binary(_)) => {}
            Ok(Message::Pong(_)) => {}
            Err(err) => {
                warn!(%identity, error = %err, "websocket error");
                break;
            }
        }
    }

    disconnect(&hub, connection_id).await;
    finalize(writer_task, outbound_tx).await;
}

/// Route one parsed inbound message; rejections go back to the sender only.
async fn dispatch(
    state: &SharedState,
    hub: &Arc<SessionHub>,
    connection_id: Uuid,
    inbound: ClientMessage,
) {
    let outcome = match inbound {
        ClientMessage::Authenticate { .. } => {
            warn!("ignoring duplicate authenticate message");
            Ok(())
        }
        ClientMessage::DirectorCommand { command } => {
            command_service::execute(state, hub, connection_id, command).await
        }
        ClientMessage::SubmitScore {
            routine_id,
            score,
            notes,
        } => scoring_service::submit_score(state, hub, connection_id, routine_id, score, notes)
            .await,
        ClientMessage::JudgeReady { ready } => {
            scoring_service::set_ready(hub, connection_id, ready).await
        }
        ClientMessage::BreakRequest { duration_minutes } => {
            command_service::judge_break_request(hub, connection_id, duration_minutes).await
        }
        ClientMessage::SyncRequest => {
            let snapshot = hub.snapshot().await;
            hub.send_to_connection(connection_id, &ServerMessage::SyncState { snapshot });
            Ok(())
        }
        ClientMessage::Ping { client_time } => {
            hub.send_to_connection(
                connection_id,
                &ServerMessage::Pong {
                    client_time,
                    server_time: unix_ms_now(),
                },
            );
            Ok(())
        }
    };

    if let Err(err) = outcome {
        send_rejection(hub, connection_id, err.into());
    }
}

/// Tear down registry state when a socket goes away. Judge readiness is kept
/// so a network blip does not stall the show; director departure leaves the
/// session running but without authority until a director returns.
async fn disconnect(hub: &Arc<SessionHub>, connection_id: Uuid) {
    let Some(connection) = hub.registry().remove(connection_id) else {
        return;
    };

    info!(
        competition_id = hub.competition_id(),
        identity = %connection.identity,
        role = connection.role.as_str(),
        "client disconnected"
    );

    if connection.role == ClientRole::Judge
        && let Some(judge) = hub.registry().judge(&connection.identity)
        && !judge.connected
    {
        hub.send_to_directors(&ServerMessage::JudgeStatus {
            judge_id: judge.judge_id,
            display_name: judge.display_name,
            ready: judge.ready,
            connected: judge.connected,
        });
    }

    if connection.role == ClientRole::Director && !hub.registry().has_director() {
        warn!(
            competition_id = hub.competition_id(),
            "no director connected; authoritative commands will be refused until one returns"
        );
    }

    hub.broadcast_all(&ServerMessage::PresenceLeft {
        identity: connection.identity,
        role: connection.role,
    });
}

/// Serialize a rejection and push it to the offending connection only.
fn send_rejection(hub: &SessionHub, connection_id: Uuid, rejection: CommandRejection) {
    hub.send_to_connection(connection_id, &ServerMessage::rejection(rejection));
}

/// Push an AUTH_REJECTED error followed by a close frame onto a socket that
/// never made it into a registry.
fn reject_and_close(tx: &mpsc::UnboundedSender<Message>, message: &str) {
    let error = ServerMessage::Error {
        code: RejectCode::AuthRejected,
        message: message.to_string(),
    };
    if let Ok(payload) = serde_json::to_string(&error) {
        let _ = tx.send(Message::Text(payload.into()));
    }
    let _ = tx.send(Message::Close(None));
}

fn unix_ms_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or(0)
}

/// Ensure the writer task winds down before we return from the socket handler.
async fn finalize(writer_task: JoinHandle<()>, outbound_tx: mpsc::UnboundedSender<Message>) {
    drop(outbound_tx);
    let _ = writer_task.await;
}
