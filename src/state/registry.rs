use std::time::SystemTime;

use axum::extract::ws::Message;
use dashmap::DashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::dto::ws::ClientRole;

#[derive(Clone)]
/// Handle used to push messages to one connected client.
pub struct ClientConnection {
    /// Connection identifier, unique per socket.
    pub id: Uuid,
    /// Authenticated identity of the person or device.
    pub identity: String,
    /// Role currently in effect (may change after director demotion).
    pub role: ClientRole,
    /// Writer channel of the dedicated socket writer task.
    pub tx: mpsc::UnboundedSender<Message>,
    /// When the connection authenticated.
    pub connected_at: SystemTime,
}

/// One judge's panel entry. Survives socket loss: a disconnected judge keeps
/// their readiness flag until they change it themselves, so a network blip
/// does not silently stall the show.
#[derive(Debug, Clone)]
pub struct JudgeConnection {
    /// Authenticated identity of the judge.
    pub judge_id: String,
    /// Display name shown on the director console.
    pub display_name: String,
    /// Readiness flag, set only by the judge.
    pub ready: bool,
    /// Whether a live socket is currently associated with the judge.
    pub connected: bool,
}

/// Live connections of one competition session, tagged with role and
/// identity, plus the judge panel derived from them.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: DashMap<Uuid, ClientConnection>,
    judges: DashMap<String, JudgeConnection>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an authenticated connection. When a director joins while
    /// another director connection is live, the earlier one is demoted to
    /// viewer; the demoted connections are returned so they can be notified.
    pub fn register(&self, connection: ClientConnection) -> Vec<ClientConnection> {
        let mut demoted = Vec::new();

        if connection.role == ClientRole::Director {
            for mut entry in self.connections.iter_mut() {
                if entry.role == ClientRole::Director {
                    entry.role = ClientRole::Viewer;
                    demoted.push(entry.clone());
                }
            }
        }

        if connection.role == ClientRole::Judge {
            self.judges
                .entry(connection.identity.clone())
                .and_modify(|judge| judge.connected = true)
                .or_insert_with(|| JudgeConnection {
                    judge_id: connection.identity.clone(),
                    display_name: connection.identity.clone(),
                    ready: false,
                    connected: true,
                });
        }

        self.connections.insert(connection.id, connection);
        demoted
    }

    /// Record a judge's display name once known (from the authenticate payload).
    pub fn set_judge_display_name(&self, judge_id: &str, display_name: String) {
        if let Some(mut judge) = self.judges.get_mut(judge_id) {
            judge.display_name = display_name;
        }
    }

    /// Remove a connection on socket close. A judge's panel entry is kept,
    /// marked disconnected, with readiness untouched.
    pub fn remove(&self, connection_id: Uuid) -> Option<ClientConnection> {
        let (_, connection) = self.connections.remove(&connection_id)?;

        if connection.role == ClientRole::Judge {
            let other_sockets = self
                .connections
                .iter()
                .any(|entry| entry.role == ClientRole::Judge && entry.identity == connection.identity);
            if !other_sockets
                && let Some(mut judge) = self.judges.get_mut(&connection.identity)
            {
                judge.connected = false;
            }
        }

        Some(connection)
    }

    /// Look up a connection by id.
    pub fn get(&self, connection_id: Uuid) -> Option<ClientConnection> {
        self.connections
            .get(&connection_id)
            .map(|entry| entry.clone())
    }

    /// Whether any live connection currently holds director authority.
    pub fn has_director(&self) -> bool {
        self.connections
            .iter()
            .any(|entry| entry.role == ClientRole::Director)
    }

    /// Idempotently update a judge's readiness. Returns the updated entry, or
    /// `None` when the judge is unknown to this session.
    pub fn set_judge_ready(&self, judge_id: &str, ready: bool) -> Option<JudgeConnection> {
        let mut judge = self.judges.get_mut(judge_id)?;
        judge.ready = ready;
        Some(judge.clone())
    }

    /// Look up a judge panel entry.
    pub fn judge(&self, judge_id: &str) -> Option<JudgeConnection> {
        self.judges.get(judge_id).map(|entry| entry.clone())
    }

    /// Whether every connected judge has signalled readiness. Vacuously true
    /// with no connected judges (solo and single-judge events).
    pub fn all_connected_judges_ready(&self) -> bool {
        self.judges
            .iter()
            .filter(|judge| judge.connected)
            .all(|judge| judge.ready)
    }

    /// Snapshot of the judge panel in insertion order.
    pub fn judges_snapshot(&self) -> Vec<JudgeConnection> {
        self.judges.iter().map(|entry| entry.clone()).collect()
    }

    /// Iterate over clones of every live connection.
    pub fn connections_snapshot(&self) -> Vec<ClientConnection> {
        self.connections.iter().map(|entry| entry.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection(identity: &str, role: ClientRole) -> ClientConnection {
        let (tx, _rx) = mpsc::unbounded_channel();
        ClientConnection {
            id: Uuid::new_v4(),
            identity: identity.into(),
            role,
            tx,
            connected_at: SystemTime::now(),
        }
    }

    #[test]
    fn last_director_wins_and_prior_is_demoted() {
        let registry = ConnectionRegistry::new();
        let first = connection("cd-1", ClientRole::Director);
        let first_id = first.id;
        assert!(registry.register(first).is_empty());

        let second = connection("cd-2", ClientRole::Director);
        let demoted = registry.register(second);
        assert_eq!(demoted.len(), 1);
        assert_eq!(demoted[0].id, first_id);
        assert_eq!(registry.get(first_id).unwrap().role, ClientRole::Viewer);
        assert!(registry.has_director());
    }

    #[test]
    fn judge_disconnect_keeps_readiness() {
        let registry = ConnectionRegistry::new();
        let judge = connection("judge-1", ClientRole::Judge);
        let judge_conn_id = judge.id;
        registry.register(judge);
        registry.set_judge_ready("judge-1", true);

        registry.remove(judge_conn_id);

        let entry = registry.judge("judge-1").unwrap();
        assert!(!entry.connected);
        assert!(entry.ready);
    }

    #[test]
    fn reconnecting_judge_is_marked_connected_again() {
        let registry = ConnectionRegistry::new();
        let judge = connection("judge-1", ClientRole::Judge);
        let first_socket = judge.id;
        registry.register(judge);
        registry.set_judge_ready("judge-1", true);
        registry.remove(first_socket);

        registry.register(connection("judge-1", ClientRole::Judge));
        let entry = registry.judge("judge-1").unwrap();
        assert!(entry.connected);
        assert!(entry.ready);
    }

    #[test]
    fn readiness_gate_ignores_disconnected_judges() {
        let registry = ConnectionRegistry::new();
        let present = connection("judge-1", ClientRole::Judge);
        registry.register(present);
        registry.set_judge_ready("judge-1", true);

        let absent = connection("judge-2", ClientRole::Judge);
        let absent_id = absent.id;
        registry.register(absent);
        registry.remove(absent_id);

        // judge-2 never signalled ready but is disconnected, so the gate passes.
        assert!(registry.all_connected_judges_ready());
    }

    #[test]
    fn unknown_judge_ready_update_is_none() {
        let registry = ConnectionRegistry::new();
        assert!(registry.set_judge_ready("ghost", true).is_none());
    }
}
