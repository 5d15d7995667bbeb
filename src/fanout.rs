use crate::chat::ChatSession;
use crate::entity::Participant;
use crate::protocol::ServerEvent;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use tokio::sync::mpsc;
use tracing::debug;

pub type ConnectionId = u64;

struct Connection {
    participant: Participant,
    tx: mpsc::UnboundedSender<ServerEvent>,
}

/// Maps live transport connections to participants and delivers events.
///
/// The fan-out only ever sees an event sender per connection, never the
/// socket itself, so the queue/assignment core stays wire-agnostic. Session
/// events are filtered: only connections belonging to the session's
/// requester or its assigned agent receive them.
pub struct ConnectionFanout {
    connections: RwLock<HashMap<ConnectionId, Connection>>,
    next_id: AtomicU64,
}

impl ConnectionFanout {
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn register(
        &self,
        participant: Participant,
        tx: mpsc::UnboundedSender<ServerEvent>,
    ) -> ConnectionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(connection_id = id, participant = %participant, "connection registered");
        let mut connections = self.connections.write().unwrap();
        connections.insert(id, Connection { participant, tx });
        id
    }

    pub fn unregister(&self, connection_id: ConnectionId) {
        let mut connections = self.connections.write().unwrap();
        connections.remove(&connection_id);
    }

    pub fn participant(&self, connection_id: ConnectionId) -> Option<Participant> {
        let connections = self.connections.read().unwrap();
        connections.get(&connection_id).map(|c| c.participant.clone())
    }

    /// Deliver to one connection. A send to a vanished connection is
    /// dropped silently; the sweep will reap it.
    pub fn send_to(&self, connection_id: ConnectionId, event: ServerEvent) {
        let connections = self.connections.read().unwrap();
        if let Some(conn) = connections.get(&connection_id) {
            let _ = conn.tx.send(event);
        }
    }

    /// Deliver to every open connection of one participant.
    pub fn send_to_participant(&self, participant_id: &str, event: &ServerEvent) {
        let connections = self.connections.read().unwrap();
        for conn in connections.values() {
            if conn.participant.id == participant_id {
                let _ = conn.tx.send(event.clone());
            }
        }
    }

    /// Deliver a session event to all parties of that session.
    pub fn broadcast(&self, session: &ChatSession, event: &ServerEvent) {
        let connections = self.connections.read().unwrap();
        for conn in connections.values() {
            if session.involves(&conn.participant.id) {
                let _ = conn.tx.send(event.clone());
            }
        }
    }

    /// Drop connections whose receiving side is gone. Handles transports
    /// that never managed a clean unregister.
    pub fn sweep(&self) -> usize {
        let mut connections = self.connections.write().unwrap();
        let before = connections.len();
        connections.retain(|_, conn| !conn.tx.is_closed());
        let reaped = before - connections.len();
        if reaped > 0 {
            debug!(reaped, "dead connections swept");
        }
        reaped
    }

    pub fn len(&self) -> usize {
        self.connections.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Open connections for the participant, used to decide whether a
    /// disconnecting agent should go offline.
    pub fn has_connection_for(&self, participant_id: &str) -> bool {
        let connections = self.connections.read().unwrap();
        connections
            .values()
            .any(|c| c.participant.id == participant_id)
    }
}

impl Default for ConnectionFanout {
    fn default() -> Self {
        Self::new()
    }
}
