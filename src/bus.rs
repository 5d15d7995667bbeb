use crate::chat::{ChatMessage, ChatSession};
use serde::Serialize;
use tokio::sync::broadcast;

/// Lifecycle events emitted by the orchestrator.
///
/// External collaborators (persistence, analytics, notifications) subscribe
/// here; nothing on the command path waits for them. Events carry the
/// snapshots a subscriber needs so it never reaches back into the stores.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum EngineEvent {
    SessionStarted {
        session: ChatSession,
    },
    MessageSent {
        message: ChatMessage,
    },
    AgentAssigned {
        session: ChatSession,
    },
    SessionQueued {
        session_id: String,
        position: usize,
        estimated_wait_secs: u64,
    },
    QueueUpdate {
        session_id: String,
        position: usize,
        estimated_wait_secs: u64,
    },
    SessionClosed {
        session: ChatSession,
    },
}

pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(256);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: EngineEvent) {
        // No receivers is fine; the engine never depends on listeners.
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
