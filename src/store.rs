use crate::chat::{ChatMessage, ChatSession, MessageKind, Priority, SessionStatus};
use crate::entity::Participant;
use crate::error::{EngineError, Result};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::info;
use uuid::Uuid;

const WELCOME_TEXT: &str =
    "Olá! Bem-vindo ao suporte. Descreva sua dúvida e eu vou te ajudar ou encaminhar para um atendente.";

/// Source of truth for session state and message logs.
///
/// The state machine is `waiting → active → closed`, plus the direct
/// `waiting → closed` edge for sessions abandoned before an agent joins.
/// Closed sessions leave the map; durable copies are the persistence
/// collaborator's concern.
pub struct SessionStore {
    sessions: RwLock<HashMap<String, ChatSession>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn create_session(
        &self,
        requester: Participant,
        contact: Option<String>,
        subject: Option<String>,
        department: Option<String>,
        priority: Priority,
        tags: Vec<String>,
    ) -> ChatSession {
        let now = Utc::now();
        let mut session = ChatSession {
            id: format!("chat_{}", Uuid::new_v4().simple()),
            requester,
            contact,
            assigned_agent: None,
            status: SessionStatus::Waiting,
            subject,
            department,
            tags,
            priority,
            created_at: now,
            last_activity_at: now,
            closed_at: None,
            messages: Vec::new(),
            rating: None,
        };
        push_message(
            &mut session,
            Participant::system(),
            WELCOME_TEXT.to_string(),
            MessageKind::System,
            HashMap::new(),
        );

        info!(session_id = %session.id, priority = ?session.priority, "session created");
        let mut sessions = self.sessions.write().unwrap();
        sessions.insert(session.id.clone(), session.clone());
        session
    }

    /// Append a message, stamping it inside the session's log order.
    ///
    /// Unknown and closed sessions both report `NotFound`: a closed session
    /// is gone from the map and its log is terminal either way.
    pub fn append_message(
        &self,
        session_id: &str,
        sender: Participant,
        content: String,
        kind: MessageKind,
        metadata: HashMap<String, String>,
    ) -> Result<ChatMessage> {
        let mut sessions = self.sessions.write().unwrap();
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| EngineError::not_found(format!("session {session_id}")))?;
        Ok(push_message(session, sender, content, kind, metadata))
    }

    /// Transition `waiting → active` and record the agent.
    pub fn assign_agent(&self, session_id: &str, agent: Participant) -> Result<ChatSession> {
        let mut sessions = self.sessions.write().unwrap();
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| EngineError::not_found(format!("session {session_id}")))?;
        if session.status != SessionStatus::Waiting {
            return Err(EngineError::invalid_state(format!(
                "session {session_id} is {:?}, expected waiting",
                session.status
            )));
        }

        info!(session_id, agent_id = %agent.id, "agent assigned");
        session.assigned_agent = Some(agent);
        session.status = SessionStatus::Active;
        session.last_activity_at = Utc::now();
        Ok(session.clone())
    }

    /// Close and remove the session, returning the final snapshot.
    ///
    /// Closing an unknown or already-closed session is a no-op success.
    pub fn close(&self, session_id: &str, rating: Option<u8>) -> Option<ChatSession> {
        let mut sessions = self.sessions.write().unwrap();
        let mut session = sessions.remove(session_id)?;
        session.status = SessionStatus::Closed;
        session.closed_at = Some(Utc::now());
        if rating.is_some() {
            session.rating = rating;
        }
        info!(session_id, rating = ?session.rating, "session closed");
        Some(session)
    }

    pub fn get(&self, session_id: &str) -> Option<ChatSession> {
        let sessions = self.sessions.read().unwrap();
        sessions.get(session_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Append to the log, clamping the stamp so timestamps never decrease
/// within one session.
fn push_message(
    session: &mut ChatSession,
    sender: Participant,
    content: String,
    kind: MessageKind,
    metadata: HashMap<String, String>,
) -> ChatMessage {
    let mut timestamp = Utc::now();
    if let Some(last) = session.messages.last() {
        timestamp = timestamp.max(last.timestamp);
    }
    let message = ChatMessage {
        id: format!("msg_{}", Uuid::new_v4().simple()),
        session_id: session.id.clone(),
        sender,
        content,
        kind,
        timestamp,
        metadata,
    };
    session.messages.push(message.clone());
    session.last_activity_at = timestamp;
    message
}
