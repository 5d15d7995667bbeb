use crate::entity::Participant;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub session_id: String,
    pub sender: Participant,
    pub content: String,
    pub kind: MessageKind,
    pub timestamp: DateTime<Utc>,
    /// Structured extras; bot replies carry their classification category
    /// or contextual topic under `"category"` / `"topic"`.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    Image,
    File,
    System,
}

impl Default for MessageKind {
    fn default() -> Self {
        MessageKind::Text
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Waiting,
    Active,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Medium
    }
}

impl Priority {
    /// Numeric weight used for queue ordering.
    pub fn weight(self) -> u8 {
        match self {
            Priority::High => 3,
            Priority::Medium => 2,
            Priority::Low => 1,
        }
    }
}

/// One end-to-end support conversation between a requester and either the
/// bot or a human agent.
///
/// Exactly one of the following holds until closure: no agent and
/// `Waiting`, or an agent assigned and `Active`. `Closed` is terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: String,
    pub requester: Participant,
    pub contact: Option<String>,
    pub assigned_agent: Option<Participant>,
    pub status: SessionStatus,
    pub subject: Option<String>,
    pub department: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub messages: Vec<ChatMessage>,
    pub rating: Option<u8>,
}

impl ChatSession {
    pub fn is_waiting(&self) -> bool {
        self.status == SessionStatus::Waiting
    }

    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    /// Whether the given participant id is a party to this session.
    pub fn involves(&self, participant_id: &str) -> bool {
        self.requester.id == participant_id
            || self
                .assigned_agent
                .as_ref()
                .is_some_and(|a| a.id == participant_id)
    }
}
