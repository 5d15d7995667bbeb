use crate::agents::AgentStatus;
use crate::chat::{ChatMessage, ChatSession, MessageKind, Priority};
use crate::entity::Participant;
use crate::error::{EngineError, Result};
use crate::queue::PriorityBreakdown;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Client → server commands, one JSON envelope per WebSocket text frame:
/// `{"type": "...", "payload": {...}}`.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientCommand {
    StartChat(StartChatPayload),
    SendMessage(SendMessagePayload),
    JoinChat { chat_id: String },
    CloseChat { chat_id: String, rating: Option<u8> },
    SetStatus { status: AgentStatus },
    GetQueueStats,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct StartChatPayload {
    pub subject: Option<String>,
    pub department: Option<String>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SendMessagePayload {
    pub chat_id: String,
    pub content: String,
    #[serde(default)]
    pub kind: MessageKind,
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Value,
}

impl ClientCommand {
    /// Parse one inbound frame. Unknown types are `UnrecognizedCommand`;
    /// known types with malformed payloads are `BadEnvelope`.
    pub fn parse(raw: &str) -> Result<Self> {
        let envelope: Envelope = serde_json::from_str(raw).map_err(|e| EngineError::BadEnvelope {
            command: "envelope".into(),
            reason: e.to_string(),
        })?;

        fn payload<T: serde::de::DeserializeOwned>(kind: &str, value: Value) -> Result<T> {
            serde_json::from_value(value).map_err(|e| EngineError::BadEnvelope {
                command: kind.to_string(),
                reason: e.to_string(),
            })
        }

        match envelope.kind.as_str() {
            "start_chat" => Ok(Self::StartChat(payload("start_chat", envelope.payload)?)),
            "send_message" => Ok(Self::SendMessage(payload("send_message", envelope.payload)?)),
            "join_chat" => {
                #[derive(Deserialize)]
                struct P {
                    chat_id: String,
                }
                let p: P = payload("join_chat", envelope.payload)?;
                Ok(Self::JoinChat { chat_id: p.chat_id })
            }
            "close_chat" => {
                #[derive(Deserialize)]
                struct P {
                    chat_id: String,
                    rating: Option<u8>,
                }
                let p: P = payload("close_chat", envelope.payload)?;
                Ok(Self::CloseChat {
                    chat_id: p.chat_id,
                    rating: p.rating,
                })
            }
            "set_status" => {
                #[derive(Deserialize)]
                struct P {
                    status: AgentStatus,
                }
                let p: P = payload("set_status", envelope.payload)?;
                Ok(Self::SetStatus { status: p.status })
            }
            "get_queue_stats" => Ok(Self::GetQueueStats),
            other => Err(EngineError::UnrecognizedCommand(other.to_string())),
        }
    }
}

/// Server → client events, serialized with the same envelope shape.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerEvent {
    Connected {
        participant: Participant,
    },
    ChatStarted {
        session: ChatSession,
    },
    NewMessage {
        message: ChatMessage,
    },
    AgentAssigned {
        chat_id: String,
        agent_id: String,
        agent_name: String,
    },
    QueueUpdate {
        chat_id: String,
        position: usize,
        estimated_wait_secs: u64,
    },
    AddedToQueue {
        chat_id: String,
        position: usize,
        estimated_wait_secs: u64,
    },
    ChatJoined {
        session: ChatSession,
    },
    ChatClosed {
        chat_id: String,
    },
    QueueStats {
        stats: QueueStatsReport,
    },
    Error {
        message: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueStatsReport {
    pub queued: usize,
    pub estimated_wait_secs: u64,
    pub agents_online: usize,
    pub agents_busy: usize,
    pub by_priority: PriorityBreakdown,
}
