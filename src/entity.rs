use serde::{Deserialize, Serialize};
use std::fmt;

/// A party that can appear on a chat session: the requester, a human agent,
/// the bot, or the engine itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
    pub name: String,
    pub role: Role,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Agent,
    Bot,
    System,
}

impl Participant {
    pub fn new(id: impl Into<String>, name: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            role,
        }
    }

    pub fn user(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(id, name, Role::User)
    }

    pub fn agent(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(id, name, Role::Agent)
    }

    /// The synthetic sender for scripted and contextual replies.
    pub fn bot() -> Self {
        Self::new("bot", "Assistente Virtual", Role::Bot)
    }

    /// The synthetic sender for engine-generated notices (welcome, queue
    /// position, agent joined).
    pub fn system() -> Self {
        Self::new("system", "Sistema", Role::System)
    }
}

impl fmt::Display for Participant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::User => "user",
            Role::Agent => "agent",
            Role::Bot => "bot",
            Role::System => "system",
        };
        f.write_str(s)
    }
}
