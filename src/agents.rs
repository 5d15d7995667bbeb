use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Online,
    Away,
    Busy,
    Offline,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatAgent {
    pub id: String,
    pub name: String,
    pub status: AgentStatus,
    pub departments: Vec<String>,
    pub max_concurrent_chats: u32,
    pub current_chats: u32,
}

impl ChatAgent {
    pub fn has_spare_capacity(&self) -> bool {
        self.current_chats < self.max_concurrent_chats
    }

    fn serves(&self, department: Option<&str>) -> bool {
        match department {
            Some(dept) => self.departments.iter().any(|d| d == dept),
            None => true,
        }
    }
}

/// Tracks agent identity, availability and concurrent-chat load.
///
/// `busy` is derived from load: raised when an increment hits the limit,
/// lowered back to `online` on decrement. Manual `away`/`offline` are never
/// overridden by load changes.
pub struct AgentRegistry {
    agents: RwLock<HashMap<String, ChatAgent>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
        }
    }

    /// Upsert an agent. New agents come up `online` with no load;
    /// re-registration refreshes identity and limits, preserves load, and
    /// brings an `offline` agent back.
    pub fn register(
        &self,
        id: impl Into<String>,
        name: impl Into<String>,
        departments: Vec<String>,
        max_concurrent_chats: u32,
    ) -> ChatAgent {
        let id = id.into();
        let mut agents = self.agents.write().unwrap();
        let agent = agents.entry(id.clone()).or_insert_with(|| ChatAgent {
            id: id.clone(),
            name: String::new(),
            status: AgentStatus::Online,
            departments: Vec::new(),
            max_concurrent_chats,
            current_chats: 0,
        });
        agent.name = name.into();
        agent.departments = departments;
        agent.max_concurrent_chats = max_concurrent_chats;
        // Registering is an act of presence: it brings an offline agent
        // back, but never cancels a manual away.
        if agent.status == AgentStatus::Offline {
            agent.status = AgentStatus::Online;
        }
        // A lowered limit can leave the agent at or over capacity.
        if agent.status == AgentStatus::Online && !agent.has_spare_capacity() {
            agent.status = AgentStatus::Busy;
        }
        info!(agent_id = %agent.id, max = agent.max_concurrent_chats, "agent registered");
        agent.clone()
    }

    pub fn set_status(&self, agent_id: &str, status: AgentStatus) -> Result<()> {
        let mut agents = self.agents.write().unwrap();
        let agent = agents
            .get_mut(agent_id)
            .ok_or_else(|| EngineError::not_found(format!("agent {agent_id}")))?;
        // The derived invariant wins: a full agent cannot present as online.
        agent.status = if status == AgentStatus::Online && !agent.has_spare_capacity() {
            AgentStatus::Busy
        } else {
            status
        };
        Ok(())
    }

    /// Take one slot of the agent's capacity.
    ///
    /// Callers filter candidates first, so `CapacityExceeded` here means a
    /// race or a bug upstream; the check and the increment share one lock
    /// acquisition so concurrent assignment passes cannot double-book.
    pub fn increment_load(&self, agent_id: &str) -> Result<()> {
        let mut agents = self.agents.write().unwrap();
        let agent = agents
            .get_mut(agent_id)
            .ok_or_else(|| EngineError::not_found(format!("agent {agent_id}")))?;
        if !agent.has_spare_capacity() {
            return Err(EngineError::CapacityExceeded(agent_id.to_string()));
        }
        agent.current_chats += 1;
        if !agent.has_spare_capacity() && agent.status == AgentStatus::Online {
            agent.status = AgentStatus::Busy;
        }
        Ok(())
    }

    /// Release one slot; saturates at zero.
    pub fn decrement_load(&self, agent_id: &str) -> Result<()> {
        let mut agents = self.agents.write().unwrap();
        let agent = agents
            .get_mut(agent_id)
            .ok_or_else(|| EngineError::not_found(format!("agent {agent_id}")))?;
        agent.current_chats = agent.current_chats.saturating_sub(1);
        if agent.has_spare_capacity() && agent.status == AgentStatus::Busy {
            agent.status = AgentStatus::Online;
        }
        Ok(())
    }

    /// Agents eligible for assignment: online, spare capacity, serving the
    /// requested department when there is one.
    pub fn list_available(&self, department: Option<&str>) -> Vec<ChatAgent> {
        let agents = self.agents.read().unwrap();
        agents
            .values()
            .filter(|a| {
                a.status == AgentStatus::Online && a.has_spare_capacity() && a.serves(department)
            })
            .cloned()
            .collect()
    }

    /// Agents that can still absorb chats, regardless of presenting as
    /// online or busy. Feeds the wait estimate.
    pub fn assignable_count(&self) -> usize {
        let agents = self.agents.read().unwrap();
        agents
            .values()
            .filter(|a| {
                matches!(a.status, AgentStatus::Online | AgentStatus::Busy)
                    && a.has_spare_capacity()
            })
            .count()
    }

    pub fn online_count(&self) -> usize {
        self.count_status(AgentStatus::Online)
    }

    pub fn busy_count(&self) -> usize {
        self.count_status(AgentStatus::Busy)
    }

    fn count_status(&self, status: AgentStatus) -> usize {
        let agents = self.agents.read().unwrap();
        agents.values().filter(|a| a.status == status).count()
    }

    pub fn get(&self, agent_id: &str) -> Option<ChatAgent> {
        let agents = self.agents.read().unwrap();
        agents.get(agent_id).cloned()
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}
