use crate::agents::{AgentRegistry, ChatAgent};
use crate::chat::{ChatSession, Priority};
use crate::config::EngineConfig;
use crate::entity::Participant;
use crate::store::SessionStore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::RwLock;
use tracing::{debug, warn};

/// A session waiting for a human agent.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub session_id: String,
    pub enqueued_at: DateTime<Utc>,
    /// Wait accumulated across failed assignment passes, in seconds.
    pub waited_secs: u64,
    pub weight: u8,
}

/// What a single assignment pass did for one entry.
#[derive(Debug)]
pub enum QueueOutcome {
    Assigned {
        session: ChatSession,
        agent: ChatAgent,
    },
    StillWaiting {
        session_id: String,
        position: usize,
        estimated_wait_secs: u64,
    },
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct PriorityBreakdown {
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

/// Holds every escalated `waiting` session and pairs them with agents.
///
/// Ordering (priority weight descending, then accumulated wait descending)
/// is recomputed on every pass rather than maintained incrementally, so the
/// tie-break stays correct as waits grow.
pub struct QueueManager {
    entries: RwLock<Vec<QueueEntry>>,
}

impl QueueManager {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }

    /// Add a session to the queue. No-op when already queued.
    pub fn enqueue(&self, session: &ChatSession) -> bool {
        let mut entries = self.entries.write().unwrap();
        if entries.iter().any(|e| e.session_id == session.id) {
            return false;
        }
        debug!(session_id = %session.id, priority = ?session.priority, "session enqueued");
        entries.push(QueueEntry {
            session_id: session.id.clone(),
            enqueued_at: Utc::now(),
            waited_secs: 0,
            weight: session.priority.weight(),
        });
        true
    }

    /// Drop the entry the moment a session stops waiting.
    pub fn remove(&self, session_id: &str) -> bool {
        let mut entries = self.entries.write().unwrap();
        let before = entries.len();
        entries.retain(|e| e.session_id != session_id);
        entries.len() != before
    }

    pub fn contains(&self, session_id: &str) -> bool {
        let entries = self.entries.read().unwrap();
        entries.iter().any(|e| e.session_id == session_id)
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn breakdown(&self) -> PriorityBreakdown {
        let entries = self.entries.read().unwrap();
        let mut breakdown = PriorityBreakdown::default();
        for entry in entries.iter() {
            match entry.weight {
                w if w == Priority::High.weight() => breakdown.high += 1,
                w if w == Priority::Medium.weight() => breakdown.medium += 1,
                _ => breakdown.low += 1,
            }
        }
        breakdown
    }

    /// 1-based position of the session in the current ordering.
    pub fn position(&self, session_id: &str) -> Option<usize> {
        self.ordered_ids()
            .iter()
            .position(|id| id == session_id)
            .map(|i| i + 1)
    }

    /// Coarse wait heuristic: queue length spread over the agents that can
    /// still absorb chats, times the average chat duration. Only its
    /// monotonicity is meaningful.
    pub fn estimated_wait_secs(&self, registry: &AgentRegistry, config: &EngineConfig) -> u64 {
        estimate_wait(
            self.len(),
            registry.assignable_count(),
            config.average_chat_duration_secs,
        )
    }

    /// One assignment pass over the head of the ordered queue.
    ///
    /// For each of up to `assignment_batch` entries: verify the session is
    /// still waiting (stale entries are dropped), pick the least-loaded
    /// eligible agent, reserve a slot and transition the session. Entries
    /// that cannot be assigned accumulate the tick interval; crossing a
    /// multiple of the notify interval yields a `StillWaiting` outcome so
    /// the requester can be told their position.
    pub fn process(
        &self,
        store: &SessionStore,
        registry: &AgentRegistry,
        config: &EngineConfig,
    ) -> Vec<QueueOutcome> {
        let batch: Vec<String> = self
            .ordered_ids()
            .into_iter()
            .take(config.assignment_batch)
            .collect();
        let mut outcomes = Vec::new();

        for session_id in batch {
            let Some(session) = store.get(&session_id) else {
                self.remove(&session_id);
                continue;
            };
            if !session.is_waiting() {
                self.remove(&session_id);
                continue;
            }

            let candidate = find_available_agent(registry, session.department.as_deref());
            if let Some(agent) = candidate {
                // The capacity check and increment share the registry lock,
                // so a racing join_chat cannot take the same slot.
                if registry.increment_load(&agent.id).is_ok() {
                    match store.assign_agent(
                        &session_id,
                        Participant::agent(agent.id.clone(), agent.name.clone()),
                    ) {
                        Ok(updated) => {
                            self.remove(&session_id);
                            outcomes.push(QueueOutcome::Assigned {
                                session: updated,
                                agent,
                            });
                            continue;
                        }
                        Err(err) => {
                            // Session changed under us; give the slot back.
                            warn!(%session_id, %err, "assignment rolled back");
                            let _ = registry.decrement_load(&agent.id);
                            self.remove(&session_id);
                            continue;
                        }
                    }
                }
            }

            let waited = self.bump_wait(&session_id, config.queue_tick_secs);
            if waited > 0 && waited % config.wait_notify_interval_secs == 0 {
                outcomes.push(QueueOutcome::StillWaiting {
                    position: self.position(&session_id).unwrap_or(1),
                    estimated_wait_secs: self.estimated_wait_secs(registry, config),
                    session_id,
                });
            }
        }

        outcomes
    }

    fn bump_wait(&self, session_id: &str, delta_secs: u64) -> u64 {
        let mut entries = self.entries.write().unwrap();
        match entries.iter_mut().find(|e| e.session_id == session_id) {
            Some(entry) => {
                entry.waited_secs += delta_secs;
                entry.waited_secs
            }
            None => 0,
        }
    }

    fn ordered_ids(&self) -> Vec<String> {
        let entries = self.entries.read().unwrap();
        let mut snapshot: Vec<_> = entries
            .iter()
            .map(|e| (e.weight, e.waited_secs, e.enqueued_at, e.session_id.clone()))
            .collect();
        // Weight descending, accumulated wait descending, then oldest first
        // for a stable result.
        snapshot.sort_by(|a, b| {
            b.0.cmp(&a.0)
                .then(b.1.cmp(&a.1))
                .then(a.2.cmp(&b.2))
        });
        snapshot.into_iter().map(|(_, _, _, id)| id).collect()
    }

    #[cfg(test)]
    pub(crate) fn force_wait(&self, session_id: &str, waited_secs: u64) {
        let mut entries = self.entries.write().unwrap();
        if let Some(entry) = entries.iter_mut().find(|e| e.session_id == session_id) {
            entry.waited_secs = waited_secs;
        }
    }
}

impl Default for QueueManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Least-loaded agent among those online, under their limit, and serving
/// the session's department when it has one.
pub fn find_available_agent(
    registry: &AgentRegistry,
    department: Option<&str>,
) -> Option<ChatAgent> {
    registry
        .list_available(department)
        .into_iter()
        .min_by_key(|a| a.current_chats)
}

fn estimate_wait(queue_len: usize, assignable_agents: usize, average_chat_secs: u64) -> u64 {
    let agents = assignable_agents.max(1) as u64;
    let queued = queue_len as u64;
    queued.div_ceil(agents) * average_chat_secs
}
