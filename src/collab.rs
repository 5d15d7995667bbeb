//! External collaborator seams.
//!
//! Durable storage, analytics and identity live outside this engine. The
//! in-memory transition is always the source of truth: everything here is
//! fire-and-forget, and a collaborator failure is logged and swallowed.

use crate::agents::ChatAgent;
use crate::bus::{EngineEvent, EventBus};
use crate::chat::{ChatMessage, ChatSession};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize)]
pub struct UserProfile {
    pub name: String,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AnalyticsSummary {
    pub sessions: usize,
    pub messages: usize,
    pub average_wait_secs: u64,
    pub average_rating: Option<f32>,
}

/// Append/read/update durable records. Implemented elsewhere; the engine
/// only ever mirrors its in-memory transitions into it.
#[async_trait]
pub trait DurableStore: Send + Sync {
    async fn append_message(&self, message: &ChatMessage) -> anyhow::Result<()>;
    async fn upsert_session(&self, session: &ChatSession) -> anyhow::Result<()>;
    async fn upsert_agent(&self, agent: &ChatAgent) -> anyhow::Result<()>;
    async fn query_analytics(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> anyhow::Result<AnalyticsSummary>;
}

/// Resolves a user id into profile data.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn get_user(&self, id: &str) -> anyhow::Result<Option<UserProfile>>;
}

/// Default collaborator: accepts everything, stores nothing. Lets the
/// daemon run standalone.
pub struct NullCollaborator;

#[async_trait]
impl DurableStore for NullCollaborator {
    async fn append_message(&self, message: &ChatMessage) -> anyhow::Result<()> {
        debug!(message_id = %message.id, "durable store disabled, dropping message");
        Ok(())
    }

    async fn upsert_session(&self, _session: &ChatSession) -> anyhow::Result<()> {
        Ok(())
    }

    async fn upsert_agent(&self, _agent: &ChatAgent) -> anyhow::Result<()> {
        Ok(())
    }

    async fn query_analytics(
        &self,
        _from: DateTime<Utc>,
        _to: DateTime<Utc>,
    ) -> anyhow::Result<AnalyticsSummary> {
        Ok(AnalyticsSummary::default())
    }
}

#[async_trait]
impl IdentityResolver for NullCollaborator {
    async fn get_user(&self, _id: &str) -> anyhow::Result<Option<UserProfile>> {
        Ok(None)
    }
}

/// Mirror lifecycle events into the durable store, off the command path.
///
/// Runs until the bus is dropped. Lagged receivers skip ahead: persistence
/// is best effort by design.
pub fn spawn_persistence_bridge(bus: &EventBus, store: Arc<dyn DurableStore>) {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            let event = match rx.recv().await {
                Ok(event) => event,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "persistence bridge lagged behind the bus");
                    continue;
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            };

            let result = match &event {
                EngineEvent::SessionStarted { session }
                | EngineEvent::AgentAssigned { session }
                | EngineEvent::SessionClosed { session } => store.upsert_session(session).await,
                EngineEvent::MessageSent { message } => store.append_message(message).await,
                EngineEvent::SessionQueued { .. } | EngineEvent::QueueUpdate { .. } => Ok(()),
            };
            if let Err(err) = result {
                warn!(%err, "durable store write failed, continuing");
            }
        }
    });
}
