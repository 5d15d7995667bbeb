use crate::agents::{AgentRegistry, AgentStatus};
use crate::bus::{EngineEvent, EventBus};
use crate::chat::{ChatMessage, ChatSession, MessageKind};
use crate::classify::{BotDecision, Classifier};
use crate::collab::IdentityResolver;
use crate::config::EngineConfig;
use crate::entity::{Participant, Role};
use crate::error::{EngineError, Result};
use crate::fanout::{ConnectionFanout, ConnectionId};
use crate::protocol::{
    ClientCommand, QueueStatsReport, SendMessagePayload, ServerEvent, StartChatPayload,
};
use crate::queue::{QueueManager, QueueOutcome};
use crate::store::SessionStore;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

const CONNECTING_TEXT: &str =
    "Estou te conectando com um de nossos atendentes. Aguarde um instante, por favor.";

/// The engine façade: owns every component, receives parsed transport
/// commands, and emits lifecycle events on the bus.
///
/// Cheap to clone (a handle over shared state) and constructed explicitly;
/// there is no process-wide singleton. Transport handlers only ever talk to
/// this type.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    config: EngineConfig,
    store: SessionStore,
    agents: AgentRegistry,
    queue: QueueManager,
    classifier: Classifier,
    fanout: ConnectionFanout,
    bus: EventBus,
    identity: Arc<dyn IdentityResolver>,
}

impl Orchestrator {
    pub fn new(
        config: EngineConfig,
        classifier: Classifier,
        identity: Arc<dyn IdentityResolver>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                store: SessionStore::new(),
                agents: AgentRegistry::new(),
                queue: QueueManager::new(),
                classifier,
                fanout: ConnectionFanout::new(),
                bus: EventBus::new(),
                identity,
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &SessionStore {
        &self.inner.store
    }

    pub fn agents(&self) -> &AgentRegistry {
        &self.inner.agents
    }

    pub fn queue(&self) -> &QueueManager {
        &self.inner.queue
    }

    pub fn fanout(&self) -> &ConnectionFanout {
        &self.inner.fanout
    }

    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    /// Transport hook: a participant connected. Agent connections upsert
    /// their registry entry and come up online.
    pub fn connect(
        &self,
        participant: Participant,
        departments: Vec<String>,
        max_concurrent_chats: u32,
        tx: mpsc::UnboundedSender<ServerEvent>,
    ) -> ConnectionId {
        if participant.role == Role::Agent {
            self.inner.agents.register(
                participant.id.clone(),
                participant.name.clone(),
                departments,
                max_concurrent_chats,
            );
        }
        let connection_id = self.inner.fanout.register(participant.clone(), tx);
        self.inner
            .fanout
            .send_to(connection_id, ServerEvent::Connected { participant });
        connection_id
    }

    /// Transport hook: a connection went away. An agent with no remaining
    /// connection goes offline.
    pub fn disconnect(&self, connection_id: ConnectionId) {
        let participant = self.inner.fanout.participant(connection_id);
        self.inner.fanout.unregister(connection_id);
        if let Some(p) = participant {
            if p.role == Role::Agent && !self.inner.fanout.has_connection_for(&p.id) {
                let _ = self.inner.agents.set_status(&p.id, AgentStatus::Offline);
            }
        }
    }

    /// Parse and run one inbound frame, converting any failure into an
    /// `error` event for the offending connection only.
    pub async fn handle_frame(&self, connection_id: ConnectionId, raw: &str) {
        let outcome = match ClientCommand::parse(raw) {
            Ok(command) => self.handle_command(connection_id, command).await,
            Err(err) => Err(err),
        };
        if let Err(err) = outcome {
            warn!(connection_id, %err, "command rejected");
            self.inner.fanout.send_to(
                connection_id,
                ServerEvent::Error {
                    message: err.to_string(),
                },
            );
        }
    }

    pub async fn handle_command(
        &self,
        connection_id: ConnectionId,
        command: ClientCommand,
    ) -> Result<()> {
        let participant = self
            .inner
            .fanout
            .participant(connection_id)
            .ok_or_else(|| EngineError::not_found(format!("connection {connection_id}")))?;

        match command {
            ClientCommand::StartChat(payload) => {
                self.start_chat(connection_id, participant, payload).await
            }
            ClientCommand::SendMessage(payload) => self.send_message(participant, payload),
            ClientCommand::JoinChat { chat_id } => {
                self.join_chat(connection_id, participant, &chat_id)
            }
            ClientCommand::CloseChat { chat_id, rating } => {
                self.close_chat(connection_id, &chat_id, rating)
            }
            ClientCommand::SetStatus { status } => self.set_status(participant, status),
            ClientCommand::GetQueueStats => {
                self.send_queue_stats(connection_id);
                Ok(())
            }
        }
    }

    async fn start_chat(
        &self,
        connection_id: ConnectionId,
        requester: Participant,
        payload: StartChatPayload,
    ) -> Result<()> {
        // Best-effort enrichment; the resolver is an external collaborator
        // and must never block session creation.
        let contact = match self.inner.identity.get_user(&requester.id).await {
            Ok(profile) => profile.and_then(|p| p.email),
            Err(err) => {
                warn!(%err, "identity resolver failed, continuing without contact");
                None
            }
        };

        let session = self.inner.store.create_session(
            requester,
            contact,
            payload.subject,
            payload.department,
            payload.priority,
            payload.tags,
        );
        self.inner.fanout.send_to(
            connection_id,
            ServerEvent::ChatStarted {
                session: session.clone(),
            },
        );
        // Session first, then its welcome message: subscribers that mirror
        // the stream into a durable store see records in insertion order.
        self.inner.bus.publish(EngineEvent::SessionStarted {
            session: session.clone(),
        });
        if let Some(welcome) = session.messages.first() {
            self.inner.bus.publish(EngineEvent::MessageSent {
                message: welcome.clone(),
            });
        }
        Ok(())
    }

    fn send_message(&self, sender: Participant, payload: SendMessagePayload) -> Result<()> {
        let message = self.inner.store.append_message(
            &payload.chat_id,
            sender.clone(),
            payload.content.clone(),
            payload.kind,
            HashMap::new(),
        )?;
        let session = self
            .inner
            .store
            .get(&payload.chat_id)
            .ok_or_else(|| EngineError::not_found(format!("session {}", payload.chat_id)))?;

        self.inner.fanout.broadcast(
            &session,
            &ServerEvent::NewMessage {
                message: message.clone(),
            },
        );
        self.inner.bus.publish(EngineEvent::MessageSent { message });

        // The bot only speaks while no agent owns the session; active
        // sessions forward verbatim in both directions.
        if session.is_waiting() && sender.role == Role::User && payload.kind == MessageKind::Text {
            self.run_classification(&session, &payload.content)?;
        }
        Ok(())
    }

    fn run_classification(&self, session: &ChatSession, text: &str) -> Result<()> {
        match self.inner.classifier.classify(text) {
            BotDecision::Reply {
                category,
                text,
                requires_human,
            } => {
                self.post_reply(&session.id, text, ("category", category))?;
                if requires_human {
                    self.schedule_escalation(session.id.clone());
                }
            }
            BotDecision::Contextual { topic, text } => {
                self.post_reply(&session.id, text, ("topic", topic))?;
            }
            BotDecision::Escalate => {
                let message = self.inner.store.append_message(
                    &session.id,
                    Participant::system(),
                    CONNECTING_TEXT.to_string(),
                    MessageKind::System,
                    HashMap::new(),
                )?;
                self.deliver_message(&session.id, message);
                self.enqueue_session(&session.id)?;
            }
        }
        Ok(())
    }

    fn post_reply(&self, session_id: &str, text: String, tag: (&str, String)) -> Result<()> {
        let mut metadata = HashMap::new();
        metadata.insert(tag.0.to_string(), tag.1);
        let message = self.inner.store.append_message(
            session_id,
            Participant::bot(),
            text,
            MessageKind::Text,
            metadata,
        )?;
        self.deliver_message(session_id, message);
        Ok(())
    }

    /// Broadcast a freshly appended message to the session parties and
    /// mirror it onto the bus.
    fn deliver_message(&self, session_id: &str, message: ChatMessage) {
        if let Some(session) = self.inner.store.get(session_id) {
            self.inner.fanout.broadcast(
                &session,
                &ServerEvent::NewMessage {
                    message: message.clone(),
                },
            );
        }
        self.inner.bus.publish(EngineEvent::MessageSent { message });
    }

    /// Escalation scheduled by a requires-human rule: the reply is shown
    /// immediately, the queueing follows after the configured delay, and
    /// only if the session is still unassigned by then.
    fn schedule_escalation(&self, session_id: String) {
        let orchestrator = self.clone();
        let delay = self.inner.config.escalation_delay();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(session) = orchestrator.inner.store.get(&session_id) else {
                return;
            };
            if !session.is_waiting() || orchestrator.inner.queue.contains(&session_id) {
                return;
            }
            if let Err(err) = orchestrator.enqueue_session(&session_id) {
                warn!(%session_id, %err, "delayed escalation failed");
            }
        });
    }

    fn enqueue_session(&self, session_id: &str) -> Result<()> {
        let session = self
            .inner
            .store
            .get(session_id)
            .ok_or_else(|| EngineError::not_found(format!("session {session_id}")))?;
        if !self.inner.queue.enqueue(&session) {
            return Ok(());
        }

        let position = self.inner.queue.position(session_id).unwrap_or(1);
        let estimated_wait_secs = self
            .inner
            .queue
            .estimated_wait_secs(&self.inner.agents, &self.inner.config);
        info!(session_id, position, "session escalated to queue");
        self.inner.fanout.send_to_participant(
            &session.requester.id,
            &ServerEvent::AddedToQueue {
                chat_id: session.id.clone(),
                position,
                estimated_wait_secs,
            },
        );
        self.inner.bus.publish(EngineEvent::SessionQueued {
            session_id: session.id,
            position,
            estimated_wait_secs,
        });
        Ok(())
    }

    fn join_chat(
        &self,
        connection_id: ConnectionId,
        participant: Participant,
        chat_id: &str,
    ) -> Result<()> {
        if participant.role != Role::Agent {
            return Err(EngineError::invalid_state(
                "only agents can join a chat".to_string(),
            ));
        }
        // Reserve the capacity slot before touching the session so a
        // concurrent queue pass cannot hand this agent another chat.
        self.inner.agents.increment_load(&participant.id)?;
        let session = match self.inner.store.assign_agent(chat_id, participant.clone()) {
            Ok(session) => session,
            Err(err) => {
                let _ = self.inner.agents.decrement_load(&participant.id);
                return Err(err);
            }
        };
        self.inner.queue.remove(chat_id);

        self.inner.fanout.send_to(
            connection_id,
            ServerEvent::ChatJoined {
                session: session.clone(),
            },
        );
        self.announce_assignment(&session)
    }

    /// Shared tail of both assignment paths (queue pass and explicit
    /// join): system notice, `agent_assigned` broadcast, bus event.
    fn announce_assignment(&self, session: &ChatSession) -> Result<()> {
        let Some(agent) = session.assigned_agent.clone() else {
            return Ok(());
        };
        let notice = format!("Você está falando com {}.", agent.name);
        let message = self.inner.store.append_message(
            &session.id,
            Participant::system(),
            notice,
            MessageKind::System,
            HashMap::new(),
        )?;
        self.deliver_message(&session.id, message);

        let session = self
            .inner
            .store
            .get(&session.id)
            .ok_or_else(|| EngineError::not_found(format!("session {}", session.id)))?;
        self.inner.fanout.broadcast(
            &session,
            &ServerEvent::AgentAssigned {
                chat_id: session.id.clone(),
                agent_id: agent.id,
                agent_name: agent.name,
            },
        );
        self.inner.bus.publish(EngineEvent::AgentAssigned { session });
        Ok(())
    }

    fn close_chat(
        &self,
        connection_id: ConnectionId,
        chat_id: &str,
        rating: Option<u8>,
    ) -> Result<()> {
        let Some(session) = self.inner.store.close(chat_id, rating) else {
            // Unknown or already closed: idempotent success, still confirm.
            self.inner.fanout.send_to(
                connection_id,
                ServerEvent::ChatClosed {
                    chat_id: chat_id.to_string(),
                },
            );
            return Ok(());
        };

        self.inner.queue.remove(chat_id);
        if let Some(agent) = &session.assigned_agent {
            if let Err(err) = self.inner.agents.decrement_load(&agent.id) {
                warn!(agent_id = %agent.id, %err, "capacity release failed");
            }
        }
        self.inner.fanout.broadcast(
            &session,
            &ServerEvent::ChatClosed {
                chat_id: chat_id.to_string(),
            },
        );
        self.inner.bus.publish(EngineEvent::SessionClosed { session });
        Ok(())
    }

    fn set_status(&self, participant: Participant, status: AgentStatus) -> Result<()> {
        if participant.role != Role::Agent {
            return Err(EngineError::invalid_state(
                "only agents have a registry status".to_string(),
            ));
        }
        self.inner.agents.set_status(&participant.id, status)
    }

    fn send_queue_stats(&self, connection_id: ConnectionId) {
        let stats = QueueStatsReport {
            queued: self.inner.queue.len(),
            estimated_wait_secs: self
                .inner
                .queue
                .estimated_wait_secs(&self.inner.agents, &self.inner.config),
            agents_online: self.inner.agents.online_count(),
            agents_busy: self.inner.agents.busy_count(),
            by_priority: self.inner.queue.breakdown(),
        };
        self.inner
            .fanout
            .send_to(connection_id, ServerEvent::QueueStats { stats });
    }

    /// One queue assignment pass; runs on the queue timer and in tests.
    pub fn queue_tick(&self) {
        let outcomes = self
            .inner
            .queue
            .process(&self.inner.store, &self.inner.agents, &self.inner.config);
        for outcome in outcomes {
            match outcome {
                QueueOutcome::Assigned { session, .. } => {
                    if let Err(err) = self.announce_assignment(&session) {
                        warn!(session_id = %session.id, %err, "assignment announcement failed");
                    }
                }
                QueueOutcome::StillWaiting {
                    session_id,
                    position,
                    estimated_wait_secs,
                } => self.notify_still_waiting(&session_id, position, estimated_wait_secs),
            }
        }
    }

    /// Wait-time notification, addressed to the waiting requester only.
    fn notify_still_waiting(&self, session_id: &str, position: usize, estimated_wait_secs: u64) {
        let Some(session) = self.inner.store.get(session_id) else {
            return;
        };
        let minutes = estimated_wait_secs.div_ceil(60).max(1);
        let notice = format!(
            "Você está na posição {position} da fila. Tempo estimado de espera: {minutes} min."
        );
        match self.inner.store.append_message(
            session_id,
            Participant::system(),
            notice,
            MessageKind::System,
            HashMap::new(),
        ) {
            Ok(message) => {
                self.inner.fanout.send_to_participant(
                    &session.requester.id,
                    &ServerEvent::NewMessage {
                        message: message.clone(),
                    },
                );
                self.inner.bus.publish(EngineEvent::MessageSent { message });
            }
            Err(err) => warn!(session_id, %err, "queue notice dropped"),
        }
        self.inner.fanout.send_to_participant(
            &session.requester.id,
            &ServerEvent::QueueUpdate {
                chat_id: session_id.to_string(),
                position,
                estimated_wait_secs,
            },
        );
        self.inner.bus.publish(EngineEvent::QueueUpdate {
            session_id: session_id.to_string(),
            position,
            estimated_wait_secs,
        });
    }

    /// Spawn the two periodic passes: queue assignment and connection
    /// sweep. Tasks run for the life of the process.
    pub fn spawn_timers(&self) {
        let orchestrator = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(orchestrator.inner.config.queue_tick());
            ticker.tick().await; // the first tick fires immediately
            loop {
                ticker.tick().await;
                orchestrator.queue_tick();
            }
        });

        let orchestrator = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(orchestrator.inner.config.sweep_interval());
            ticker.tick().await;
            loop {
                ticker.tick().await;
                orchestrator.inner.fanout.sweep();
            }
        });
    }
}
