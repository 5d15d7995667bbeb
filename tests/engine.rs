//! End-to-end scenarios driven through the orchestrator, observing exactly
//! what a connected client would see.

use balcao::agents::AgentStatus;
use balcao::chat::{Priority, SessionStatus};
use balcao::classify::Classifier;
use balcao::collab::NullCollaborator;
use balcao::config::EngineConfig;
use balcao::entity::Participant;
use balcao::fanout::ConnectionId;
use balcao::orchestrator::Orchestrator;
use balcao::protocol::{ClientCommand, SendMessagePayload, ServerEvent, StartChatPayload};
use std::sync::Arc;
use tokio::sync::mpsc;

fn engine() -> Orchestrator {
    engine_with(EngineConfig::default())
}

fn engine_with(config: EngineConfig) -> Orchestrator {
    Orchestrator::new(
        config,
        Classifier::builtin().expect("built-in rules compile"),
        Arc::new(NullCollaborator),
    )
}

fn connect_user(
    orchestrator: &Orchestrator,
    id: &str,
    name: &str,
) -> (ConnectionId, mpsc::UnboundedReceiver<ServerEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let connection_id = orchestrator.connect(Participant::user(id, name), vec![], 0, tx);
    (connection_id, rx)
}

fn connect_agent(
    orchestrator: &Orchestrator,
    id: &str,
    name: &str,
    max_chats: u32,
) -> (ConnectionId, mpsc::UnboundedReceiver<ServerEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let connection_id =
        orchestrator.connect(Participant::agent(id, name), vec![], max_chats, tx);
    (connection_id, rx)
}

fn drain(rx: &mut mpsc::UnboundedReceiver<ServerEvent>) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

async fn start_chat(
    orchestrator: &Orchestrator,
    connection_id: ConnectionId,
    rx: &mut mpsc::UnboundedReceiver<ServerEvent>,
    priority: Priority,
) -> String {
    orchestrator
        .handle_command(
            connection_id,
            ClientCommand::StartChat(StartChatPayload {
                priority,
                ..Default::default()
            }),
        )
        .await
        .expect("start_chat succeeds");
    drain(rx)
        .into_iter()
        .find_map(|e| match e {
            ServerEvent::ChatStarted { session } => Some(session.id),
            _ => None,
        })
        .expect("chat_started event delivered")
}

async fn send_text(
    orchestrator: &Orchestrator,
    connection_id: ConnectionId,
    chat_id: &str,
    content: &str,
) {
    orchestrator
        .handle_command(
            connection_id,
            ClientCommand::SendMessage(SendMessagePayload {
                chat_id: chat_id.to_string(),
                content: content.to_string(),
                kind: Default::default(),
            }),
        )
        .await
        .expect("send_message succeeds");
}

#[tokio::test]
async fn greeting_then_default_escalation() {
    let orchestrator = engine();
    let (conn, mut rx) = connect_user(&orchestrator, "u1", "Maria");
    let chat_id = start_chat(&orchestrator, conn, &mut rx, Priority::High).await;

    // "oi" draws a scripted greeting; nobody is queued for it.
    send_text(&orchestrator, conn, &chat_id, "oi").await;
    let events = drain(&mut rx);
    let bot_reply = events
        .iter()
        .find_map(|e| match e {
            ServerEvent::NewMessage { message }
                if message.sender.role == balcao::entity::Role::Bot =>
            {
                Some(message.clone())
            }
            _ => None,
        })
        .expect("bot replied");
    assert_eq!(bot_reply.metadata.get("category").unwrap(), "greeting");
    assert_eq!(
        orchestrator.store().get(&chat_id).unwrap().status,
        SessionStatus::Waiting
    );
    assert_eq!(orchestrator.queue().len(), 0);

    // No rule and no topic: exactly one added_to_queue, one entry.
    send_text(&orchestrator, conn, &chat_id, "quero falar com um atendente").await;
    let events = drain(&mut rx);
    let queued: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            ServerEvent::AddedToQueue {
                chat_id,
                estimated_wait_secs,
                ..
            } => Some((chat_id.clone(), *estimated_wait_secs)),
            _ => None,
        })
        .collect();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].0, chat_id);
    assert!(queued[0].1 > 0);
    assert_eq!(orchestrator.queue().len(), 1);
    assert!(orchestrator.queue().contains(&chat_id));

    // The user was told a human is coming.
    assert!(events.iter().any(|e| matches!(
        e,
        ServerEvent::NewMessage { message }
            if message.sender.role == balcao::entity::Role::System
                && message.content.contains("atendentes")
    )));
}

#[tokio::test]
async fn tick_assigns_two_of_three_sessions() {
    let orchestrator = engine();

    let mut users = Vec::new();
    for i in 0..3 {
        let (conn, mut rx) = connect_user(&orchestrator, &format!("u{i}"), "Cliente");
        let chat_id = start_chat(&orchestrator, conn, &mut rx, Priority::High).await;
        send_text(&orchestrator, conn, &chat_id, "quero falar com um atendente").await;
        drain(&mut rx);
        users.push((conn, rx, chat_id));
    }
    assert_eq!(orchestrator.queue().len(), 3);

    let (_a1, mut rx_a1) = connect_agent(&orchestrator, "a1", "João", 1);
    let (_a2, mut rx_a2) = connect_agent(&orchestrator, "a2", "Ana", 1);

    orchestrator.queue_tick();

    let active: Vec<_> = users
        .iter()
        .filter(|(_, _, chat_id)| {
            orchestrator
                .store()
                .get(chat_id)
                .is_some_and(|s| s.status == SessionStatus::Active)
        })
        .collect();
    assert_eq!(active.len(), 2);
    assert_eq!(orchestrator.queue().len(), 1);

    // Capacity invariant: both agents carry exactly one chat and present
    // as busy; no third assignment happened.
    for agent_id in ["a1", "a2"] {
        let agent = orchestrator.agents().get(agent_id).unwrap();
        assert_eq!(agent.current_chats, 1);
        assert_eq!(agent.status, AgentStatus::Busy);
    }

    // Single ownership: the two active sessions went to different agents.
    let mut owners: Vec<String> = users
        .iter()
        .filter_map(|(_, _, chat_id)| orchestrator.store().get(chat_id))
        .filter_map(|s| s.assigned_agent.map(|a| a.id))
        .collect();
    owners.sort();
    owners.dedup();
    assert_eq!(owners.len(), 2);

    // Each assigned agent learned about its chat.
    assert!(drain(&mut rx_a1)
        .iter()
        .any(|e| matches!(e, ServerEvent::AgentAssigned { .. })));
    assert!(drain(&mut rx_a2)
        .iter()
        .any(|e| matches!(e, ServerEvent::AgentAssigned { .. })));

    // Another tick with everyone full changes nothing.
    orchestrator.queue_tick();
    assert_eq!(orchestrator.queue().len(), 1);
}

#[tokio::test]
async fn join_chat_assigns_and_second_agent_is_rejected() {
    let orchestrator = engine();
    let (user_conn, mut user_rx) = connect_user(&orchestrator, "u1", "Maria");
    let chat_id = start_chat(&orchestrator, user_conn, &mut user_rx, Priority::Medium).await;

    let (a1_conn, mut a1_rx) = connect_agent(&orchestrator, "a1", "João", 2);
    let (a2_conn, mut a2_rx) = connect_agent(&orchestrator, "a2", "Ana", 2);

    orchestrator
        .handle_command(
            a1_conn,
            ClientCommand::JoinChat {
                chat_id: chat_id.clone(),
            },
        )
        .await
        .expect("first join succeeds");
    assert!(drain(&mut a1_rx)
        .iter()
        .any(|e| matches!(e, ServerEvent::ChatJoined { .. })));
    // The requester hears who picked them up.
    assert!(drain(&mut user_rx)
        .iter()
        .any(|e| matches!(e, ServerEvent::AgentAssigned { agent_id, .. } if agent_id == "a1")));

    // The session is owned; a second join is an invalid state, reported
    // only to the offending connection.
    orchestrator
        .handle_frame(
            a2_conn,
            &format!(r#"{{"type": "join_chat", "payload": {{"chat_id": "{chat_id}"}}}}"#),
        )
        .await;
    let a2_events = drain(&mut a2_rx);
    assert!(a2_events
        .iter()
        .any(|e| matches!(e, ServerEvent::Error { .. })));
    assert!(drain(&mut user_rx)
        .iter()
        .all(|e| !matches!(e, ServerEvent::Error { .. })));

    // The losing agent kept its capacity.
    assert_eq!(orchestrator.agents().get("a2").unwrap().current_chats, 0);
    let session = orchestrator.store().get(&chat_id).unwrap();
    assert_eq!(session.assigned_agent.as_ref().unwrap().id, "a1");

    // Messages now forward verbatim, both directions, no bot involved.
    send_text(&orchestrator, user_conn, &chat_id, "oi, tudo bem?").await;
    let agent_saw: Vec<_> = drain(&mut a1_rx);
    assert!(agent_saw.iter().any(|e| matches!(
        e,
        ServerEvent::NewMessage { message } if message.content == "oi, tudo bem?"
    )));
    assert!(orchestrator
        .store()
        .get(&chat_id)
        .unwrap()
        .messages
        .iter()
        .all(|m| m.sender.role != balcao::entity::Role::Bot));
}

#[tokio::test]
async fn close_releases_capacity_and_is_idempotent() {
    let orchestrator = engine();
    let (user_conn, mut user_rx) = connect_user(&orchestrator, "u1", "Maria");
    let chat_id = start_chat(&orchestrator, user_conn, &mut user_rx, Priority::Medium).await;

    let (a1_conn, _a1_rx) = connect_agent(&orchestrator, "a1", "João", 1);
    orchestrator
        .handle_command(
            a1_conn,
            ClientCommand::JoinChat {
                chat_id: chat_id.clone(),
            },
        )
        .await
        .unwrap();
    assert_eq!(orchestrator.agents().get("a1").unwrap().current_chats, 1);

    orchestrator
        .handle_command(
            user_conn,
            ClientCommand::CloseChat {
                chat_id: chat_id.clone(),
                rating: Some(5),
            },
        )
        .await
        .expect("close succeeds");
    assert!(orchestrator.store().get(&chat_id).is_none());
    assert_eq!(orchestrator.agents().get("a1").unwrap().current_chats, 0);
    assert_eq!(
        orchestrator.agents().get("a1").unwrap().status,
        AgentStatus::Online
    );
    assert!(drain(&mut user_rx)
        .iter()
        .any(|e| matches!(e, ServerEvent::ChatClosed { .. })));

    // Closing again succeeds without error and without touching capacity.
    orchestrator
        .handle_command(
            user_conn,
            ClientCommand::CloseChat {
                chat_id: chat_id.clone(),
                rating: None,
            },
        )
        .await
        .expect("repeated close is a no-op success");
    assert_eq!(orchestrator.agents().get("a1").unwrap().current_chats, 0);
    assert!(drain(&mut user_rx)
        .iter()
        .any(|e| matches!(e, ServerEvent::ChatClosed { .. })));
}

#[tokio::test]
async fn closing_a_queued_session_removes_its_entry() {
    let orchestrator = engine();
    let (conn, mut rx) = connect_user(&orchestrator, "u1", "Maria");
    let chat_id = start_chat(&orchestrator, conn, &mut rx, Priority::High).await;
    send_text(&orchestrator, conn, &chat_id, "quero falar com um atendente").await;
    assert!(orchestrator.queue().contains(&chat_id));

    orchestrator
        .handle_command(
            conn,
            ClientCommand::CloseChat {
                chat_id: chat_id.clone(),
                rating: None,
            },
        )
        .await
        .unwrap();
    assert!(!orchestrator.queue().contains(&chat_id));

    // A later tick finds nothing to do and nothing resurrects the session.
    connect_agent(&orchestrator, "a1", "João", 1);
    orchestrator.queue_tick();
    assert!(orchestrator.store().get(&chat_id).is_none());
    assert_eq!(orchestrator.agents().get("a1").unwrap().current_chats, 0);
}

#[tokio::test(start_paused = true)]
async fn requires_human_rule_escalates_after_delay() {
    let orchestrator = engine();
    let (conn, mut rx) = connect_user(&orchestrator, "u1", "Maria");
    let chat_id = start_chat(&orchestrator, conn, &mut rx, Priority::Medium).await;

    send_text(&orchestrator, conn, &chat_id, "qual o valor do plano?").await;
    let events = drain(&mut rx);
    let bot_reply = events
        .iter()
        .find_map(|e| match e {
            ServerEvent::NewMessage { message }
                if message.sender.role == balcao::entity::Role::Bot =>
            {
                Some(message.clone())
            }
            _ => None,
        })
        .expect("pricing reply shown immediately");
    assert_eq!(bot_reply.metadata.get("category").unwrap(), "pricing");

    // The reply lands first; the queueing follows only after the delay.
    assert_eq!(orchestrator.queue().len(), 0);
    tokio::time::sleep(orchestrator.config().escalation_delay() * 2).await;
    assert_eq!(orchestrator.queue().len(), 1);
    assert!(drain(&mut rx)
        .iter()
        .any(|e| matches!(e, ServerEvent::AddedToQueue { .. })));
}

#[tokio::test(start_paused = true)]
async fn delayed_escalation_is_dropped_once_an_agent_joined() {
    let orchestrator = engine();
    let (conn, mut rx) = connect_user(&orchestrator, "u1", "Maria");
    let chat_id = start_chat(&orchestrator, conn, &mut rx, Priority::Medium).await;

    send_text(&orchestrator, conn, &chat_id, "qual o valor do plano?").await;

    // An agent picks the session up before the delay elapses.
    let (a1_conn, _a1_rx) = connect_agent(&orchestrator, "a1", "João", 1);
    orchestrator
        .handle_command(
            a1_conn,
            ClientCommand::JoinChat {
                chat_id: chat_id.clone(),
            },
        )
        .await
        .unwrap();

    tokio::time::sleep(orchestrator.config().escalation_delay() * 2).await;
    assert_eq!(orchestrator.queue().len(), 0);
}

#[tokio::test]
async fn errors_reach_only_the_offending_connection() {
    let orchestrator = engine();
    let (conn_a, mut rx_a) = connect_user(&orchestrator, "u1", "Maria");
    let (_conn_b, mut rx_b) = connect_user(&orchestrator, "u2", "Pedro");
    drain(&mut rx_a);
    drain(&mut rx_b);

    // Unknown command type.
    orchestrator
        .handle_frame(conn_a, r#"{"type": "dance", "payload": {}}"#)
        .await;
    // Message into a session that does not exist.
    orchestrator
        .handle_frame(
            conn_a,
            r#"{"type": "send_message", "payload": {"chat_id": "chat_missing", "content": "oi"}}"#,
        )
        .await;

    let a_errors = drain(&mut rx_a)
        .into_iter()
        .filter(|e| matches!(e, ServerEvent::Error { .. }))
        .count();
    assert_eq!(a_errors, 2);
    assert!(drain(&mut rx_b).is_empty());
}

#[tokio::test]
async fn queue_stats_reflect_queue_and_agents() {
    let orchestrator = engine();
    let (conn, mut rx) = connect_user(&orchestrator, "u1", "Maria");
    let chat_id = start_chat(&orchestrator, conn, &mut rx, Priority::High).await;
    send_text(&orchestrator, conn, &chat_id, "quero falar com um atendente").await;

    connect_agent(&orchestrator, "a1", "João", 2);
    drain(&mut rx);

    orchestrator
        .handle_command(conn, ClientCommand::GetQueueStats)
        .await
        .unwrap();
    let stats = drain(&mut rx)
        .into_iter()
        .find_map(|e| match e {
            ServerEvent::QueueStats { stats } => Some(stats),
            _ => None,
        })
        .expect("queue_stats delivered");
    assert_eq!(stats.queued, 1);
    assert_eq!(stats.by_priority.high, 1);
    assert_eq!(stats.agents_online, 1);
    assert!(stats.estimated_wait_secs > 0);
}

#[tokio::test]
async fn agent_disconnect_goes_offline_and_stops_assignment() {
    let orchestrator = engine();
    let (a1_conn, _a1_rx) = connect_agent(&orchestrator, "a1", "João", 1);
    orchestrator.disconnect(a1_conn);
    assert_eq!(
        orchestrator.agents().get("a1").unwrap().status,
        AgentStatus::Offline
    );

    let (conn, mut rx) = connect_user(&orchestrator, "u1", "Maria");
    let chat_id = start_chat(&orchestrator, conn, &mut rx, Priority::High).await;
    send_text(&orchestrator, conn, &chat_id, "quero falar com um atendente").await;

    orchestrator.queue_tick();
    assert_eq!(
        orchestrator.store().get(&chat_id).unwrap().status,
        SessionStatus::Waiting
    );
    assert_eq!(orchestrator.queue().len(), 1);
}

#[tokio::test]
async fn lifecycle_events_reach_bus_subscribers() {
    let orchestrator = engine();
    let mut bus_rx = orchestrator.bus().subscribe();

    let (conn, mut rx) = connect_user(&orchestrator, "u1", "Maria");
    let chat_id = start_chat(&orchestrator, conn, &mut rx, Priority::Medium).await;
    orchestrator
        .handle_command(
            conn,
            ClientCommand::CloseChat {
                chat_id: chat_id.clone(),
                rating: Some(4),
            },
        )
        .await
        .unwrap();

    let mut saw_started = false;
    let mut saw_closed_with_rating = false;
    while let Ok(event) = bus_rx.try_recv() {
        match event {
            balcao::bus::EngineEvent::SessionStarted { session } => {
                saw_started = session.id == chat_id;
            }
            balcao::bus::EngineEvent::SessionClosed { session } => {
                saw_closed_with_rating = session.rating == Some(4);
            }
            _ => {}
        }
    }
    assert!(saw_started);
    assert!(saw_closed_with_rating);
}
