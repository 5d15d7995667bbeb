use crate::entity::{Participant, Role};
use crate::orchestrator::Orchestrator;
use crate::protocol::ServerEvent;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::debug;
use uuid::Uuid;

const DEFAULT_AGENT_MAX_CHATS: u32 = 3;

/// Connection identity comes from the upgrade request; resolving it against
/// the real identity provider is the gateway's job, not ours.
#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    participant_id: Option<String>,
    name: Option<String>,
    role: Option<String>,
    /// Comma-separated department tags (agents only).
    departments: Option<String>,
    max_chats: Option<u32>,
}

pub fn router(orchestrator: Orchestrator) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/healthz", get(healthz))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(orchestrator)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(orchestrator): State<Orchestrator>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, orchestrator, params))
}

async fn handle_socket(socket: WebSocket, orchestrator: Orchestrator, params: ConnectParams) {
    let participant = participant_from(&params);
    let departments: Vec<String> = params
        .departments
        .as_deref()
        .unwrap_or_default()
        .split(',')
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty())
        .collect();
    let max_chats = params.max_chats.unwrap_or(DEFAULT_AGENT_MAX_CHATS);

    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();
    let connection_id = orchestrator.connect(participant, departments, max_chats, tx);

    let (mut ws_tx, mut ws_rx) = socket.split();

    // Pump engine events out to the socket until either side goes away.
    let send_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let Ok(frame) = serde_json::to_string(&event) else {
                continue;
            };
            if ws_tx.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(message)) = ws_rx.next().await {
        match message {
            Message::Text(text) => orchestrator.handle_frame(connection_id, &text).await,
            Message::Close(_) => break,
            _ => {}
        }
    }

    debug!(connection_id, "socket closed");
    orchestrator.disconnect(connection_id);
    send_task.abort();
}

fn participant_from(params: &ConnectParams) -> Participant {
    let id = params
        .participant_id
        .clone()
        .unwrap_or_else(|| format!("guest_{}", Uuid::new_v4().simple()));
    let name = params.name.clone().unwrap_or_else(|| "Visitante".to_string());
    let role = match params.role.as_deref() {
        Some("agent") => Role::Agent,
        _ => Role::User,
    };
    Participant::new(id, name, role)
}
