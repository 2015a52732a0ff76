//! WebSocket surface. Each connection receives the terminal banner on
//! connect, every `guenther_log` event, and the chat lifecycle frames
//! (`chat_created`, `agent_start`, `agent_response`, …). Inbound
//! `send_message` frames run one agent turn.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use guenther_agent::{media, AgentRunOptions};
use guenther_core::log::LogEvent;
use guenther_tools::ToolOrigin;

use crate::app::AppState;
use crate::util::truncate_title;

pub async fn ws_handler(
    State(state): State<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(state, socket))
}

async fn handle_socket(state: Arc<AppState>, mut socket: WebSocket) {
    let conn_id = Uuid::new_v4().to_string();
    let (tx, mut rx) = mpsc::channel::<String>(256);
    state.ws_clients.insert(conn_id.clone(), tx.clone());
    debug!(%conn_id, "ws client connected");

    // Terminal banner + tool inventory, to this client only.
    for event in banner_events(&state) {
        let frame = json!({
            "event": "guenther_log",
            "data": serde_json::to_value(&event).unwrap_or(Value::Null),
        })
        .to_string();
        let _ = tx.try_send(frame);
    }

    loop {
        tokio::select! {
            outgoing = rx.recv() => {
                match outgoing {
                    Some(frame) => {
                        if socket.send(Message::Text(frame.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        let Ok(frame) = serde_json::from_str::<Value>(&text) else {
                            continue;
                        };
                        if frame.get("type").and_then(Value::as_str) == Some("send_message") {
                            let state2 = Arc::clone(&state);
                            tokio::spawn(async move {
                                handle_send_message(state2, frame).await;
                            });
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(%conn_id, error = %e, "ws receive error");
                        break;
                    }
                }
            }
        }
    }

    state.ws_clients.remove(&conn_id);
    debug!(%conn_id, "ws client disconnected");
}

fn banner_events(state: &Arc<AppState>) -> Vec<LogEvent> {
    let tools = state.agent.registry().list();
    let tool_info: Vec<Value> = tools
        .iter()
        .map(|t| {
            json!({
                "name": t.name,
                "description": t.description,
                "builtin": t.origin == ToolOrigin::Builtin,
            })
        })
        .collect();

    vec![
        LogEvent::header("G U E N T H E R  v1.0 - MCP Agent Terminal"),
        LogEvent::text("Verbindung hergestellt."),
        LogEvent::text(format!("Registrierte Tools: {}", tools.len())),
        LogEvent::json("tools", json!(tool_info)),
        LogEvent::text("Warte auf Eingabe..."),
    ]
}

/// One web-UI turn: persist the user message, run the agent, persist and
/// fan out the reply.
async fn handle_send_message(state: Arc<AppState>, frame: Value) {
    let content = frame.get("content").and_then(Value::as_str).unwrap_or("").trim();
    let file_name = frame.get("file_name").and_then(Value::as_str).unwrap_or("");
    let file_content = frame
        .get("file_content")
        .and_then(Value::as_str)
        .unwrap_or("");
    if content.is_empty() && file_content.is_empty() {
        return;
    }

    // Prepend an uploaded file so the model can work with it.
    let content = if !file_name.is_empty() && !file_content.is_empty() {
        if content.is_empty() {
            format!("[Datei: {file_name}]\n```\n{file_content}\n```")
        } else {
            format!("[Datei: {file_name}]\n```\n{file_content}\n```\n\n{content}")
        }
    } else {
        content.to_string()
    };

    let mut agent_id = frame
        .get("agent_id")
        .and_then(Value::as_str)
        .filter(|a| !a.is_empty())
        .map(String::from);

    // Resolve or create the chat.
    let chat_id = match frame.get("chat_id").and_then(Value::as_i64) {
        Some(id) => {
            // Existing chat: the stored agent binding wins.
            agent_id = state
                .chats
                .get_chat(id)
                .ok()
                .flatten()
                .and_then(|c| c.agent_id);
            id
        }
        None => {
            let title = truncate_title(&content);
            match state.chats.create_chat(&title, agent_id.as_deref()) {
                Ok(id) => {
                    state.broadcast_event(
                        "chat_created",
                        json!({ "chat_id": id, "title": title, "agent_id": agent_id }),
                    );
                    id
                }
                Err(e) => {
                    warn!(error = %e, "chat creation failed");
                    return;
                }
            }
        }
    };

    if let Err(e) = state.chats.add_message(chat_id, "user", &content) {
        warn!(error = %e, "user message write failed");
        return;
    }

    let history = match state.chats.get_messages(chat_id) {
        Ok(h) => h,
        Err(e) => {
            warn!(error = %e, "history read failed");
            return;
        }
    };
    let messages: Vec<Value> = history
        .iter()
        .filter(|m| m.role == "user" || m.role == "assistant")
        .map(|m| json!({ "role": m.role, "content": m.content }))
        .collect();

    if messages.len() == 1 {
        let title = truncate_title(&content);
        let _ = state.chats.update_chat_title(chat_id, &title);
        state.broadcast_event("chat_updated", json!({ "chat_id": chat_id, "title": title }));
    }

    state.broadcast_event("agent_start", json!({ "chat_id": chat_id }));

    let mut opts = AgentRunOptions {
        chat_id: Some(chat_id),
        ..Default::default()
    };
    if let Some(agent_id) = &agent_id {
        if let Some(profile) = state.agents.get(agent_id) {
            if !profile.system_prompt.trim().is_empty() {
                opts.system_prompt = Some(profile.system_prompt.clone());
            }
            opts.agent_provider_id = profile.provider_id.clone();
            opts.agent_model = profile.model.clone();
        }
    }

    let settings = state.settings.load();
    let log = state.log_sink();
    let response = state.agent.run_agent(&messages, &settings, &log, opts).await;

    let response = media::extract_and_store(&response, chat_id, &state.files);
    if let Err(e) = state.chats.add_message(chat_id, "assistant", &response) {
        warn!(error = %e, "assistant message write failed");
    }
    state.broadcast_event(
        "agent_response",
        json!({ "chat_id": chat_id, "content": response }),
    );
    state.broadcast_event("agent_end", json!({ "chat_id": chat_id }));
}
