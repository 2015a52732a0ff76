//! Webhook management plus the public trigger endpoint: a token maps to a
//! (chat, agent) binding and runs one agent turn.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde_json::{json, Value};

use guenther_agent::{media, AgentRunOptions};
use guenther_core::webhooks::{token_matches, Webhook};

use crate::app::AppState;
use crate::util::truncate_title;

#[derive(serde::Deserialize)]
pub struct WebhookRequest {
    pub name: String,
    #[serde(default)]
    pub chat_id: Option<i64>,
    #[serde(default)]
    pub agent_id: Option<String>,
}

pub async fn list_webhooks(State(state): State<Arc<AppState>>) -> Json<Value> {
    let masked: Vec<Webhook> = state.webhooks.list().iter().map(Webhook::masked).collect();
    Json(json!(masked))
}

pub async fn create_webhook(
    State(state): State<Arc<AppState>>,
    Json(req): Json<WebhookRequest>,
) -> Result<(StatusCode, Json<Value>), (StatusCode, Json<Value>)> {
    if req.name.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Name ist erforderlich" })),
        ));
    }
    let mut webhook = Webhook::new(req.name.trim()).map_err(internal)?;
    webhook.chat_id = req.chat_id;
    webhook.agent_id = req.agent_id.filter(|a| !a.is_empty());
    state.webhooks.save(&webhook).map_err(internal)?;

    // The full token is shown exactly once, at creation time.
    Ok((StatusCode::CREATED, Json(json!(webhook))))
}

pub async fn update_webhook(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<WebhookRequest>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let mut webhook = state.webhooks.get(&id).ok_or_else(not_found)?;
    webhook.name = req.name;
    webhook.chat_id = req.chat_id;
    webhook.agent_id = req.agent_id.filter(|a| !a.is_empty());
    state.webhooks.save(&webhook).map_err(internal)?;
    Ok(Json(json!(webhook.masked())))
}

pub async fn delete_webhook(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    state.webhooks.delete(&id).map_err(internal)?;
    Ok(Json(json!({ "success": true })))
}

/// POST /webhook/{id} — `Authorization: Bearer <token>`, body `{message}`.
pub async fn trigger_webhook(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Option<Json<Value>>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let webhook = state.webhooks.get(&id).ok_or_else(|| {
        (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "Webhook nicht gefunden" })),
        )
    })?;

    let presented = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("");
    if !token_matches(&webhook.token, presented) {
        return Err((
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "Ungültiger Token" })),
        ));
    }

    let message = body
        .as_ref()
        .and_then(|Json(b)| b.get("message"))
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or("")
        .to_string();
    if message.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "message ist erforderlich" })),
        ));
    }

    // Bound chat if it still exists, otherwise a fresh one named from the
    // message.
    let chat_id = match webhook.chat_id {
        Some(id) if state.chats.get_chat(id).ok().flatten().is_some() => id,
        _ => state
            .chats
            .create_chat(&truncate_title(&message), None)
            .map_err(internal)?,
    };

    let history = state.chats.get_messages(chat_id).map_err(internal)?;
    let mut messages: Vec<Value> = history
        .iter()
        .filter(|m| m.role == "user" || m.role == "assistant")
        .map(|m| json!({ "role": m.role, "content": m.content }))
        .collect();
    messages.push(json!({ "role": "user", "content": message }));
    state
        .chats
        .add_message(chat_id, "user", &message)
        .map_err(internal)?;

    // Agent profile overrides.
    let mut opts = AgentRunOptions {
        chat_id: Some(chat_id),
        ..Default::default()
    };
    if let Some(agent_id) = &webhook.agent_id {
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
    state
        .chats
        .add_message(chat_id, "assistant", &response)
        .map_err(internal)?;

    Ok(Json(json!({ "chat_id": chat_id, "response": response })))
}

fn not_found() -> (StatusCode, Json<Value>) {
    (StatusCode::NOT_FOUND, Json(json!({ "error": "Nicht gefunden" })))
}

fn internal<E: std::fmt::Display>(e: E) -> (StatusCode, Json<Value>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": e.to_string() })),
    )
}
