use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde_json::{json, Value};
use tracing::warn;

use crate::app::AppState;

pub async fn list_chats(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let chats = state.chats.list_chats().map_err(internal)?;
    Ok(Json(json!(chats)))
}

#[derive(serde::Deserialize, Default)]
pub struct CreateChatRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub agent_id: Option<String>,
}

pub async fn create_chat(
    State(state): State<Arc<AppState>>,
    body: Option<Json<CreateChatRequest>>,
) -> Result<(StatusCode, Json<Value>), (StatusCode, Json<Value>)> {
    let req = body.map(|Json(b)| b).unwrap_or_default();
    let title = req
        .title
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| "Neuer Chat".to_string());
    let id = state
        .chats
        .create_chat(&title, req.agent_id.as_deref())
        .map_err(internal)?;
    state.broadcast_event(
        "chat_created",
        json!({ "chat_id": id, "title": title, "agent_id": req.agent_id }),
    );
    Ok((StatusCode::CREATED, Json(json!({ "chat_id": id, "title": title }))))
}

pub async fn get_chat(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let chat = state
        .chats
        .get_chat(id)
        .map_err(internal)?
        .ok_or_else(not_found)?;
    let messages = state.chats.get_messages(id).map_err(internal)?;

    let mut body = serde_json::to_value(&chat).map_err(|e| internal(e))?;
    body["messages"] = json!(messages);
    Ok(Json(body))
}

/// Delete the chat row, all its messages, and the chat's file directory.
pub async fn delete_chat(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    state.chats.delete_chat(id).map_err(|e| match e {
        guenther_store::StoreError::ChatNotFound { .. } => not_found(),
        other => internal(other),
    })?;
    if let Err(e) = state.files.delete_chat_files(id) {
        warn!(chat_id = id, error = %e, "chat file directory cleanup failed");
    }
    Ok(Json(json!({ "success": true })))
}

pub async fn get_chat_file(
    State(state): State<Arc<AppState>>,
    Path((id, name)): Path<(i64, String)>,
) -> Result<impl IntoResponse, (StatusCode, Json<Value>)> {
    let bytes = state.files.get_file(id, &name).ok_or_else(not_found)?;
    let mime = mime_for(&name);
    Ok(([(header::CONTENT_TYPE, mime)], bytes))
}

fn mime_for(name: &str) -> &'static str {
    let ext = name.rsplit('.').next().unwrap_or("").to_lowercase();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "mp3" => "audio/mpeg",
        "ogg" => "audio/ogg",
        "wav" => "audio/wav",
        "html" => "text/html; charset=utf-8",
        "pdf" => "application/pdf",
        "pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        _ => "application/octet-stream",
    }
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
