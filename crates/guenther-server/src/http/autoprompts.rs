use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};

use guenther_scheduler::AutopromptRecord;

use crate::app::AppState;
use crate::autoprompt_runner;

pub async fn list_autoprompts(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!(state.autoprompts.list()))
}

pub async fn create_autoprompt(
    State(state): State<Arc<AppState>>,
    Json(mut record): Json<AutopromptRecord>,
) -> Result<(StatusCode, Json<Value>), (StatusCode, Json<Value>)> {
    if record.name.trim().is_empty() || record.prompt.trim().is_empty() {
        return Err(bad_request("name und prompt sind erforderlich"));
    }
    if record.id.trim().is_empty() {
        record.id = uuid::Uuid::new_v4().to_string();
    }
    state.autoprompts.save(&record).map_err(internal)?;
    state.scheduler.reschedule(&record.id);
    Ok((StatusCode::CREATED, Json(json!(record))))
}

pub async fn update_autoprompt(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(mut record): Json<AutopromptRecord>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    state.autoprompts.get(&id).ok_or_else(not_found)?;
    record.id = id.clone();
    state.autoprompts.save(&record).map_err(internal)?;
    // Exactly one trigger is replaced: the engine drops the old entry and
    // inserts the new one (or none when disabled).
    state.scheduler.reschedule(&id);
    Ok(Json(json!(record)))
}

pub async fn delete_autoprompt(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    state.autoprompts.delete(&id).map_err(internal)?;
    state.scheduler.reschedule(&id);
    Ok(Json(json!({ "success": true })))
}

/// Fire the record immediately in a background task, regardless of its
/// schedule. The HTTP caller returns right away.
pub async fn run_now(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let record = state.autoprompts.get(&id).ok_or_else(not_found)?;
    let state2 = Arc::clone(&state);
    tokio::spawn(async move {
        autoprompt_runner::run_record(&state2, record).await;
    });
    Ok(Json(json!({ "success": true, "started": true })))
}

pub async fn export_autoprompts(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!(state.autoprompts.list()))
}

pub async fn import_autoprompts(
    State(state): State<Arc<AppState>>,
    Json(records): Json<Vec<AutopromptRecord>>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let imported = state.autoprompts.import(records).map_err(internal)?;
    for record in &imported {
        state.scheduler.reschedule(&record.id);
    }
    Ok(Json(json!({ "success": true, "imported": imported.len() })))
}

fn not_found() -> (StatusCode, Json<Value>) {
    (StatusCode::NOT_FOUND, Json(json!({ "error": "Nicht gefunden" })))
}

fn bad_request(msg: &str) -> (StatusCode, Json<Value>) {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": msg })))
}

fn internal<E: std::fmt::Display>(e: E) -> (StatusCode, Json<Value>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": e.to_string() })),
    )
}
