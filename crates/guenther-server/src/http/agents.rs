use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};

use guenther_core::agents::AgentProfile;

use crate::app::AppState;

#[derive(serde::Deserialize)]
pub struct AgentRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default)]
    pub provider_id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

pub async fn list_agents(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!(state.agents.list()))
}

pub async fn create_agent(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AgentRequest>,
) -> Result<(StatusCode, Json<Value>), (StatusCode, Json<Value>)> {
    if req.name.trim().is_empty() {
        return Err(bad_request("Name ist erforderlich"));
    }
    let mut profile = AgentProfile::new(req.name.trim());
    profile.description = req.description;
    profile.system_prompt = req.system_prompt;
    profile.provider_id = req.provider_id.filter(|p| !p.is_empty());
    profile.model = req.model.filter(|m| !m.is_empty());

    state.agents.save(&profile).map_err(internal)?;
    Ok((StatusCode::CREATED, Json(json!(profile))))
}

pub async fn update_agent(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<AgentRequest>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let mut profile = state.agents.get(&id).ok_or_else(not_found)?;
    profile.name = req.name;
    profile.description = req.description;
    profile.system_prompt = req.system_prompt;
    profile.provider_id = req.provider_id.filter(|p| !p.is_empty());
    profile.model = req.model.filter(|m| !m.is_empty());

    state.agents.save(&profile).map_err(internal)?;
    Ok(Json(json!(profile)))
}

pub async fn delete_agent(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    state.agents.delete(&id).map_err(internal)?;
    Ok(Json(json!({ "success": true })))
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
