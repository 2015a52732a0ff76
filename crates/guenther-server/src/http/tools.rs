use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};

use guenther_core::config::ToolSettings;
use guenther_core::log::{collector, LogEvent};
use guenther_tools::builder::sanitize_name;
use guenther_tools::custom::{
    custom_tools_dir, read_manifest, register_custom_dir, ToolManifest, MANIFEST_FILE, RUNNER_FILE,
    RUNNER_PY, TOOL_FILE,
};
use guenther_tools::ToolOrigin;

use crate::app::AppState;

pub async fn list_tools(State(state): State<Arc<AppState>>) -> Json<Value> {
    let settings = state.settings.load();
    let tools: Vec<Value> = state
        .agent
        .registry()
        .list()
        .into_iter()
        .map(|t| {
            let ts = settings.tool_settings(&t.name);
            json!({
                "name": t.name,
                "description": t.description,
                "server_id": match &t.origin {
                    ToolOrigin::External(id) => json!(id),
                    _ => Value::Null,
                },
                "builtin": t.origin == ToolOrigin::Builtin,
                "custom": t.origin == ToolOrigin::Custom,
                "has_settings": !t.settings_schema.is_empty(),
                "settings_schema": t.settings_schema,
                "settings_info": t.settings_info.unwrap_or_default(),
                "agent_overridable": t.agent_overridable,
                "current_provider": ts.get("provider").cloned().unwrap_or_default(),
                "current_model": ts.get("model").cloned().unwrap_or_default(),
            })
        })
        .collect();
    Json(json!(tools))
}

pub async fn get_tool_settings(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let tool = state
        .agent
        .registry()
        .get(&name)
        .ok_or_else(tool_not_found)?;
    Ok(Json(json!({
        "name": name,
        "schema": tool.settings_schema,
        "values": state.settings.tool_settings(&name),
    })))
}

pub async fn update_tool_settings(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(values): Json<ToolSettings>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    state
        .agent
        .registry()
        .get(&name)
        .ok_or_else(tool_not_found)?;
    state
        .settings
        .save_tool_settings(&name, values)
        .map_err(internal)?;
    Ok(Json(json!({ "success": true })))
}

/// Tear down and reconnect all external tool servers. The connection log is
/// returned for the settings UI.
pub async fn reload_external(State(state): State<Arc<AppState>>) -> Json<Value> {
    let servers = state.settings.load().mcp_servers;
    let (sink, events) = collector();
    let count = state
        .external
        .reload(state.agent.registry(), &servers, &sink)
        .await;

    let logs: Vec<String> = events
        .lock()
        .unwrap()
        .iter()
        .filter_map(|e| match e {
            LogEvent::Text { message } => Some(message.clone()),
            LogEvent::Header { message } => Some(message.clone()),
            LogEvent::Json { .. } => None,
        })
        .collect();
    Json(json!({ "success": true, "count": count, "logs": logs }))
}

/// Export a custom tool directory (manifest + code) for transfer to another
/// instance.
pub async fn export_custom_tool(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let name = sanitize_name(&name);
    let dir = custom_tools_dir(&state.config.data_dir()).join(&name);
    let manifest = read_manifest(&dir).map_err(|_| tool_not_found())?;
    let code = std::fs::read_to_string(dir.join(TOOL_FILE)).map_err(|_| tool_not_found())?;
    Ok(Json(json!({
        "name": name,
        "manifest": manifest,
        "code": code,
    })))
}

#[derive(serde::Deserialize)]
pub struct ImportRequest {
    pub name: String,
    pub manifest: ToolManifest,
    pub code: String,
}

/// Import a previously exported custom tool and hot-register it.
pub async fn import_custom_tool(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ImportRequest>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let name = sanitize_name(&req.name);
    if name.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Name ist erforderlich" })),
        ));
    }

    let dir = custom_tools_dir(&state.config.data_dir()).join(&name);
    std::fs::create_dir_all(&dir).map_err(internal)?;
    std::fs::write(dir.join(TOOL_FILE), &req.code).map_err(internal)?;
    std::fs::write(dir.join(RUNNER_FILE), RUNNER_PY).map_err(internal)?;
    let manifest_json = serde_json::to_string_pretty(&req.manifest).map_err(internal)?;
    std::fs::write(dir.join(MANIFEST_FILE), manifest_json).map_err(internal)?;

    let registered = register_custom_dir(state.agent.registry(), &dir).map_err(|e| {
        let _ = std::fs::remove_dir_all(&dir);
        internal(e)
    })?;
    Ok(Json(json!({ "success": true, "registered_tools": registered })))
}

fn tool_not_found() -> (StatusCode, Json<Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": "Tool nicht gefunden" })),
    )
}

fn internal<E: std::fmt::Display>(e: E) -> (StatusCode, Json<Value>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": e.to_string() })),
    )
}
