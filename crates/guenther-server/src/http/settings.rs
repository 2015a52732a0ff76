//! Settings endpoints. Reads return a masked view (API keys are replaced by
//! a placeholder); writes merge the incoming document over the stored one so
//! the masked placeholder never overwrites a real key.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};

use guenther_core::config::Settings;

use crate::app::AppState;

const KEY_MASK: &str = "***";

pub async fn get_settings(State(state): State<Arc<AppState>>) -> Json<Value> {
    let settings = state.settings.load();
    Json(masked_view(&settings))
}

pub async fn update_settings(
    State(state): State<Arc<AppState>>,
    Json(incoming): Json<Settings>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let stored = state.settings.load();
    let merged = merge_keys(incoming, &stored);
    state.settings.save(&merged).map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        )
    })?;
    Ok(Json(json!({ "success": true })))
}

pub async fn usage_log(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let rows = state.chats.usage_log(200).map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        )
    })?;
    Ok(Json(json!(rows)))
}

/// Settings as JSON with every non-empty API key replaced by the mask.
fn masked_view(settings: &Settings) -> Value {
    let mut view = serde_json::to_value(settings).unwrap_or(Value::Null);

    if let Some(providers) = view.get_mut("providers").and_then(Value::as_object_mut) {
        for entry in providers.values_mut() {
            mask_field(entry, "api_key");
        }
    }
    if let Some(obj) = view.as_object_mut() {
        for key in ["openai_api_key", "openrouter_api_key"] {
            if obj.get(key).and_then(Value::as_str).map(|s| !s.is_empty()) == Some(true) {
                obj.insert(key.to_string(), json!(KEY_MASK));
            }
        }
        if let Some(telegram) = obj.get_mut("telegram") {
            mask_field(telegram, "bot_token");
        }
    }
    view
}

fn mask_field(value: &mut Value, field: &str) {
    if let Some(obj) = value.as_object_mut() {
        if obj.get(field).and_then(Value::as_str).map(|s| !s.is_empty()) == Some(true) {
            obj.insert(field.to_string(), json!(KEY_MASK));
        }
    }
}

/// Keep stored secrets wherever the incoming document carries the mask or
/// an empty string.
fn merge_keys(mut incoming: Settings, stored: &Settings) -> Settings {
    for (id, entry) in incoming.providers.iter_mut() {
        if entry.api_key.is_empty() || entry.api_key == KEY_MASK {
            if let Some(old) = stored.providers.get(id) {
                entry.api_key = old.api_key.clone();
            } else {
                entry.api_key = String::new();
            }
        }
    }
    if incoming.openai_api_key.is_empty() || incoming.openai_api_key == KEY_MASK {
        incoming.openai_api_key = stored.openai_api_key.clone();
    }
    if incoming.openrouter_api_key.is_empty() || incoming.openrouter_api_key == KEY_MASK {
        incoming.openrouter_api_key = stored.openrouter_api_key.clone();
    }
    if incoming.telegram.bot_token.is_empty() || incoming.telegram.bot_token == KEY_MASK {
        incoming.telegram.bot_token = stored.telegram.bot_token.clone();
    }
    incoming
}
