use std::sync::Arc;

use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::app::AppState;

pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "tools": state.agent.registry().len(),
    }))
}

/// Wall clock + UTC for the scheduler UI (all schedules are authoritative UTC).
pub async fn time_handler() -> Json<Value> {
    Json(json!({
        "server_time": chrono::Local::now().to_rfc3339(),
        "utc_time": chrono::Utc::now().to_rfc3339(),
    }))
}
