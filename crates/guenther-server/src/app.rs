use std::sync::Arc;

use axum::{
    routing::{get, post, put},
    Router,
};
use dashmap::DashMap;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use guenther_agent::AgentRuntime;
use guenther_core::agents::AgentStore;
use guenther_core::config::{ServerConfig, SettingsStore};
use guenther_core::log::{EventSink, LogSink, TerminalLog};
use guenther_core::webhooks::WebhookStore;
use guenther_scheduler::{AutopromptStore, SchedulerHandle};
use guenther_store::{ChatStore, FileStore};
use guenther_tools::external::ExternalToolManager;

/// Central shared state — passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub config: ServerConfig,
    pub settings: SettingsStore,
    pub agents: AgentStore,
    pub webhooks: WebhookStore,
    pub autoprompts: AutopromptStore,
    pub chats: Arc<ChatStore>,
    pub files: Arc<FileStore>,
    pub agent: Arc<AgentRuntime>,
    pub terminal: Arc<TerminalLog>,
    pub external: Arc<ExternalToolManager>,
    pub scheduler: SchedulerHandle,
    /// Active WS connections: conn_id → frame sender.
    pub ws_clients: DashMap<String, mpsc::Sender<String>>,
}

impl AppState {
    /// Log sink bound to the terminal bus; WS clients additionally receive
    /// every event as a `guenther_log` frame (see `broadcast_event`).
    pub fn log_sink(self: &Arc<Self>) -> LogSink {
        let state = Arc::clone(self);
        Arc::new(move |event| {
            state.terminal.emit(event.clone());
            state.broadcast_event(
                "guenther_log",
                serde_json::to_value(&event).unwrap_or(Value::Null),
            );
        })
    }

    /// Named-event sink for background components (gateway, runner).
    pub fn event_sink(self: &Arc<Self>) -> EventSink {
        let state = Arc::clone(self);
        Arc::new(move |event, data| state.broadcast_event(event, data))
    }

    /// Fan one `{event, data}` frame out to every connected WS client.
    /// Slow consumers drop frames rather than stalling the sender.
    pub fn broadcast_event(&self, event: &str, data: Value) {
        let frame = json!({ "event": event, "data": data }).to_string();
        for entry in self.ws_clients.iter() {
            let _ = entry.value().try_send(frame.clone());
        }
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route("/api/time", get(crate::http::health::time_handler))
        .route("/ws", get(crate::ws::ws_handler))
        // Chats
        .route(
            "/api/chats",
            get(crate::http::chats::list_chats).post(crate::http::chats::create_chat),
        )
        .route(
            "/api/chats/{id}",
            get(crate::http::chats::get_chat).delete(crate::http::chats::delete_chat),
        )
        .route(
            "/api/chats/{id}/files/{name}",
            get(crate::http::chats::get_chat_file),
        )
        // Settings + usage
        .route(
            "/api/settings",
            get(crate::http::settings::get_settings).put(crate::http::settings::update_settings),
        )
        .route("/api/usage", get(crate::http::settings::usage_log))
        // Tools
        .route("/api/tools", get(crate::http::tools::list_tools))
        .route("/api/tools/reload", post(crate::http::tools::reload_external))
        .route(
            "/api/tools/{name}/settings",
            get(crate::http::tools::get_tool_settings).put(crate::http::tools::update_tool_settings),
        )
        .route(
            "/api/custom-tools/{name}/export",
            get(crate::http::tools::export_custom_tool),
        )
        .route(
            "/api/custom-tools/import",
            post(crate::http::tools::import_custom_tool),
        )
        // Agent profiles
        .route(
            "/api/agents",
            get(crate::http::agents::list_agents).post(crate::http::agents::create_agent),
        )
        .route(
            "/api/agents/{id}",
            put(crate::http::agents::update_agent).delete(crate::http::agents::delete_agent),
        )
        // Autoprompts
        .route(
            "/api/autoprompts",
            get(crate::http::autoprompts::list_autoprompts)
                .post(crate::http::autoprompts::create_autoprompt),
        )
        .route(
            "/api/autoprompts/{id}",
            put(crate::http::autoprompts::update_autoprompt)
                .delete(crate::http::autoprompts::delete_autoprompt),
        )
        .route(
            "/api/autoprompts/{id}/run",
            post(crate::http::autoprompts::run_now),
        )
        .route(
            "/api/autoprompts/export",
            get(crate::http::autoprompts::export_autoprompts),
        )
        .route(
            "/api/autoprompts/import",
            post(crate::http::autoprompts::import_autoprompts),
        )
        // Webhooks
        .route(
            "/api/webhooks",
            get(crate::http::webhooks::list_webhooks).post(crate::http::webhooks::create_webhook),
        )
        .route(
            "/api/webhooks/{id}",
            put(crate::http::webhooks::update_webhook)
                .delete(crate::http::webhooks::delete_webhook),
        )
        .route("/webhook/{id}", post(crate::http::webhooks::trigger_webhook))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(tower_http::cors::CorsLayer::permissive())
}
