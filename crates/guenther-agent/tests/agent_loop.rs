// End-to-end agent loop behaviour against a scripted provider backend:
// terminal answers, tool-call dispatch, media interception, iteration
// budget, and provider failure handling.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use guenther_agent::orchestrator::{AgentRunOptions, AgentRuntime, ChatBackend};
use guenther_core::config::{ProviderEntry, Settings};
use guenther_core::log::{collector, LogEvent};
use guenther_provider::{ChatCompletion, ProviderClient, ProviderError, ProviderTarget};
use guenther_store::{ImageBlobStore, TelegramUserMap};
use guenther_tools::{HandlerContext, ToolDescriptor, ToolHandler, ToolOrigin, ToolRegistry};

/// Backend that replays a fixed list of completions and records every
/// outbound message list.
struct ScriptedBackend {
    turns: Mutex<Vec<ChatCompletion>>,
    requests: Mutex<Vec<Vec<Value>>>,
    /// Number of tool schemas sent with each call (None = no tools field).
    tools_seen: Mutex<Vec<Option<usize>>>,
    /// (provider id, model) the loop resolved for each call.
    endpoints: Mutex<Vec<(String, String)>>,
}

impl ScriptedBackend {
    fn new(turns: Vec<ChatCompletion>) -> Arc<Self> {
        Arc::new(Self {
            turns: Mutex::new(turns),
            requests: Mutex::new(Vec::new()),
            tools_seen: Mutex::new(Vec::new()),
            endpoints: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn request(&self, n: usize) -> Vec<Value> {
        self.requests.lock().unwrap()[n].clone()
    }

    fn tools_at(&self, n: usize) -> Option<usize> {
        self.tools_seen.lock().unwrap()[n]
    }

    fn endpoint_at(&self, n: usize) -> (String, String) {
        self.endpoints.lock().unwrap()[n].clone()
    }
}

#[async_trait]
impl ChatBackend for ScriptedBackend {
    async fn chat(
        &self,
        target: &ProviderTarget,
        model: &str,
        messages: &[Value],
        tools: Option<&[Value]>,
        _temperature: f64,
        _timeout: Duration,
    ) -> Result<ChatCompletion, ProviderError> {
        self.requests.lock().unwrap().push(messages.to_vec());
        self.tools_seen.lock().unwrap().push(tools.map(|t| t.len()));
        self.endpoints
            .lock()
            .unwrap()
            .push((target.id.clone(), model.to_string()));
        let mut turns = self.turns.lock().unwrap();
        if turns.is_empty() {
            return Err(ProviderError::Api {
                status: 500,
                message: "script exhausted".to_string(),
            });
        }
        Ok(turns.remove(0))
    }
}

fn text_turn(content: &str) -> ChatCompletion {
    let raw = json!({
        "choices": [{ "message": { "role": "assistant", "content": content }, "finish_reason": "stop" }],
        "usage": { "prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15 }
    });
    guenther_provider::parse_chat_completion(raw)
}

fn tool_turn(id: &str, name: &str, arguments: &str) -> ChatCompletion {
    let raw = json!({
        "choices": [{
            "message": {
                "role": "assistant",
                "content": null,
                "tool_calls": [{
                    "id": id,
                    "type": "function",
                    "function": { "name": name, "arguments": arguments }
                }]
            },
            "finish_reason": "tool_calls"
        }]
    });
    guenther_provider::parse_chat_completion(raw)
}

struct StaticTool(Value);

#[async_trait]
impl ToolHandler for StaticTool {
    async fn call(
        &self,
        _args: Value,
        _ctx: &HandlerContext,
    ) -> guenther_tools::Result<Value> {
        Ok(self.0.clone())
    }
}

fn register_static_tool(registry: &ToolRegistry, name: &str, result: Value) {
    registry.register(ToolDescriptor::new(
        name,
        "Testwerkzeug",
        json!({"type": "object", "properties": {"timezone": {"type": "string"}}, "required": []}),
        Arc::new(StaticTool(result)),
        ToolOrigin::Builtin,
    ));
}

struct Harness {
    runtime: AgentRuntime,
    backend: Arc<ScriptedBackend>,
    settings: Settings,
    _dir: tempfile::TempDir,
}

fn harness(turns: Vec<ChatCompletion>, registry: ToolRegistry) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let backend = ScriptedBackend::new(turns);
    let runtime = AgentRuntime::new(
        Arc::new(registry),
        Arc::new(ProviderClient::new()),
        Arc::new(ImageBlobStore::new()),
        Arc::new(TelegramUserMap::new(dir.path())),
        dir.path().to_path_buf(),
    )
    .with_backend(backend.clone());

    let mut settings = Settings::default();
    settings
        .providers
        .get_mut("openrouter")
        .unwrap()
        .api_key = "sk-or-test".to_string();

    Harness {
        runtime,
        backend,
        settings,
        _dir: dir,
    }
}

#[tokio::test]
async fn pure_text_turn_returns_content() {
    let h = harness(vec![text_turn("Hi!")], ToolRegistry::new());
    let (log, _) = collector();

    let result = h
        .runtime
        .run_agent(
            &[json!({ "role": "user", "content": "Hallo" })],
            &h.settings,
            &log,
            AgentRunOptions::default(),
        )
        .await;

    assert_eq!(result, "Hi!");
    assert_eq!(h.backend.calls(), 1);
}

#[tokio::test]
async fn empty_completion_returns_empty_string() {
    let h = harness(vec![text_turn("")], ToolRegistry::new());
    let (log, _) = collector();

    let result = h
        .runtime
        .run_agent(
            &[json!({ "role": "user", "content": "…" })],
            &h.settings,
            &log,
            AgentRunOptions::default(),
        )
        .await;

    assert_eq!(result, "");
    assert_eq!(h.backend.calls(), 1);
}

#[tokio::test]
async fn first_request_prepends_system_prompt() {
    let h = harness(vec![text_turn("ok")], ToolRegistry::new());
    let (log, _) = collector();

    let history = vec![
        json!({ "role": "user", "content": "eins" }),
        json!({ "role": "assistant", "content": "zwei ![b](data:image/png;base64,AAAAAAAAAAAAAAAAAAAAAA)" }),
        json!({ "role": "user", "content": "drei" }),
    ];
    h.runtime
        .run_agent(&history, &h.settings, &log, AgentRunOptions::default())
        .await;

    let sent = h.backend.request(0);
    // N inbound messages + 1 prepended system prompt.
    assert_eq!(sent.len(), history.len() + 1);
    assert_eq!(sent[0]["role"], "system");
    // Assistant history must carry no data: URIs.
    for msg in &sent {
        if msg["role"] == "assistant" {
            assert!(!msg["content"].as_str().unwrap().contains("data:"));
        }
    }
}

#[tokio::test]
async fn single_tool_call_round_trip() {
    let registry = ToolRegistry::new();
    register_static_tool(
        &registry,
        "get_current_time",
        json!({ "time": "2024-01-01 12:00:00", "timezone": "UTC" }),
    );

    let h = harness(
        vec![
            tool_turn("a", "get_current_time", r#"{"timezone":"UTC"}"#),
            text_turn("Es ist 12:00 UTC."),
        ],
        registry,
    );
    let (log, _) = collector();

    let result = h
        .runtime
        .run_agent(
            &[json!({ "role": "user", "content": "Wie spät ist es in UTC?" })],
            &h.settings,
            &log,
            AgentRunOptions::default(),
        )
        .await;

    assert_eq!(result, "Es ist 12:00 UTC.");
    assert_eq!(h.backend.calls(), 2);

    // Second request must contain the tool response bound to call id "a".
    let second = h.backend.request(1);
    let tool_msg = second
        .iter()
        .find(|m| m["role"] == "tool")
        .expect("tool message present");
    assert_eq!(tool_msg["tool_call_id"], "a");
    let content: Value = serde_json::from_str(tool_msg["content"].as_str().unwrap()).unwrap();
    assert_eq!(content["time"], "2024-01-01 12:00:00");
}

#[tokio::test]
async fn media_interception_sanitizes_and_appends() {
    let registry = ToolRegistry::new();
    register_static_tool(
        &registry,
        "generate_image",
        json!({
            "image_base64": "QUJDRA==",
            "mime_type": "image/png",
            "width": 512,
            "height": 512
        }),
    );

    let h = harness(
        vec![
            tool_turn("img1", "generate_image", r#"{"prompt":"eine Katze"}"#),
            text_turn("Bitteschön!"),
        ],
        registry,
    );
    let (log, _) = collector();

    let result = h
        .runtime
        .run_agent(
            &[json!({ "role": "user", "content": "Mal mir eine Katze" })],
            &h.settings,
            &log,
            AgentRunOptions::default(),
        )
        .await;

    assert_eq!(
        result,
        "Bitteschön!\n\n![Generiertes Bild](data:image/png;base64,QUJDRA==)"
    );

    // The provider never sees the blob, only the summary with dimensions.
    let second = h.backend.request(1);
    let tool_msg = second.iter().find(|m| m["role"] == "tool").unwrap();
    let content: Value = serde_json::from_str(tool_msg["content"].as_str().unwrap()).unwrap();
    assert_eq!(content["success"], true);
    assert_eq!(content["message"], "Bild wurde erfolgreich erstellt");
    assert_eq!(content["width"], 512);
    assert!(content.get("image_base64").is_none());
}

#[tokio::test]
async fn unknown_tool_reports_error_and_continues() {
    let h = harness(
        vec![
            tool_turn("x", "does_not_exist", "{}"),
            text_turn("Konnte das Tool nicht finden."),
        ],
        ToolRegistry::new(),
    );
    let (log, _) = collector();

    let result = h
        .runtime
        .run_agent(
            &[json!({ "role": "user", "content": "nutze das Tool" })],
            &h.settings,
            &log,
            AgentRunOptions::default(),
        )
        .await;

    assert_eq!(result, "Konnte das Tool nicht finden.");
    let second = h.backend.request(1);
    let tool_msg = second.iter().find(|m| m["role"] == "tool").unwrap();
    assert!(tool_msg["content"]
        .as_str()
        .unwrap()
        .contains("Tool 'does_not_exist' nicht gefunden"));
}

#[tokio::test]
async fn iteration_budget_exhaustion_returns_sentinel() {
    let registry = ToolRegistry::new();
    register_static_tool(&registry, "roll_dice", json!({ "rolls": [4], "total": 4 }));

    let turns: Vec<ChatCompletion> = (0..10)
        .map(|_| tool_turn("r", "roll_dice", "{}"))
        .collect();
    let h = harness(turns, registry);
    let (log, _) = collector();

    let result = h
        .runtime
        .run_agent(
            &[json!({ "role": "user", "content": "würfle ewig" })],
            &h.settings,
            &log,
            AgentRunOptions::default(),
        )
        .await;

    assert_eq!(result, "Maximale Iterationen erreicht. Bitte versuche es erneut.");
    // Exactly MAX_ITER provider calls, then the budget stops the loop.
    assert_eq!(h.backend.calls(), 10);
    assert!(!result.contains("data:"));
}

#[tokio::test]
async fn router_filters_tools_for_the_main_loop() {
    let registry = ToolRegistry::new();
    for name in ["tool_a", "tool_b", "tool_c", "tool_d"] {
        register_static_tool(&registry, name, json!({ "ok": true }));
    }

    // First backend call is the router (more than 3 tools registered).
    let h = harness(
        vec![text_turn(r#"["tool_a"]"#), text_turn("fertig")],
        registry,
    );
    let (log, _) = collector();

    let result = h
        .runtime
        .run_agent(
            &[json!({ "role": "user", "content": "nutze tool_a" })],
            &h.settings,
            &log,
            AgentRunOptions::default(),
        )
        .await;

    assert_eq!(result, "fertig");
    assert_eq!(h.backend.calls(), 2);
    // The router call itself carries no tool schemas; the main loop sees
    // exactly the filtered subset.
    assert_eq!(h.backend.tools_at(0), None);
    assert_eq!(h.backend.tools_at(1), Some(1));
}

#[tokio::test]
async fn tool_settings_override_selects_provider_and_model() {
    // The real built-in descriptors: generate_image and text_to_speech
    // carry provider/model settings and must vote in the override.
    let registry = ToolRegistry::new();
    guenther_tools::builtin::register_builtin_tools(&registry);

    let mut h = harness(
        vec![
            // Router pre-filter, then the terminal answer.
            text_turn(r#"["generate_image", "text_to_speech"]"#),
            text_turn("erledigt"),
        ],
        registry,
    );

    h.settings.providers.insert(
        "p1".to_string(),
        ProviderEntry {
            name: "Provider Eins".to_string(),
            base_url: "https://p1.example/v1".to_string(),
            api_key: "sk-p1".to_string(),
            enabled: true,
        },
    );
    for name in ["generate_image", "text_to_speech"] {
        h.settings.tool_settings.insert(
            name.to_string(),
            [
                ("provider".to_string(), "p1".to_string()),
                ("model".to_string(), "m1".to_string()),
            ]
            .into(),
        );
    }

    let (log, _) = collector();
    let result = h
        .runtime
        .run_agent(
            &[json!({ "role": "user", "content": "mal ein Bild und lies es vor" })],
            &h.settings,
            &log,
            AgentRunOptions::default(),
        )
        .await;

    assert_eq!(result, "erledigt");
    assert_eq!(h.backend.calls(), 2);

    // The router call still runs against the defaults.
    let (router_provider, router_model) = h.backend.endpoint_at(0);
    assert_eq!(router_provider, "openrouter");
    assert_eq!(router_model, h.settings.model);

    // The filtered tools agree on (p1, m1) — that pair becomes effective,
    // and the loop sees exactly the two selected tools.
    let (provider, model) = h.backend.endpoint_at(1);
    assert_eq!(provider, "p1");
    assert_eq!(model, "m1");
    assert_eq!(h.backend.tools_at(1), Some(2));
}

#[tokio::test]
async fn router_garbage_falls_back_to_all_tools() {
    let registry = ToolRegistry::new();
    for name in ["tool_a", "tool_b", "tool_c", "tool_d"] {
        register_static_tool(&registry, name, json!({ "ok": true }));
    }

    // Router names only unknown tools: the safety net keeps everything.
    let h = harness(
        vec![text_turn(r#"["does_not_exist"]"#), text_turn("ok")],
        registry,
    );
    let (log, _) = collector();

    h.runtime
        .run_agent(
            &[json!({ "role": "user", "content": "hallo" })],
            &h.settings,
            &log,
            AgentRunOptions::default(),
        )
        .await;

    assert_eq!(h.backend.tools_at(1), Some(4));
}

#[tokio::test]
async fn provider_error_becomes_error_string() {
    let h = harness(Vec::new(), ToolRegistry::new());
    let (log, events) = collector();

    let result = h
        .runtime
        .run_agent(
            &[json!({ "role": "user", "content": "Hallo" })],
            &h.settings,
            &log,
            AgentRunOptions::default(),
        )
        .await;

    assert!(result.starts_with("Fehler bei LLM-Anfrage:"));
    assert!(result.contains("script exhausted"));

    // The terminal trailer is emitted even on the error path.
    let recorded = events.lock().unwrap();
    assert!(recorded
        .iter()
        .any(|e| *e == LogEvent::header("GUENTHER AGENT BEENDET")));
}

#[tokio::test]
async fn missing_api_key_is_a_config_error_turn() {
    let mut h = harness(vec![text_turn("nie erreicht")], ToolRegistry::new());
    h.settings
        .providers
        .get_mut("openrouter")
        .unwrap()
        .api_key = String::new();
    let (log, _) = collector();

    let result = h
        .runtime
        .run_agent(
            &[json!({ "role": "user", "content": "Hallo" })],
            &h.settings,
            &log,
            AgentRunOptions::default(),
        )
        .await;

    assert_eq!(
        result,
        "Fehler: Kein OpenRouter API-Key konfiguriert. Bitte in den Einstellungen hinterlegen."
    );
    assert_eq!(h.backend.calls(), 0);
}
