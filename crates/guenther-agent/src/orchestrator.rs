//! The agent loop: send messages to the LLM, execute requested tool calls,
//! iterate until the model produces a terminal answer. Every step is
//! streamed to the Guenther terminal.

use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Map, Value};
use tracing::warn;

use guenther_core::config::Settings;
use guenther_core::log::{ts, LogEvent, LogSink};
use guenther_provider::{ChatCompletion, ProviderClient, ProviderError, ProviderTarget};
use guenther_store::{ImageBlobStore, TelegramUserMap};
use guenther_tools::{HandlerContext, ToolRegistry};

use crate::router;

const MAX_ITERATIONS: usize = 10;

pub const SYSTEM_PROMPT: &str = "Du bist Guenther, ein hilfreicher KI-Assistent mit Zugang zu verschiedenen Werkzeugen (MCP Tools).

Wenn der Benutzer eine Aufgabe stellt, die Werkzeuge erfordert:
1. Analysiere, welche Werkzeuge du benoetigen wirst
2. Erstelle einen kurzen Plan und teile ihn dem Benutzer mit
3. Fuehre die Werkzeuge Schritt fuer Schritt aus
4. Fasse das Ergebnis zusammen

Wenn mehrere Werkzeuge nacheinander noetig sind (z.B. erst die Uhrzeit holen, dann als Bild darstellen), rufe sie in der richtigen Reihenfolge auf.

Antworte auf Deutsch, es sei denn, der Benutzer schreibt in einer anderen Sprache.
Sei praezise und hilfreich.";

/// Result mapping keys that carry media blobs. They are intercepted before
/// the tool response goes back to the provider.
const RESERVED_MEDIA_KEYS: &[&str] = &[
    "image_base64",
    "audio_base64",
    "pptx_base64",
    "html_content",
    "pdf_html",
    "local_file_path",
];

/// Chat-completion seam between the loop and the provider client, so tests
/// can script provider turns.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn chat(
        &self,
        target: &ProviderTarget,
        model: &str,
        messages: &[Value],
        tools: Option<&[Value]>,
        temperature: f64,
        timeout: Duration,
    ) -> Result<ChatCompletion, ProviderError>;
}

#[async_trait]
impl ChatBackend for ProviderClient {
    async fn chat(
        &self,
        target: &ProviderTarget,
        model: &str,
        messages: &[Value],
        tools: Option<&[Value]>,
        temperature: f64,
        timeout: Duration,
    ) -> Result<ChatCompletion, ProviderError> {
        ProviderClient::chat(self, target, model, messages, tools, temperature, timeout).await
    }
}

/// Per-run overrides (agent profile, chat binding).
#[derive(Debug, Clone, Default)]
pub struct AgentRunOptions {
    pub system_prompt: Option<String>,
    pub agent_provider_id: Option<String>,
    pub agent_model: Option<String>,
    pub chat_id: Option<i64>,
}

/// Long-lived agent runtime: registry plus everything handlers need.
/// Shared across all surfaces via `Arc`.
pub struct AgentRuntime {
    registry: Arc<ToolRegistry>,
    llm: Arc<ProviderClient>,
    backend: Arc<dyn ChatBackend>,
    blobs: Arc<ImageBlobStore>,
    tg_users: Arc<TelegramUserMap>,
    data_dir: PathBuf,
    http: reqwest::Client,
}

impl AgentRuntime {
    pub fn new(
        registry: Arc<ToolRegistry>,
        llm: Arc<ProviderClient>,
        blobs: Arc<ImageBlobStore>,
        tg_users: Arc<TelegramUserMap>,
        data_dir: PathBuf,
    ) -> Self {
        let backend: Arc<dyn ChatBackend> = llm.clone();
        Self {
            registry,
            llm,
            backend,
            blobs,
            tg_users,
            data_dir,
            http: reqwest::Client::new(),
        }
    }

    /// Swap the chat backend (test harness).
    pub fn with_backend(mut self, backend: Arc<dyn ChatBackend>) -> Self {
        self.backend = backend;
        self
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn blobs(&self) -> &Arc<ImageBlobStore> {
        &self.blobs
    }

    pub fn tg_users(&self) -> &Arc<TelegramUserMap> {
        &self.tg_users
    }

    pub fn provider_client(&self) -> &Arc<ProviderClient> {
        &self.llm
    }

    fn handler_context(&self, settings: &Settings, log: &LogSink, chat_id: Option<i64>) -> HandlerContext {
        HandlerContext {
            settings: settings.clone(),
            log: Arc::clone(log),
            chat_id,
            blobs: Arc::clone(&self.blobs),
            tg_users: Arc::clone(&self.tg_users),
            data_dir: self.data_dir.clone(),
            llm: Arc::clone(&self.llm),
            registry: Arc::clone(&self.registry),
            http: self.http.clone(),
        }
    }

    /// Run the agent loop and return the terminal assistant string with
    /// embedded media markers. Never returns an error: failures become the
    /// assistant text.
    pub async fn run_agent(
        &self,
        chat_messages: &[Value],
        settings: &Settings,
        log: &LogSink,
        opts: AgentRunOptions,
    ) -> String {
        let finish = |content: String| {
            log(LogEvent::header("GUENTHER AGENT BEENDET"));
            content
        };

        // Resolve provider defaults.
        let provider_id = settings.default_provider.clone();
        let provider_entry = settings.default_provider_entry();
        let mut target = ProviderTarget::from_entry(&provider_id, &provider_entry);
        if target.api_key.is_empty() {
            target.api_key = settings.openrouter_api_key.clone();
        }

        let mut model = settings.model.clone();
        let temperature = settings.temperature;
        let llm_timeout = Duration::from_secs(settings.llm_timeout);

        log(LogEvent::header("GUENTHER AGENT GESTARTET"));
        log(LogEvent::text(format!(
            "[{}] Modell: {model} | Temperatur: {temperature}",
            ts()
        )));

        if target.api_key.is_empty() && provider_id == "openrouter" {
            return finish(
                "Fehler: Kein OpenRouter API-Key konfiguriert. Bitte in den Einstellungen hinterlegen."
                    .to_string(),
            );
        }

        // Build the outbound message list: system prompt first, history with
        // embedded data-URIs stripped from assistant strings.
        let active_prompt = opts
            .system_prompt
            .clone()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| SYSTEM_PROMPT.to_string());
        let mut messages: Vec<Value> = vec![json!({ "role": "system", "content": active_prompt })];
        for msg in chat_messages {
            messages.push(strip_history_media(msg));
        }

        let all_tools = self.registry.model_schemas();

        log(LogEvent::header("SYSTEM PROMPT"));
        log(LogEvent::text(active_prompt.clone()));

        log(LogEvent::header(format!("ALLE TOOLS ({})", all_tools.len())));
        log(LogEvent::json("all_tools", json!(all_tools)));
        log(LogEvent::text(format!(
            "[{}] LLM Timeout: {}s",
            ts(),
            settings.llm_timeout
        )));

        // Pre-filter via the tool router.
        let tools = router::select_tools(
            &all_tools,
            chat_messages,
            self.backend.as_ref(),
            &target,
            &model,
            log,
            llm_timeout,
        )
        .await;

        // Provider/model override: agent profile first, then the
        // tool-settings consensus over the filtered tools.
        if let (Some(agent_provider), Some(agent_model)) =
            (opts.agent_provider_id.as_deref(), opts.agent_model.as_deref())
        {
            if let Some(entry) = settings.provider(agent_provider) {
                let new_target = ProviderTarget::from_entry(agent_provider, entry);
                log(LogEvent::text(format!(
                    "[{}] Agent-Override aktiv: Provider={} Modell={agent_model}",
                    ts(),
                    entry.name
                )));
                target = new_target;
                model = agent_model.to_string();
            }
        } else if let Some((override_target, override_model)) =
            pick_override_for_tools(&tools, settings, &self.registry)
        {
            if override_model != model || override_target.base_url != target.base_url {
                log(LogEvent::text(format!(
                    "[{}] Override aktiv: Provider={} Modell={override_model}",
                    ts(),
                    override_target.name
                )));
                if !override_target.api_key.is_empty() {
                    target = override_target;
                }
                model = override_model;
            }
        }

        log(LogEvent::header(format!(
            "AKTIVE TOOLS FUER DIESEN REQUEST ({})",
            tools.len()
        )));
        log(LogEvent::json("filtered_tools", json!(tools)));

        log(LogEvent::header(format!(
            "CHAT NACHRICHTEN ({} Nachrichten)",
            chat_messages.len()
        )));
        for msg in chat_messages {
            log(LogEvent::text(display_message(msg)));
        }

        let ctx = self.handler_context(settings, log, opts.chat_id);
        let mut collected = CollectedMedia::default();

        for iteration in 1..=MAX_ITERATIONS {
            log(LogEvent::header(format!("ITERATION {iteration}")));
            log(LogEvent::text(format!(
                "[{}] Sende Anfrage an {}...",
                ts(),
                target.name
            )));

            let mut request_payload = json!({
                "model": model,
                "messages": sanitize_messages_for_log(&messages),
            });
            if !tools.is_empty() {
                request_payload["tools"] = json!(tools);
                request_payload["tool_choice"] = json!("auto");
            }
            log(LogEvent::header("API REQUEST"));
            log(LogEvent::text(format!("POST {}/chat/completions", target.base_url)));
            log(LogEvent::json("payload", request_payload));

            let tools_opt = if tools.is_empty() { None } else { Some(tools.as_slice()) };
            let completion = match self
                .backend
                .chat(&target, &model, &messages, tools_opt, temperature, llm_timeout)
                .await
            {
                Ok(c) => c,
                Err(e) => {
                    let error_msg = format!("Fehler bei LLM-Anfrage: {e}");
                    log(LogEvent::text(format!("[{}] FEHLER: {error_msg}", ts())));
                    return finish(error_msg);
                }
            };

            log(LogEvent::header("API RESPONSE"));
            log(LogEvent::json("response", completion.raw.clone()));

            if let Some(usage) = completion.usage {
                log(LogEvent::text(format!(
                    "[{}] Tokens: prompt={} completion={} total={}",
                    ts(),
                    usage.prompt_tokens,
                    usage.completion_tokens,
                    usage.total_tokens
                )));
            }

            if completion.tool_calls.is_empty() {
                // Terminal answer.
                let mut content = completion.content.clone();

                log(LogEvent::header("FINALE ANTWORT"));
                log(LogEvent::text(content.clone()));

                collected.append_markers(&mut content);
                return finish(content);
            }

            log(LogEvent::text(format!(
                "[{}] LLM moechte {} Tool(s) aufrufen",
                ts(),
                completion.tool_calls.len()
            )));

            if !completion.content.is_empty() {
                log(LogEvent::header("LLM PLAN"));
                log(LogEvent::text(completion.content.clone()));
            }

            // Append the assistant message exactly as the provider sent it.
            let assistant_message = completion
                .raw
                .pointer("/choices/0/message")
                .cloned()
                .unwrap_or_else(|| json!({ "role": "assistant", "content": completion.content }));
            messages.push(assistant_message);

            // Execute every call in provider order, one tool message each.
            for call in &completion.tool_calls {
                let args: Value = match serde_json::from_str(&call.arguments) {
                    Ok(v) => v,
                    Err(e) => {
                        warn!(tool = %call.name, error = %e, "tool arguments unparseable, using {{}}");
                        log(LogEvent::text(format!(
                            "[{}] Warnung: Argumente nicht parsebar, verwende {{}}",
                            ts()
                        )));
                        json!({})
                    }
                };

                log(LogEvent::header(format!("TOOL CALL: {}", call.name)));
                log(LogEvent::json("arguments", args.clone()));

                let result_value = match self.registry.get(&call.name) {
                    Some(descriptor) => {
                        log(LogEvent::text(format!("[{}] Fuehre aus...", ts())));
                        match descriptor.handler.call(args, &ctx).await {
                            Ok(result) => {
                                let sanitized =
                                    collected.intercept(&call.name, result, log);
                                log(LogEvent::header(format!("TOOL RESULT: {}", call.name)));
                                log(LogEvent::json("result", sanitized.clone()));
                                sanitized
                            }
                            Err(e) => {
                                log(LogEvent::text(format!("[{}] FEHLER: {e}", ts())));
                                json!({ "error": e.to_string() })
                            }
                        }
                    }
                    None => {
                        log(LogEvent::text(format!(
                            "[{}] Tool nicht gefunden: {}",
                            ts(),
                            call.name
                        )));
                        json!({ "error": format!("Tool '{}' nicht gefunden", call.name) })
                    }
                };

                let content = serde_json::to_string(&result_value).unwrap_or_else(|e| {
                    json!({ "error": format!("Ergebnis nicht serialisierbar: {e}") }).to_string()
                });
                let tool_msg = json!({
                    "role": "tool",
                    "tool_call_id": call.id,
                    "content": content,
                });
                messages.push(tool_msg.clone());
                log(LogEvent::header("TOOL RESPONSE -> LLM"));
                log(LogEvent::json("tool_message", tool_msg));
            }
        }

        log(LogEvent::text(format!(
            "[{}] WARNUNG: Maximale Iterationen erreicht!",
            ts()
        )));
        finish("Maximale Iterationen erreicht. Bitte versuche es erneut.".to_string())
    }
}

/// Media collected over a turn, appended as markers after the terminal
/// answer.
#[derive(Default)]
struct CollectedMedia {
    images: Vec<Map<String, Value>>,
    audio: Vec<Map<String, Value>>,
    html: Vec<Map<String, Value>>,
    pptx: Vec<Map<String, Value>>,
    local_files: Vec<String>,
}

impl CollectedMedia {
    /// Pull media blobs out of a tool result. Returns the sanitized mapping
    /// sent back to the provider: blob keys removed, a summary field added,
    /// data fields preserved so the model still sees what it needs.
    fn intercept(&mut self, tool_name: &str, result: Value, log: &LogSink) -> Value {
        let Value::Object(map) = result else {
            return result;
        };

        let mut sanitized: Map<String, Value> = map
            .iter()
            .filter(|(k, _)| !RESERVED_MEDIA_KEYS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        if map.contains_key("html_content") {
            self.html.push(map.clone());
            sanitized.insert(
                "html_report".to_string(),
                json!("SEO-Report wird im Chat angezeigt."),
            );
            return Value::Object(sanitized);
        }

        if let Some(b64) = map.get("image_base64").and_then(Value::as_str) {
            // width/height belong to the success summary, not to the data
            // fields the model needs to reason over.
            let data_fields: Map<String, Value> = sanitized
                .iter()
                .filter(|(k, _)| !matches!(k.as_str(), "mime_type" | "width" | "height"))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            self.images.push(map.clone());
            log(LogEvent::text(format!(
                "[{}] (Bild-Daten: {} Bytes Base64)",
                ts(),
                b64.len()
            )));

            return if data_fields.is_empty() {
                json!({
                    "success": true,
                    "message": "Bild wurde erfolgreich erstellt",
                    "width": map.get("width").cloned().unwrap_or(Value::Null),
                    "height": map.get("height").cloned().unwrap_or(Value::Null),
                })
            } else {
                let mut with_note = data_fields;
                with_note.insert(
                    "bild".to_string(),
                    json!("Karte wurde erstellt und wird im Chat angezeigt."),
                );
                Value::Object(with_note)
            };
        }

        if let Some(b64) = map.get("pptx_base64").and_then(Value::as_str) {
            self.pptx.push(map.clone());
            log(LogEvent::text(format!(
                "[{}] (PPTX: {} Bytes Base64)",
                ts(),
                b64.len()
            )));
            return json!({
                "success": true,
                "title": map.get("title").cloned().unwrap_or(json!("")),
                "slides": map.get("slides").cloned().unwrap_or(json!(0)),
                "filename": map.get("filename").cloned().unwrap_or(json!("presentation.pptx")),
                "message": "Präsentation wurde erstellt und steht zum Download bereit.",
            });
        }

        if let Some(b64) = map.get("audio_base64").and_then(Value::as_str) {
            self.audio.push(map.clone());
            log(LogEvent::text(format!(
                "[{}] (Audio-Daten: {} Bytes Base64)",
                ts(),
                b64.len()
            )));
            return json!({
                "success": true,
                "message": "Audio wurde erfolgreich erstellt",
            });
        }

        if let Some(path) = map.get("local_file_path").and_then(Value::as_str) {
            self.local_files.push(path.to_string());
            sanitized.insert(
                "file".to_string(),
                json!("Datei wurde erstellt und steht zum Download bereit."),
            );
            return Value::Object(sanitized);
        }

        let _ = tool_name;
        Value::Object(map)
    }

    /// Append the marker lines for everything collected, in the order the
    /// frontend expects: HTML reports, PPTX downloads, images, audio, files.
    fn append_markers(&self, content: &mut String) {
        for report in &self.html {
            if let Some(b64) = report.get("html_content").and_then(Value::as_str) {
                content.push_str(&format!("\n\n[HTML_REPORT](data:text/html;base64,{b64})"));
            }
            if let Some(pdf_html) = report.get("pdf_html").and_then(Value::as_str) {
                if !pdf_html.is_empty() {
                    use base64::Engine;
                    let b64 = base64::engine::general_purpose::STANDARD.encode(pdf_html);
                    content.push_str(&format!("\n\n[PDF_REPORT](data:text/html;base64,{b64})"));
                }
            }
        }
        for pptx in &self.pptx {
            let filename = pptx
                .get("filename")
                .and_then(Value::as_str)
                .unwrap_or("presentation.pptx");
            let b64 = pptx.get("pptx_base64").and_then(Value::as_str).unwrap_or("");
            content.push_str(&format!("\n\n[PPTX_DOWNLOAD]({filename}::{b64})"));
        }
        for img in &self.images {
            let mime = img
                .get("mime_type")
                .and_then(Value::as_str)
                .unwrap_or("image/png");
            let b64 = img.get("image_base64").and_then(Value::as_str).unwrap_or("");
            content.push_str(&format!("\n\n![Generiertes Bild](data:{mime};base64,{b64})"));
        }
        for audio in &self.audio {
            let mime = audio
                .get("mime_type")
                .and_then(Value::as_str)
                .unwrap_or("audio/mpeg");
            let b64 = audio.get("audio_base64").and_then(Value::as_str).unwrap_or("");
            content.push_str(&format!("\n\n![audio](data:{mime};base64,{b64})"));
        }
        for path in &self.local_files {
            content.push_str(&format!("\n\n[LOCAL_FILE]({path})"));
        }
    }
}

/// Check whether the filtered tools agree on a provider+model override.
/// Only tools flagged `agent_overridable` vote; tools without configured
/// values abstain. A unanimous non-empty vote wins.
fn pick_override_for_tools(
    tools: &[Value],
    settings: &Settings,
    registry: &ToolRegistry,
) -> Option<(ProviderTarget, String)> {
    let mut provider_ids: Vec<String> = Vec::new();
    let mut models: Vec<String> = Vec::new();

    for tool in tools {
        let Some(name) = tool.pointer("/function/name").and_then(Value::as_str) else {
            continue;
        };
        if let Some(descriptor) = registry.get(name) {
            if !descriptor.agent_overridable {
                continue;
            }
        }
        let ts = settings.tool_settings(name);
        if let Some(p) = ts.get("provider").map(|p| p.trim()).filter(|p| !p.is_empty()) {
            if !provider_ids.contains(&p.to_string()) {
                provider_ids.push(p.to_string());
            }
        }
        if let Some(m) = ts.get("model").map(|m| m.trim()).filter(|m| !m.is_empty()) {
            if !models.contains(&m.to_string()) {
                models.push(m.to_string());
            }
        }
    }

    let override_target = if provider_ids.len() == 1 {
        let pid = &provider_ids[0];
        settings
            .provider(pid)
            .map(|entry| ProviderTarget::from_entry(pid, entry))
    } else {
        None
    };
    let override_model = if models.len() == 1 {
        Some(models[0].clone())
    } else {
        None
    };

    match (override_target, override_model) {
        (None, None) => None,
        (target, model) => {
            let fallback_entry = settings.default_provider_entry();
            let target = target.unwrap_or_else(|| {
                ProviderTarget::from_entry(&settings.default_provider, &fallback_entry)
            });
            let model = model.unwrap_or_else(|| settings.model.clone());
            Some((target, model))
        }
    }
}

/// Strip embedded `![alt](data:…)` URIs from assistant string content
/// before resending history to the LLM. User vision lists pass verbatim.
fn strip_history_media(msg: &Value) -> Value {
    static DATA_URI: OnceLock<Regex> = OnceLock::new();
    let re = DATA_URI
        .get_or_init(|| Regex::new(r"!\[[^\]]*\]\(data:[^)]{20,}\)").expect("static regex"));

    if msg.get("role").and_then(Value::as_str) == Some("assistant") {
        if let Some(content) = msg.get("content").and_then(Value::as_str) {
            let cleaned = re.replace_all(content, "").trim().to_string();
            let mut out = msg.clone();
            out["content"] = json!(cleaned);
            return out;
        }
    }
    msg.clone()
}

/// One-line rendering of a history message for the terminal.
fn display_message(msg: &Value) -> String {
    let role = msg.get("role").and_then(Value::as_str).unwrap_or("?");
    let display = match msg.get("content") {
        Some(Value::Array(parts)) => {
            let text: String = parts
                .iter()
                .filter(|p| p.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join(" ");
            let has_image = parts
                .iter()
                .any(|p| p.get("type").and_then(Value::as_str) == Some("image_url"));
            if has_image {
                format!("{text} [+Bild]")
            } else {
                text
            }
        }
        Some(Value::String(s)) => s.clone(),
        _ => String::new(),
    };
    format!("[{role}] {display}")
}

/// Safe copy of the outbound messages for the terminal: long strings
/// truncated, vision payloads replaced by a placeholder.
fn sanitize_messages_for_log(messages: &[Value]) -> Vec<Value> {
    messages
        .iter()
        .map(|msg| {
            let mut out = msg.clone();
            match msg.get("content") {
                Some(Value::String(s)) if s.len() > 500 => {
                    let mut end = 500;
                    while !s.is_char_boundary(end) {
                        end -= 1;
                    }
                    out["content"] = json!(format!("{}... ({} chars)", &s[..end], s.len()));
                }
                Some(Value::Array(parts)) => {
                    let sanitized: Vec<Value> = parts
                        .iter()
                        .map(|part| {
                            if part.get("type").and_then(Value::as_str) == Some("image_url") {
                                json!({
                                    "type": "image_url",
                                    "image_url": { "url": "[base64 gekuerzt]" }
                                })
                            } else {
                                part.clone()
                            }
                        })
                        .collect();
                    out["content"] = json!(sanitized);
                }
                _ => {}
            }
            out
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use guenther_core::log::{collector, LogEvent};

    #[test]
    fn strip_history_media_cleans_assistant_strings() {
        let msg = json!({
            "role": "assistant",
            "content": "Bitteschön!\n\n![Generiertes Bild](data:image/png;base64,AAAAAAAAAAAAAAAAAAAAAAAA)"
        });
        let cleaned = strip_history_media(&msg);
        assert_eq!(cleaned["content"], "Bitteschön!");

        // User vision lists pass through untouched.
        let vision = json!({
            "role": "user",
            "content": [{ "type": "image_url", "image_url": { "url": "data:image/png;base64,AAAA" } }]
        });
        assert_eq!(strip_history_media(&vision), vision);
    }

    #[test]
    fn intercept_image_only_result_is_summarised() {
        let (sink, _events) = collector();
        let mut collected = CollectedMedia::default();
        let sanitized = collected.intercept(
            "generate_image",
            json!({ "image_base64": "QUJD", "mime_type": "image/png", "width": 512, "height": 512 }),
            &sink,
        );

        assert_eq!(sanitized["success"], true);
        assert_eq!(sanitized["message"], "Bild wurde erfolgreich erstellt");
        assert_eq!(sanitized["width"], 512);
        assert!(sanitized.get("image_base64").is_none());
        assert_eq!(collected.images.len(), 1);
    }

    #[test]
    fn intercept_image_with_data_preserves_fields() {
        let (sink, _events) = collector();
        let mut collected = CollectedMedia::default();
        let sanitized = collected.intercept(
            "flight_map",
            json!({
                "image_base64": "QUJD",
                "mime_type": "image/png",
                "flights": [{ "callsign": "DLH123" }]
            }),
            &sink,
        );

        assert_eq!(sanitized["bild"], "Karte wurde erstellt und wird im Chat angezeigt.");
        assert_eq!(sanitized["flights"][0]["callsign"], "DLH123");
        assert!(sanitized.get("image_base64").is_none());
    }

    #[test]
    fn intercept_strips_every_reserved_key() {
        let (sink, _events) = collector();
        let mut collected = CollectedMedia::default();
        let sanitized = collected.intercept(
            "seo_report",
            json!({
                "html_content": "PGgxPg==",
                "pdf_html": "<h1>x</h1>",
                "score": 87
            }),
            &sink,
        );
        for key in RESERVED_MEDIA_KEYS {
            assert!(sanitized.get(*key).is_none(), "key {key} leaked");
        }
        assert_eq!(sanitized["score"], 87);
        assert_eq!(sanitized["html_report"], "SEO-Report wird im Chat angezeigt.");
    }

    #[test]
    fn append_markers_orders_and_counts() {
        let (sink, _events) = collector();
        let mut collected = CollectedMedia::default();
        collected.intercept("a", json!({ "image_base64": "QUJD", "mime_type": "image/png" }), &sink);
        collected.intercept("b", json!({ "audio_base64": "REVG", "mime_type": "audio/mpeg" }), &sink);
        collected.intercept(
            "c",
            json!({ "pptx_base64": "R0hJ", "filename": "deck.pptx", "title": "T", "slides": 3 }),
            &sink,
        );

        let mut content = "Fertig!".to_string();
        collected.append_markers(&mut content);

        assert!(content.starts_with("Fertig!"));
        assert!(content.contains("[PPTX_DOWNLOAD](deck.pptx::R0hJ)"));
        assert!(content.contains("![Generiertes Bild](data:image/png;base64,QUJD)"));
        assert!(content.contains("![audio](data:audio/mpeg;base64,REVG)"));
        // PPTX markers come before inline media.
        assert!(content.find("PPTX_DOWNLOAD").unwrap() < content.find("Generiertes Bild").unwrap());
    }

    #[test]
    fn sanitize_log_truncates_and_masks_vision() {
        let long = "x".repeat(600);
        let messages = vec![
            json!({ "role": "user", "content": long }),
            json!({ "role": "user", "content": [
                { "type": "text", "text": "schau" },
                { "type": "image_url", "image_url": { "url": "data:image/png;base64,AAAA" } },
            ]}),
        ];
        let sanitized = sanitize_messages_for_log(&messages);
        let content = sanitized[0]["content"].as_str().unwrap();
        assert!(content.ends_with("(600 chars)"));
        assert!(content.len() < 600);
        assert_eq!(
            sanitized[1]["content"][1]["image_url"]["url"],
            "[base64 gekuerzt]"
        );
    }

    #[test]
    fn display_message_marks_images() {
        let msg = json!({ "role": "user", "content": [
            { "type": "text", "text": "Was ist das?" },
            { "type": "image_url", "image_url": { "url": "data:..." } },
        ]});
        assert_eq!(display_message(&msg), "[user] Was ist das? [+Bild]");
    }

    #[test]
    fn override_requires_unanimity() {
        let mut settings = Settings::default();
        settings
            .tool_settings
            .insert("a".into(), [("provider".to_string(), "openrouter".to_string()),
                                 ("model".to_string(), "m1".to_string())].into());
        settings
            .tool_settings
            .insert("b".into(), [("provider".to_string(), "openrouter".to_string()),
                                 ("model".to_string(), "m1".to_string())].into());

        let registry = ToolRegistry::new();
        let tools = vec![
            json!({ "function": { "name": "a" } }),
            json!({ "function": { "name": "b" } }),
        ];
        let (target, model) = pick_override_for_tools(&tools, &settings, &registry).unwrap();
        assert_eq!(target.id, "openrouter");
        assert_eq!(model, "m1");

        // Disagreeing models: model falls back to default, provider stays.
        settings.tool_settings.get_mut("b").unwrap().insert("model".into(), "m2".into());
        let (_, model) = pick_override_for_tools(&tools, &settings, &registry).unwrap();
        assert_eq!(model, settings.model);
    }

    #[test]
    fn no_settings_no_override() {
        let settings = Settings::default();
        let registry = ToolRegistry::new();
        let tools = vec![json!({ "function": { "name": "a" } })];
        assert!(pick_override_for_tools(&tools, &settings, &registry).is_none());
    }

    struct NoopTool;

    #[async_trait]
    impl guenther_tools::ToolHandler for NoopTool {
        async fn call(
            &self,
            _args: Value,
            _ctx: &HandlerContext,
        ) -> guenther_tools::Result<Value> {
            Ok(json!({}))
        }
    }

    #[test]
    fn registered_tools_with_settings_vote_in_override() {
        use guenther_core::config::ProviderEntry;
        use guenther_tools::{ToolDescriptor, ToolOrigin};

        let mut settings = Settings::default();
        settings.providers.insert(
            "p1".to_string(),
            ProviderEntry {
                name: "Provider Eins".to_string(),
                base_url: "https://p1.example/v1".to_string(),
                api_key: "sk-p1".to_string(),
                enabled: true,
            },
        );
        for name in ["generate_image", "text_to_speech"] {
            settings.tool_settings.insert(
                name.to_string(),
                [
                    ("provider".to_string(), "p1".to_string()),
                    ("model".to_string(), "m1".to_string()),
                ]
                .into(),
            );
        }

        // The descriptors are registered, so the vote runs against the
        // real `agent_overridable` flag, not the unregistered fallback.
        let registry = ToolRegistry::new();
        for name in ["generate_image", "text_to_speech"] {
            registry.register(ToolDescriptor::new(
                name,
                "t",
                json!({"type":"object","properties":{}}),
                Arc::new(NoopTool),
                ToolOrigin::Builtin,
            ));
        }

        let tools = vec![
            json!({ "function": { "name": "generate_image" } }),
            json!({ "function": { "name": "text_to_speech" } }),
        ];
        let (target, model) = pick_override_for_tools(&tools, &settings, &registry).unwrap();
        assert_eq!(target.id, "p1");
        assert_eq!(target.base_url, "https://p1.example/v1");
        assert_eq!(model, "m1");
    }

    #[test]
    fn log_events_serialize_like_frontend_expects() {
        let event = LogEvent::header("GUENTHER AGENT BEENDET");
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"header""#));
        assert!(json.contains("GUENTHER AGENT BEENDET"));
    }
}
