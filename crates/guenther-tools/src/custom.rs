//! Custom tools — LLM-built tool programs living under
//! `<data>/custom_tools/<name>/`.
//!
//! Each directory holds a `manifest.json` (definitions + launch command), the
//! tool program (`tool.py`) and a fixed `runner.py` wrapper that serves the
//! same stdio line protocol as external tool servers, so custom tools are
//! uniform with the external path at call time.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use guenther_core::log::{LogEvent, LogSink};

use crate::descriptor::{HandlerContext, SettingsField, ToolDescriptor, ToolHandler, ToolOrigin};
use crate::error::{Result, ToolError};
use crate::registry::ToolRegistry;
use crate::rpc::StdioToolClient;

pub const MANIFEST_FILE: &str = "manifest.json";
pub const TOOL_FILE: &str = "tool.py";
pub const RUNNER_FILE: &str = "runner.py";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestTool {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub usage: Option<String>,
    pub input_schema: Value,
    #[serde(default)]
    pub settings_schema: Vec<SettingsField>,
    #[serde(default = "bool_true")]
    pub agent_overridable: bool,
}

/// Launch + registration record for one custom tool directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolManifest {
    #[serde(default = "default_command")]
    pub command: String,
    #[serde(default = "default_args")]
    pub args: Vec<String>,
    #[serde(default)]
    pub settings_info: Option<String>,
    pub tools: Vec<ManifestTool>,
}

fn bool_true() -> bool {
    true
}
fn default_command() -> String {
    "python3".to_string()
}
fn default_args() -> Vec<String> {
    vec![RUNNER_FILE.to_string()]
}

pub fn custom_tools_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("custom_tools")
}

/// Read a directory's manifest.
pub fn read_manifest(dir: &Path) -> Result<ToolManifest> {
    let raw = std::fs::read_to_string(dir.join(MANIFEST_FILE))?;
    Ok(serde_json::from_str(&raw)?)
}

/// Scan the custom-tools directory and register everything found.
/// Malformed entries are logged and skipped; boot never aborts here.
pub fn load_custom_tools(registry: &ToolRegistry, data_dir: &Path, log: Option<&LogSink>) -> usize {
    let root = custom_tools_dir(data_dir);
    if std::fs::create_dir_all(&root).is_err() {
        return 0;
    }

    let mut entries: Vec<PathBuf> = match std::fs::read_dir(&root) {
        Ok(rd) => rd
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect(),
        Err(_) => return 0,
    };
    entries.sort();

    let mut total = 0;
    for dir in entries {
        match register_custom_dir(registry, &dir) {
            Ok(names) => {
                for name in &names {
                    info!(tool = %name, dir = %dir.display(), "custom tool registered");
                }
                total += names.len();
            }
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "custom tool skipped");
                if let Some(log) = log {
                    log(LogEvent::text(format!(
                        "Custom Tool uebersprungen ({}): {e}",
                        dir.display()
                    )));
                }
            }
        }
    }
    if total > 0 {
        info!(count = total, "custom tools registered");
    }
    total
}

/// Register every tool declared by one directory's manifest.
/// Returns the registered names.
pub fn register_custom_dir(registry: &ToolRegistry, dir: &Path) -> Result<Vec<String>> {
    let manifest = read_manifest(dir)?;
    if manifest.tools.is_empty() {
        return Err(ToolError::handler("manifest declares no tools"));
    }

    let process = Arc::new(CustomToolProcess {
        dir: dir.to_path_buf(),
        command: manifest.command.clone(),
        args: manifest.args.clone(),
        client: tokio::sync::Mutex::new(None),
    });

    let mut names = Vec::new();
    for tool in &manifest.tools {
        let mut descriptor = ToolDescriptor::new(
            &tool.name,
            &tool.description,
            tool.input_schema.clone(),
            Arc::new(CustomToolHandler {
                process: Arc::clone(&process),
                tool_name: tool.name.clone(),
            }),
            ToolOrigin::Custom,
        )
        .with_settings_schema(tool.settings_schema.clone());
        if let Some(usage) = &tool.usage {
            descriptor = descriptor.with_usage(usage.clone());
        }
        if let Some(info) = &manifest.settings_info {
            descriptor = descriptor.with_settings_info(info.clone());
        }
        if !tool.agent_overridable {
            descriptor = descriptor.not_agent_overridable();
        }
        registry.register(descriptor);
        names.push(tool.name.clone());
    }
    Ok(names)
}

/// Unregister the names a directory's manifest declares (edit/delete path).
pub fn unregister_custom_dir(registry: &ToolRegistry, dir: &Path) -> Vec<String> {
    match read_manifest(dir) {
        Ok(manifest) => {
            let names: Vec<String> = manifest.tools.into_iter().map(|t| t.name).collect();
            for name in &names {
                registry.unregister(name);
            }
            names
        }
        Err(_) => Vec::new(),
    }
}

/// Lazily-spawned child shared by all tools of one directory.
struct CustomToolProcess {
    dir: PathBuf,
    command: String,
    args: Vec<String>,
    client: tokio::sync::Mutex<Option<Arc<StdioToolClient>>>,
}

impl CustomToolProcess {
    async fn client(&self) -> Result<Arc<StdioToolClient>> {
        let mut guard = self.client.lock().await;
        if let Some(client) = guard.as_ref() {
            return Ok(Arc::clone(client));
        }
        let client =
            Arc::new(StdioToolClient::connect(&self.command, &self.args, Some(&self.dir)).await?);
        *guard = Some(Arc::clone(&client));
        Ok(client)
    }

    /// Drop the cached client so the next call respawns the child.
    async fn reset(&self) {
        let mut guard = self.client.lock().await;
        if let Some(client) = guard.take() {
            client.shutdown().await;
        }
    }
}

struct CustomToolHandler {
    process: Arc<CustomToolProcess>,
    tool_name: String,
}

#[async_trait]
impl ToolHandler for CustomToolHandler {
    async fn call(&self, args: Value, ctx: &HandlerContext) -> Result<Value> {
        let client = self.process.client().await?;

        // Ship the tool's current settings along so the child sees fresh
        // values on every call.
        let settings = ctx.tool_settings(&self.tool_name);
        let params = json!({ "arguments": args, "settings": settings });

        match client
            .call_tool_with_params(&self.tool_name, params)
            .await
        {
            Ok(result) => Ok(unwrap_custom_content(result)),
            Err(e) => {
                // Transport failure: drop the child so the next call starts
                // a fresh one.
                self.process.reset().await;
                Err(e)
            }
        }
    }
}

/// Unwrap a custom tool's `tools/call` result. Text content that parses as
/// a JSON object is returned as the result mapping itself, so media keys
/// (`audio_base64`, `pptx_base64`, …) survive the wire.
fn unwrap_custom_content(result: Value) -> Value {
    let Some(first) = result
        .get("content")
        .and_then(Value::as_array)
        .and_then(|c| c.first())
    else {
        return result;
    };

    match first.get("type").and_then(Value::as_str) {
        Some("text") => {
            let text = first.get("text").and_then(Value::as_str).unwrap_or("");
            match serde_json::from_str::<Value>(text) {
                Ok(parsed) if parsed.is_object() => parsed,
                _ => json!({ "result": text }),
            }
        }
        Some("image") => json!({
            "image_base64": first.get("data").and_then(Value::as_str).unwrap_or(""),
            "mime_type": first.get("mimeType").and_then(Value::as_str).unwrap_or("image/png"),
        }),
        _ => result,
    }
}

/// Fixed wrapper program written next to every generated tool. Serves the
/// stdio line protocol around the module-convention `tool.py` (shimming the
/// `config` / `services.tool_context` imports the code generator allows).
pub const RUNNER_PY: &str = r#"#!/usr/bin/env python3
"""Line-delimited JSON-RPC wrapper around tool.py."""
import json
import sys
import types

_SETTINGS = {}

config = types.ModuleType("config")
config.DATA_DIR = "."
config.get_settings = lambda: {}
config.get_tool_settings = lambda name: dict(_SETTINGS.get(name, {}))
config.save_tool_settings = lambda name, values: None
sys.modules["config"] = config

services = types.ModuleType("services")
tool_context = types.ModuleType("services.tool_context")
tool_context.get_emit_log = lambda: None
tool_context.set_emit_log = lambda fn: None
services.tool_context = tool_context
sys.modules["services"] = services
sys.modules["services.tool_context"] = tool_context

sys.path.insert(0, ".")
import tool  # noqa: E402


def _definitions():
    tds = getattr(tool, "TOOL_DEFINITIONS", None)
    if tds is None:
        tds = [tool.TOOL_DEFINITION]
    return tds


def _handler(name):
    handlers = getattr(tool, "HANDLERS", None)
    if isinstance(handlers, dict) and name in handlers:
        return handlers[name]
    return getattr(tool, "handler", None) or getattr(tool, name, None)


def _reply(rid, result=None, error=None):
    msg = {"jsonrpc": "2.0", "id": rid}
    if error is not None:
        msg["error"] = error
    else:
        msg["result"] = result
    sys.stdout.write(json.dumps(msg, ensure_ascii=False) + "\n")
    sys.stdout.flush()


for line in sys.stdin:
    line = line.strip()
    if not line:
        continue
    try:
        req = json.loads(line)
    except json.JSONDecodeError:
        continue
    rid = req.get("id")
    method = req.get("method", "")
    if method == "initialize":
        _reply(rid, {
            "protocolVersion": "2024-11-05",
            "capabilities": {"tools": {}},
            "serverInfo": {"name": "guenther-custom-tool", "version": "1.0.0"},
        })
    elif method == "notifications/initialized":
        continue
    elif method == "tools/list":
        tools = [
            {"name": td["name"], "description": td["description"],
             "inputSchema": td["input_schema"]}
            for td in _definitions()
        ]
        _reply(rid, {"tools": tools})
    elif method == "tools/call":
        params = req.get("params") or {}
        name = params.get("name", "")
        args = params.get("arguments") or {}
        _SETTINGS[name] = params.get("settings") or {}
        h = _handler(name)
        if h is None:
            result = {"error": f"unknown tool: {name}"}
        else:
            try:
                result = h(**args)
            except Exception as e:
                result = {"error": str(e)}
        if isinstance(result, dict) and "image_base64" in result:
            _reply(rid, {"content": [{
                "type": "image",
                "data": result["image_base64"],
                "mimeType": result.get("mime_type", "image/png"),
            }]})
        else:
            _reply(rid, {"content": [{
                "type": "text",
                "text": json.dumps(result, ensure_ascii=False),
            }]})
    elif rid is not None:
        _reply(rid, error={"code": -32601, "message": f"Method not found: {method}"})
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_defaults_fill_command_and_args() {
        let manifest: ToolManifest = serde_json::from_str(
            r#"{"tools":[{"name":"x","description":"d","input_schema":{"type":"object","properties":{}}}]}"#,
        )
        .unwrap();
        assert_eq!(manifest.command, "python3");
        assert_eq!(manifest.args, vec![RUNNER_FILE.to_string()]);
        assert!(manifest.tools[0].agent_overridable);
    }

    #[test]
    fn unwrap_parses_json_object_text() {
        let out = unwrap_custom_content(json!({
            "content": [{ "type": "text", "text": "{\"audio_base64\":\"QQ==\",\"mime_type\":\"audio/mpeg\"}" }]
        }));
        assert_eq!(out["audio_base64"], "QQ==");

        let out = unwrap_custom_content(json!({
            "content": [{ "type": "text", "text": "plain words" }]
        }));
        assert_eq!(out, json!({ "result": "plain words" }));
    }

    #[test]
    fn register_custom_dir_registers_manifest_tools() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("weather");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join(MANIFEST_FILE),
            serde_json::to_string(&ToolManifest {
                command: "python3".into(),
                args: default_args(),
                settings_info: None,
                tools: vec![ManifestTool {
                    name: "get_weather".into(),
                    description: "Wetter".into(),
                    usage: None,
                    input_schema: json!({"type":"object","properties":{"city":{"type":"string"}},"required":["city"]}),
                    settings_schema: Vec::new(),
                    agent_overridable: true,
                }],
            })
            .unwrap(),
        )
        .unwrap();

        let registry = ToolRegistry::new();
        let names = register_custom_dir(&registry, &dir).unwrap();
        assert_eq!(names, vec!["get_weather"]);

        let tool = registry.get("get_weather").unwrap();
        assert_eq!(tool.origin, ToolOrigin::Custom);

        let removed = unregister_custom_dir(&registry, &dir);
        assert_eq!(removed, vec!["get_weather"]);
        assert!(registry.get("get_weather").is_none());
    }

    #[test]
    fn loader_skips_broken_manifests() {
        let tmp = tempfile::tempdir().unwrap();
        let root = custom_tools_dir(tmp.path());
        let broken = root.join("broken");
        std::fs::create_dir_all(&broken).unwrap();
        std::fs::write(broken.join(MANIFEST_FILE), "{not json").unwrap();

        let registry = ToolRegistry::new();
        let count = load_custom_tools(&registry, tmp.path(), None);
        assert_eq!(count, 0);
        assert!(registry.is_empty());
    }
}
