//! External tool servers — long-lived child processes speaking the stdio
//! JSON-RPC line protocol. Each configured server contributes proxy
//! descriptors to the registry; reconfiguration tears all children down and
//! reconnects.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{info, warn};

use guenther_core::config::ToolServerEntry;
use guenther_core::log::{LogEvent, LogSink};

use crate::descriptor::{HandlerContext, ToolDescriptor, ToolHandler, ToolOrigin};
use crate::error::Result;
use crate::registry::ToolRegistry;
use crate::rpc::StdioToolClient;

/// Owns all external tool server children.
#[derive(Default)]
pub struct ExternalToolManager {
    clients: tokio::sync::Mutex<HashMap<String, Arc<StdioToolClient>>>,
}

impl ExternalToolManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Disconnect all children, then connect to the configured servers and
    /// register their tools. Returns the number of registered tools.
    pub async fn reload(
        &self,
        registry: &ToolRegistry,
        servers: &[ToolServerEntry],
        log: &LogSink,
    ) -> usize {
        {
            let mut clients = self.clients.lock().await;
            for (sid, client) in clients.drain() {
                registry.unregister_by_origin(&ToolOrigin::External(sid));
                client.shutdown().await;
            }
        }

        let mut total = 0;
        for server in servers {
            if !server.enabled {
                continue;
            }
            let name = if server.name.is_empty() {
                &server.id
            } else {
                &server.name
            };
            log(LogEvent::text(format!("Verbinde mit MCP Server: {name}...")));

            match self.connect_one(registry, server).await {
                Ok(count) => {
                    log(LogEvent::text(format!("  OK {count} Tools geladen von {name}")));
                    total += count;
                }
                Err(e) => {
                    warn!(server = %server.id, error = %e, "external tool server failed");
                    log(LogEvent::text(format!("  FEHLER bei {name}: {e}")));
                }
            }
        }
        if total > 0 {
            info!(count = total, "external tools registered");
        }
        total
    }

    async fn connect_one(&self, registry: &ToolRegistry, server: &ToolServerEntry) -> Result<usize> {
        let client = Arc::new(StdioToolClient::connect(&server.command, &server.args, None).await?);
        let tools = client.list_tools().await?;

        for def in &tools {
            registry.register(ToolDescriptor::new(
                &def.name,
                &def.description,
                def.input_schema.clone(),
                Arc::new(ExternalToolHandler {
                    client: Arc::clone(&client),
                    tool_name: def.name.clone(),
                }),
                ToolOrigin::External(server.id.clone()),
            ));
        }

        let count = tools.len();
        self.clients
            .lock()
            .await
            .insert(server.id.clone(), client);
        Ok(count)
    }

    /// Terminate every child (process shutdown path).
    pub async fn shutdown_all(&self) {
        let mut clients = self.clients.lock().await;
        for (_, client) in clients.drain() {
            client.shutdown().await;
        }
    }
}

/// Proxy handler marshalling a registry call onto the wire.
pub(crate) struct ExternalToolHandler {
    pub(crate) client: Arc<StdioToolClient>,
    pub(crate) tool_name: String,
}

#[async_trait]
impl ToolHandler for ExternalToolHandler {
    async fn call(&self, args: Value, _ctx: &HandlerContext) -> Result<Value> {
        let result = self.client.call_tool(&self.tool_name, args).await?;
        Ok(unwrap_content(result))
    }
}

/// Unwrap a `tools/call` result: `content[0]` becomes either a text result
/// or a media record. Anything unexpected passes through unchanged so the
/// model still sees something useful.
pub(crate) fn unwrap_content(result: Value) -> Value {
    let Some(first) = result
        .get("content")
        .and_then(Value::as_array)
        .and_then(|c| c.first())
    else {
        return result;
    };

    match first.get("type").and_then(Value::as_str) {
        Some("text") => json!({
            "result": first.get("text").and_then(Value::as_str).unwrap_or("")
        }),
        Some("image") => json!({
            "image_base64": first.get("data").and_then(Value::as_str).unwrap_or(""),
            "mime_type": first.get("mimeType").and_then(Value::as_str).unwrap_or("image/png"),
        }),
        _ => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_content_becomes_result() {
        let out = unwrap_content(json!({
            "content": [{ "type": "text", "text": "42" }]
        }));
        assert_eq!(out, json!({ "result": "42" }));
    }

    #[test]
    fn image_content_becomes_media_record() {
        let out = unwrap_content(json!({
            "content": [{ "type": "image", "data": "aGk=", "mimeType": "image/jpeg" }]
        }));
        assert_eq!(out["image_base64"], "aGk=");
        assert_eq!(out["mime_type"], "image/jpeg");
    }

    #[test]
    fn unknown_shape_passes_through() {
        let original = json!({ "something": "else" });
        assert_eq!(unwrap_content(original.clone()), original);

        let error = json!({ "error": { "code": -32601 } });
        assert_eq!(unwrap_content(error.clone()), error);
    }
}
