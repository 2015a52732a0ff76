use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::builder::sanitize_name;
use crate::custom::{custom_tools_dir, unregister_custom_dir, MANIFEST_FILE};
use crate::descriptor::{HandlerContext, ToolDescriptor, ToolHandler, ToolOrigin};
use crate::error::Result;

pub fn descriptor() -> ToolDescriptor {
    ToolDescriptor::new(
        "delete_custom_tool",
        "Loescht ein Custom Tool dauerhaft (Deregistrierung + Entfernen des Tool-Verzeichnisses). \
         Funktioniert nur fuer Custom Tools, nicht fuer eingebaute Tools.",
        json!({
            "type": "object",
            "properties": {
                "tool_name": {
                    "type": "string",
                    "description": "Name des zu loeschenden Custom Tools (snake_case)"
                }
            },
            "required": ["tool_name"]
        }),
        Arc::new(DeleteToolHandler),
        ToolOrigin::Builtin,
    )
}

struct DeleteToolHandler;

#[async_trait]
impl ToolHandler for DeleteToolHandler {
    async fn call(&self, args: Value, ctx: &HandlerContext) -> Result<Value> {
        let name = sanitize_name(args.get("tool_name").and_then(Value::as_str).unwrap_or(""));
        if name.is_empty() {
            return Ok(json!({ "error": "tool_name ist erforderlich" }));
        }

        let dir = custom_tools_dir(&ctx.data_dir).join(&name);
        if !dir.join(MANIFEST_FILE).is_file() {
            return Ok(json!({
                "error": format!("Custom Tool '{name}' nicht gefunden")
            }));
        }

        let removed = unregister_custom_dir(&ctx.registry, &dir);
        if let Err(e) = std::fs::remove_dir_all(&dir) {
            return Ok(json!({ "error": format!("Verzeichnis konnte nicht entfernt werden: {e}") }));
        }

        Ok(json!({
            "success": true,
            "tool_name": name,
            "unregistered": removed,
        }))
    }
}
