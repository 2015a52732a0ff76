use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use serde_json::{json, Value};

use crate::descriptor::{
    HandlerContext, SettingsField, ToolDescriptor, ToolHandler, ToolOrigin,
};
use crate::error::Result;

pub fn descriptor() -> ToolDescriptor {
    ToolDescriptor::new(
        "generate_image",
        "Generiert ein Bild anhand einer Beschreibung (Prompt) mit einem KI-Bildgenerierungs-Modell. \
         Gibt das fertige Bild zurück. Nutze dies wenn der Benutzer ein Bild erstellen, zeichnen oder \
         generieren lassen möchte.",
        json!({
            "type": "object",
            "properties": {
                "prompt": {
                    "type": "string",
                    "description": "Detaillierte Bildbeschreibung auf Englisch für beste Ergebnisse, \
                        z.B. 'a photorealistic cat sitting on a red sofa, warm lighting'"
                },
                "aspect_ratio": {
                    "type": "string",
                    "description": "Seitenverhältnis des Bildes (Standard: 1:1)",
                    "enum": ["1:1", "16:9", "4:3", "3:4", "9:16", "21:9"]
                }
            },
            "required": ["prompt"]
        }),
        Arc::new(GenerateImageHandler),
        ToolOrigin::Builtin,
    )
    .with_settings_schema(vec![
        SettingsField::text(
            "image_model",
            "Bildgenerierungs-Modell",
            "leer = Standard-Modell verwenden",
            "z.B. google/gemini-2.5-flash-image-preview oder black-forest-labs/flux-1.1-pro",
        ),
        SettingsField::text(
            "timeout",
            "Timeout (Sekunden)",
            "leer = 120",
            "Timeout für die Bildgenerierung",
        ),
    ])
}

struct GenerateImageHandler;

#[async_trait]
impl ToolHandler for GenerateImageHandler {
    async fn call(&self, args: Value, ctx: &HandlerContext) -> Result<Value> {
        let prompt = args.get("prompt").and_then(Value::as_str).unwrap_or("").trim();
        if prompt.is_empty() {
            return Ok(json!({ "error": "prompt ist erforderlich" }));
        }
        let aspect_ratio = args
            .get("aspect_ratio")
            .and_then(Value::as_str)
            .unwrap_or("1:1");

        let mut target = ctx.default_target();
        if target.api_key.is_empty() {
            target.api_key = ctx.default_api_key();
        }
        if target.api_key.is_empty() {
            return Ok(json!({ "error": "Kein OpenRouter API-Key konfiguriert." }));
        }

        let tool_cfg = ctx.tool_settings("generate_image");
        let model = tool_cfg
            .get("image_model")
            .or_else(|| tool_cfg.get("model"))
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .or_else(|| {
                let m = ctx.settings.image_gen_model.trim();
                (!m.is_empty()).then(|| m.to_string())
            })
            .unwrap_or_else(|| ctx.settings.model.clone());

        let timeout = tool_cfg
            .get("timeout")
            .and_then(|t| t.trim().parse::<u64>().ok())
            .unwrap_or(120);

        match ctx
            .llm
            .generate_image(&target, &model, prompt, aspect_ratio, Duration::from_secs(timeout))
            .await
        {
            Ok((bytes, mime)) => Ok(json!({
                "image_base64": base64::engine::general_purpose::STANDARD.encode(&bytes),
                "mime_type": mime,
                "prompt": prompt,
                "model": model,
            })),
            Err(e) => Ok(json!({
                "error": e.to_string(),
                "model_used": model,
                "hint": "Bildgenerierungs-Modell in MCP Tools > generate_image > Timeout/Modell einstellen.",
            })),
        }
    }
}
