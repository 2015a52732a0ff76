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
        "text_to_speech",
        "Wandelt Text in gesprochene Sprache um und gibt das Audio zurueck. \
         Nutze dies wenn der Benutzer etwas vorgelesen oder als Sprachnachricht haben möchte.",
        json!({
            "type": "object",
            "properties": {
                "text": {
                    "type": "string",
                    "description": "Der vorzulesende Text"
                }
            },
            "required": ["text"]
        }),
        Arc::new(TextToSpeechHandler),
        ToolOrigin::Builtin,
    )
    .with_settings_schema(vec![SettingsField::text(
        "tts_model",
        "Text-to-Speech-Modell",
        "leer = Standard-Modell verwenden",
        "Audio-fähiges Modell, z.B. openai/gpt-4o-audio-preview",
    )])
}

struct TextToSpeechHandler;

#[async_trait]
impl ToolHandler for TextToSpeechHandler {
    async fn call(&self, args: Value, ctx: &HandlerContext) -> Result<Value> {
        let text = args.get("text").and_then(Value::as_str).unwrap_or("").trim();
        if text.is_empty() {
            return Ok(json!({ "error": "text ist erforderlich" }));
        }

        let mut target = ctx.default_target();
        if target.api_key.is_empty() {
            target.api_key = ctx.default_api_key();
        }
        if target.api_key.is_empty() {
            return Ok(json!({ "error": "Kein OpenRouter API-Key konfiguriert." }));
        }

        let tool_cfg = ctx.tool_settings("text_to_speech");
        let model = tool_cfg
            .get("tts_model")
            .or_else(|| tool_cfg.get("model"))
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .or_else(|| {
                let m = ctx.settings.tts_model.trim();
                (!m.is_empty()).then(|| m.to_string())
            })
            .unwrap_or_else(|| ctx.settings.model.clone());

        match ctx
            .llm
            .speech(&target, &model, text, Duration::from_secs(120))
            .await
        {
            Ok((bytes, mime)) => Ok(json!({
                "audio_base64": base64::engine::general_purpose::STANDARD.encode(&bytes),
                "mime_type": mime,
                "model": model,
            })),
            Err(e) => Ok(json!({ "error": e.to_string(), "model_used": model })),
        }
    }
}
