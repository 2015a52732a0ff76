use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::descriptor::{HandlerContext, ToolDescriptor, ToolHandler, ToolOrigin};
use crate::error::Result;

pub fn descriptor() -> ToolDescriptor {
    ToolDescriptor::new(
        "send_telegram",
        "Sendet eine Telegram-Nachricht an einen Benutzer (per @username). \
         Der Benutzer muss dem Bot schon einmal geschrieben haben.",
        json!({
            "type": "object",
            "properties": {
                "username": {
                    "type": "string",
                    "description": "Telegram-Username des Empfaengers, mit oder ohne @"
                },
                "message": {
                    "type": "string",
                    "description": "Der Nachrichtentext"
                }
            },
            "required": ["username", "message"]
        }),
        Arc::new(SendTelegramHandler),
        ToolOrigin::Builtin,
    )
    .with_usage("Beispiel: {\"username\": \"@alice\", \"message\": \"Hallo von Guenther!\"}")
}

struct SendTelegramHandler;

#[async_trait]
impl ToolHandler for SendTelegramHandler {
    async fn call(&self, args: Value, ctx: &HandlerContext) -> Result<Value> {
        let username = args
            .get("username")
            .and_then(Value::as_str)
            .unwrap_or("")
            .trim_start_matches('@')
            .trim()
            .to_string();
        let message = args.get("message").and_then(Value::as_str).unwrap_or("");
        if username.is_empty() || message.is_empty() {
            return Ok(json!({ "error": "username und message sind erforderlich" }));
        }

        let token = ctx.settings.telegram.bot_token.trim().to_string();
        if token.is_empty() {
            return Ok(json!({ "error": "Kein Telegram Bot-Token konfiguriert." }));
        }

        let Some(chat_id) = ctx.tg_users.get(&username) else {
            return Ok(json!({
                "error": format!(
                    "Kein Telegram-Chat fuer @{username} bekannt. \
                     Der Nutzer muss dem Bot zuerst schreiben."
                )
            }));
        };

        // Telegram caps messages at 4096 chars.
        let text = if message.len() > 4096 {
            let mut end = 4090;
            while !message.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}\n[...]", &message[..end])
        } else {
            message.to_string()
        };

        let url = format!("https://api.telegram.org/bot{token}/sendMessage");
        let response = ctx
            .http
            .post(&url)
            .json(&json!({ "chat_id": chat_id, "text": text }))
            .timeout(Duration::from_secs(10))
            .send()
            .await;

        match response {
            Ok(r) if r.status().is_success() => Ok(json!({
                "success": true,
                "username": username,
                "chat_id": chat_id,
            })),
            Ok(r) => {
                let body = r.text().await.unwrap_or_default();
                Ok(json!({ "error": format!("Telegram API Fehler: {body}") }))
            }
            Err(e) => Ok(json!({ "error": format!("Telegram API Fehler: {e}") })),
        }
    }
}
