//! Thin Bot API client: long-poll updates, typed uploads, the two-step
//! getFile → download protocol.

use std::time::Duration;

use serde_json::{json, Value};
use tracing::warn;

use crate::error::{GatewayError, Result};

/// Long-poll window requested from the API.
const POLL_TIMEOUT_SECS: u64 = 25;

pub struct TelegramApi {
    http: reqwest::Client,
    token: String,
}

impl TelegramApi {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            token: token.into(),
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!("https://api.telegram.org/bot{}/{method}", self.token)
    }

    fn file_url(&self, file_path: &str) -> String {
        format!("https://api.telegram.org/file/bot{}/{file_path}", self.token)
    }

    /// `getUpdates` long-poll. Returns the raw update objects.
    pub async fn get_updates(&self, offset: i64) -> Result<Vec<Value>> {
        let response = self
            .http
            .get(self.method_url("getUpdates"))
            .query(&[
                ("offset", offset.to_string()),
                ("timeout", POLL_TIMEOUT_SECS.to_string()),
                ("allowed_updates", "[\"message\"]".to_string()),
            ])
            .timeout(Duration::from_secs(POLL_TIMEOUT_SECS + 5))
            .send()
            .await?;

        let body: Value = response.json().await?;
        if body.get("ok").and_then(Value::as_bool) != Some(true) {
            return Err(GatewayError::Api(body.to_string()));
        }
        Ok(body
            .get("result")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    pub async fn send_message(&self, chat_id: i64, text: &str) {
        let result = self
            .http
            .post(self.method_url("sendMessage"))
            .json(&json!({ "chat_id": chat_id, "text": text }))
            .timeout(Duration::from_secs(10))
            .send()
            .await;
        if let Err(e) = result {
            warn!(error = %e, "Telegram sendMessage failed");
        }
    }

    /// Refresh the "typing…" indicator (expires after ~5 s on Telegram's side).
    pub async fn send_typing(&self, chat_id: i64) {
        let _ = self
            .http
            .post(self.method_url("sendChatAction"))
            .json(&json!({ "chat_id": chat_id, "action": "typing" }))
            .timeout(Duration::from_secs(10))
            .send()
            .await;
    }

    pub async fn send_photo(&self, chat_id: i64, bytes: Vec<u8>) {
        self.upload(chat_id, "sendPhoto", "photo", "image.png", "image/png", bytes)
            .await;
    }

    pub async fn send_audio(&self, chat_id: i64, bytes: Vec<u8>) {
        self.upload(chat_id, "sendAudio", "audio", "voice.mp3", "audio/mpeg", bytes)
            .await;
    }

    pub async fn send_document(&self, chat_id: i64, filename: &str, mime: &str, bytes: Vec<u8>) {
        self.upload(chat_id, "sendDocument", "document", filename, mime, bytes)
            .await;
    }

    async fn upload(
        &self,
        chat_id: i64,
        method: &str,
        field: &'static str,
        filename: &str,
        mime: &str,
        bytes: Vec<u8>,
    ) {
        let part = match reqwest::multipart::Part::bytes(bytes)
            .file_name(filename.to_string())
            .mime_str(mime)
        {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, method, "Telegram upload part invalid");
                return;
            }
        };
        let form = reqwest::multipart::Form::new()
            .text("chat_id", chat_id.to_string())
            .part(field, part);

        let result = self
            .http
            .post(self.method_url(method))
            .multipart(form)
            .timeout(Duration::from_secs(30))
            .send()
            .await;
        if let Err(e) = result {
            warn!(error = %e, method, "Telegram upload failed");
        }
    }

    /// Two-step media download: `getFile` resolves the server path, then the
    /// file endpoint serves the bytes.
    pub async fn download_file(&self, file_id: &str) -> Result<(Vec<u8>, String)> {
        let response = self
            .http
            .post(self.method_url("getFile"))
            .json(&json!({ "file_id": file_id }))
            .timeout(Duration::from_secs(10))
            .send()
            .await?;
        let body: Value = response.json().await?;
        if body.get("ok").and_then(Value::as_bool) != Some(true) {
            return Err(GatewayError::Api(format!("getFile failed: {body}")));
        }
        let file_path = body
            .pointer("/result/file_path")
            .and_then(Value::as_str)
            .ok_or_else(|| GatewayError::Api("getFile: no file_path".to_string()))?
            .to_string();

        let bytes = self
            .http
            .get(self.file_url(&file_path))
            .timeout(Duration::from_secs(30))
            .send()
            .await?
            .error_for_status()
            .map_err(GatewayError::Http)?
            .bytes()
            .await?
            .to_vec();

        let mime = if file_path.to_lowercase().ends_with(".png") {
            "image/png"
        } else {
            "image/jpeg"
        };
        Ok((bytes, mime.to_string()))
    }
}
