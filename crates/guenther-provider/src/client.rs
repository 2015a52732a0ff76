//! HTTP client for OpenAI-compatible completion APIs.
//!
//! One client instance serves every configured provider — the target
//! (base URL + key) is passed per call, because tool settings can override
//! the provider mid-turn.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use guenther_core::config::ProviderEntry;

use crate::error::{ProviderError, Result};

const WHISPER_URL: &str = "https://api.openai.com/v1/audio/transcriptions";

/// Resolved provider endpoint for one call.
#[derive(Debug, Clone)]
pub struct ProviderTarget {
    pub id: String,
    pub name: String,
    pub base_url: String,
    pub api_key: String,
}

impl ProviderTarget {
    pub fn from_entry(id: &str, entry: &ProviderEntry) -> Self {
        Self {
            id: id.to_string(),
            name: entry.name.clone(),
            base_url: entry.base_url.trim_end_matches('/').to_string(),
            api_key: entry.api_key.clone(),
        }
    }
}

/// A tool call requested by the model. `arguments` is the raw JSON string
/// exactly as the provider sent it — parsing is the caller's concern.
#[derive(Debug, Clone)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

/// Parsed chat completion. `raw` keeps the full response body for the
/// terminal log.
#[derive(Debug, Clone)]
pub struct ChatCompletion {
    pub content: String,
    pub tool_calls: Vec<ToolCallRequest>,
    pub usage: Option<Usage>,
    pub raw: Value,
}

/// One record per provider call, forwarded to the usage log.
#[derive(Debug, Clone)]
pub struct UsageEvent {
    pub provider_id: String,
    pub model: String,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
}

pub trait UsageRecorder: Send + Sync {
    fn record(&self, event: UsageEvent);
}

pub struct ProviderClient {
    http: reqwest::Client,
    usage: Option<Arc<dyn UsageRecorder>>,
}

impl ProviderClient {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
            usage: None,
        }
    }

    pub fn with_usage_recorder(mut self, recorder: Arc<dyn UsageRecorder>) -> Self {
        self.usage = Some(recorder);
        self
    }

    /// One chat completion. `tools` are OpenAI function schemas; when
    /// present, `tool_choice: "auto"` is sent along.
    pub async fn chat(
        &self,
        target: &ProviderTarget,
        model: &str,
        messages: &[Value],
        tools: Option<&[Value]>,
        temperature: f64,
        timeout: Duration,
    ) -> Result<ChatCompletion> {
        let mut payload = json!({
            "model": model,
            "messages": messages,
            "temperature": temperature,
        });
        if let Some(tools) = tools {
            if !tools.is_empty() {
                payload["tools"] = json!(tools);
                payload["tool_choice"] = json!("auto");
            }
        }

        let raw = self.post_json(target, model, "/chat/completions", &payload, timeout).await?;
        Ok(parse_chat_completion(raw))
    }

    /// Embedding vectors for `input`, in input order. The API may return
    /// entries out of order; they are reordered by `index` before returning.
    pub async fn embeddings(
        &self,
        target: &ProviderTarget,
        model: &str,
        input: &[String],
        timeout: Duration,
    ) -> Result<Vec<Vec<f32>>> {
        let payload = json!({ "model": model, "input": input });
        let raw = self.post_json(target, model, "/embeddings", &payload, timeout).await?;

        #[derive(Deserialize)]
        struct EmbeddingItem {
            index: usize,
            embedding: Vec<f32>,
        }
        #[derive(Deserialize)]
        struct EmbeddingResponse {
            data: Vec<EmbeddingItem>,
        }

        let resp: EmbeddingResponse =
            serde_json::from_value(raw).map_err(|e| ProviderError::Parse(e.to_string()))?;
        let mut items = resp.data;
        items.sort_by_key(|item| item.index);
        Ok(items.into_iter().map(|item| item.embedding).collect())
    }

    /// Generate an image via the chat-completions image modality.
    /// Returns raw bytes plus the MIME type from the returned data URI.
    pub async fn generate_image(
        &self,
        target: &ProviderTarget,
        model: &str,
        prompt: &str,
        aspect_ratio: &str,
        timeout: Duration,
    ) -> Result<(Vec<u8>, String)> {
        let payload = json!({
            "model": model,
            "messages": [{ "role": "user", "content": prompt }],
            "modalities": ["image", "text"],
            "image_config": { "aspect_ratio": aspect_ratio },
        });
        let raw = self.post_json(target, model, "/chat/completions", &payload, timeout).await?;

        let data_uri = raw
            .pointer("/choices/0/message/images/0/image_url/url")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ProviderError::Parse("Antwort enthaelt kein Bild (images[] leer)".to_string())
            })?;
        decode_data_uri(data_uri)
    }

    /// Text-to-speech via the chat-completions audio modality.
    pub async fn speech(
        &self,
        target: &ProviderTarget,
        model: &str,
        text: &str,
        timeout: Duration,
    ) -> Result<(Vec<u8>, String)> {
        let payload = json!({
            "model": model,
            "messages": [{ "role": "user", "content": text }],
            "modalities": ["text", "audio"],
            "audio": { "voice": "alloy", "format": "mp3" },
        });
        let raw = self.post_json(target, model, "/chat/completions", &payload, timeout).await?;

        let b64 = raw
            .pointer("/choices/0/message/audio/data")
            .and_then(Value::as_str)
            .ok_or_else(|| ProviderError::Parse("Antwort enthaelt kein Audio".to_string()))?;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(b64)
            .map_err(|e| ProviderError::Parse(format!("Audio-Base64 ungueltig: {e}")))?;
        Ok((bytes, "audio/mpeg".to_string()))
    }

    /// Speech-to-text via a multimodal chat model (`input_audio` content part).
    pub async fn transcribe_chat(
        &self,
        target: &ProviderTarget,
        model: &str,
        audio: &[u8],
        format: &str,
        timeout: Duration,
    ) -> Result<String> {
        let b64 = base64::engine::general_purpose::STANDARD.encode(audio);
        let payload = json!({
            "model": model,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text",
                      "text": "Transkribiere diese Audionachricht. Gib NUR den gesprochenen Text zurueck, ohne Kommentar." },
                    { "type": "input_audio",
                      "input_audio": { "data": b64, "format": format } }
                ]
            }],
        });
        let raw = self.post_json(target, model, "/chat/completions", &payload, timeout).await?;
        Ok(raw
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .unwrap_or("")
            .trim()
            .to_string())
    }

    /// Speech-to-text via the OpenAI Whisper endpoint (multipart upload).
    pub async fn transcribe_whisper(
        &self,
        api_key: &str,
        audio: Vec<u8>,
        format: &str,
    ) -> Result<String> {
        let part = reqwest::multipart::Part::bytes(audio)
            .file_name(format!("audio.{format}"))
            .mime_str(&format!("audio/{format}"))
            .map_err(|e| ProviderError::Parse(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", "whisper-1");

        let resp = self
            .http
            .post(WHISPER_URL)
            .bearer_auth(api_key)
            .multipart(form)
            .timeout(Duration::from_secs(60))
            .send()
            .await?;

        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        if !(200..300).contains(&status) {
            return Err(api_error(status, &body));
        }

        let parsed: Value =
            serde_json::from_str(&body).map_err(|e| ProviderError::Parse(e.to_string()))?;
        Ok(parsed
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or("")
            .trim()
            .to_string())
    }

    async fn post_json(
        &self,
        target: &ProviderTarget,
        model: &str,
        path: &str,
        payload: &Value,
        timeout: Duration,
    ) -> Result<Value> {
        let url = format!("{}{}", target.base_url, path);
        let body = serde_json::to_vec(payload).map_err(|e| ProviderError::Parse(e.to_string()))?;
        let bytes_sent = body.len() as u64;

        debug!(provider = %target.name, %model, %url, "provider request");

        let resp = self
            .http
            .post(&url)
            .bearer_auth(&target.api_key)
            .header("content-type", "application/json")
            .header("HTTP-Referer", "https://guenther.app")
            .header("X-Title", "Guenther")
            .body(body)
            .timeout(timeout)
            .send()
            .await?;

        let status = resp.status().as_u16();
        let text = resp.text().await.unwrap_or_default();
        if !(200..300).contains(&status) {
            warn!(provider = %target.name, status, "provider API error");
            return Err(api_error(status, &text));
        }

        let raw: Value =
            serde_json::from_str(&text).map_err(|e| ProviderError::Parse(e.to_string()))?;

        if let Some(recorder) = &self.usage {
            let usage: Option<Usage> = raw
                .get("usage")
                .and_then(|u| serde_json::from_value(u.clone()).ok());
            recorder.record(UsageEvent {
                provider_id: target.id.clone(),
                model: model.to_string(),
                bytes_sent,
                bytes_received: text.len() as u64,
                prompt_tokens: usage.map(|u| u.prompt_tokens),
                completion_tokens: usage.map(|u| u.completion_tokens),
            });
        }

        Ok(raw)
    }
}

impl Default for ProviderClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Unwrap `error.message` from an error body when present; fall back to the
/// raw body text.
fn api_error(status: u16, body: &str) -> ProviderError {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .and_then(Value::as_str)
                .map(String::from)
        })
        .unwrap_or_else(|| body.trim().to_string());
    ProviderError::Api { status, message }
}

/// Parse a raw chat-completions response body. Public so test harnesses can
/// script provider turns from fixture JSON.
pub fn parse_chat_completion(raw: Value) -> ChatCompletion {
    let message = raw.pointer("/choices/0/message");

    let content = message
        .and_then(|m| m.get("content"))
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();

    let tool_calls = message
        .and_then(|m| m.get("tool_calls"))
        .and_then(Value::as_array)
        .map(|calls| {
            calls
                .iter()
                .map(|tc| ToolCallRequest {
                    id: tc.get("id").and_then(Value::as_str).unwrap_or("").to_string(),
                    name: tc
                        .pointer("/function/name")
                        .and_then(Value::as_str)
                        .unwrap_or("")
                        .to_string(),
                    arguments: tc
                        .pointer("/function/arguments")
                        .and_then(Value::as_str)
                        .unwrap_or("{}")
                        .to_string(),
                })
                .collect()
        })
        .unwrap_or_default();

    let usage = raw
        .get("usage")
        .and_then(|u| serde_json::from_value(u.clone()).ok());

    ChatCompletion {
        content,
        tool_calls,
        usage,
        raw,
    }
}

/// Split a `data:<mime>;base64,<payload>` URI into decoded bytes + MIME.
pub fn decode_data_uri(uri: &str) -> Result<(Vec<u8>, String)> {
    let rest = uri
        .strip_prefix("data:")
        .ok_or_else(|| ProviderError::Parse("keine data-URI".to_string()))?;
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| ProviderError::Parse("data-URI ohne Payload".to_string()))?;
    let mime = header
        .split(';')
        .next()
        .unwrap_or("application/octet-stream")
        .to_string();
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(payload)
        .map_err(|e| ProviderError::Parse(format!("Base64 ungueltig: {e}")))?;
    Ok((bytes, mime))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_plain_text_completion() {
        let raw = json!({
            "choices": [{ "message": { "content": "Hi!" }, "finish_reason": "stop" }],
            "usage": { "prompt_tokens": 10, "completion_tokens": 2, "total_tokens": 12 }
        });
        let parsed = parse_chat_completion(raw);
        assert_eq!(parsed.content, "Hi!");
        assert!(parsed.tool_calls.is_empty());
        assert_eq!(parsed.usage.unwrap().prompt_tokens, 10);
    }

    #[test]
    fn parse_tool_call_completion() {
        let raw = json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "a",
                        "type": "function",
                        "function": { "name": "get_current_time", "arguments": "{\"timezone\":\"UTC\"}" }
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        });
        let parsed = parse_chat_completion(raw);
        assert_eq!(parsed.content, "");
        assert_eq!(parsed.tool_calls.len(), 1);
        assert_eq!(parsed.tool_calls[0].id, "a");
        assert_eq!(parsed.tool_calls[0].name, "get_current_time");
        assert_eq!(parsed.tool_calls[0].arguments, "{\"timezone\":\"UTC\"}");
    }

    #[test]
    fn parse_empty_choices_is_empty_response() {
        let parsed = parse_chat_completion(json!({ "choices": [] }));
        assert_eq!(parsed.content, "");
        assert!(parsed.tool_calls.is_empty());
        assert!(parsed.usage.is_none());
    }

    #[test]
    fn api_error_unwraps_error_message() {
        let err = api_error(402, r#"{"error":{"message":"Insufficient credits"}}"#);
        match err {
            ProviderError::Api { status, message } => {
                assert_eq!(status, 402);
                assert_eq!(message, "Insufficient credits");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn api_error_falls_back_to_body() {
        let err = api_error(500, "upstream exploded");
        match err {
            ProviderError::Api { message, .. } => assert_eq!(message, "upstream exploded"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn data_uri_round_trip() {
        let (bytes, mime) = decode_data_uri("data:image/png;base64,aGVsbG8=").unwrap();
        assert_eq!(bytes, b"hello");
        assert_eq!(mime, "image/png");
        assert!(decode_data_uri("not-a-uri").is_err());
    }
}
