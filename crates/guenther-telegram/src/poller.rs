//! The gateway loop: getUpdates long-poll, authorization, per-user chat
//! sessions, media routing, and reply fan-out. Every inbound message is
//! processed in its own task so the poll loop never blocks on the agent.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde_json::{json, Value};
use tokio::sync::watch;
use tracing::{error, info, warn};

use guenther_agent::media::split_media;
use guenther_agent::{media, AgentRunOptions, AgentRuntime};
use guenther_core::config::SettingsStore;
use guenther_core::log::{EventSink, LogSink};
use guenther_store::{ChatStore, FileStore};

use crate::api::TelegramApi;
use crate::send::split_chunks;
use crate::stt;
use crate::typing::TypingHandle;

const PPTX_MIME: &str =
    "application/vnd.openxmlformats-officedocument.presentationml.presentation";

pub struct GatewayPoller {
    api: Arc<TelegramApi>,
    agent: Arc<AgentRuntime>,
    chats: Arc<ChatStore>,
    files: Arc<FileStore>,
    settings: SettingsStore,
    log: LogSink,
    events: EventSink,
    /// username → chat id, process-local. `/new` replaces the entry.
    sessions: DashMap<String, i64>,
}

impl GatewayPoller {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        bot_token: &str,
        agent: Arc<AgentRuntime>,
        chats: Arc<ChatStore>,
        files: Arc<FileStore>,
        settings: SettingsStore,
        log: LogSink,
        events: EventSink,
    ) -> Self {
        Self {
            api: Arc::new(TelegramApi::new(bot_token)),
            agent,
            chats,
            files,
            settings,
            log,
            events,
            sessions: DashMap::new(),
        }
    }

    /// Long-poll loop. Backs off 5 seconds on transport failure; exits only
    /// when `stop` flips to true.
    pub async fn run(self: Arc<Self>, mut stop: watch::Receiver<bool>) {
        info!("Telegram polling loop started");
        let mut offset: i64 = 0;

        loop {
            if *stop.borrow() {
                break;
            }

            let updates = tokio::select! {
                result = self.api.get_updates(offset) => result,
                _ = stop.changed() => {
                    if *stop.borrow() { break; }
                    continue;
                }
            };

            let updates = match updates {
                Ok(u) => u,
                Err(e) => {
                    error!(error = %e, "getUpdates error");
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_secs(5)) => {}
                        _ = stop.changed() => { if *stop.borrow() { break; } }
                    }
                    continue;
                }
            };

            for update in updates {
                if let Some(update_id) = update.get("update_id").and_then(Value::as_i64) {
                    offset = update_id + 1;
                }
                if let Err(e) = self.handle_update(update).await {
                    error!(error = %e, "error handling Telegram update");
                }
            }
        }
        info!("Telegram polling loop stopped");
    }

    async fn handle_update(self: &Arc<Self>, update: Value) -> Result<(), String> {
        let Some(msg) = update.get("message") else {
            return Ok(());
        };

        let telegram_chat_id = msg
            .pointer("/chat/id")
            .and_then(Value::as_i64)
            .ok_or("message without chat id")?;
        let username = msg
            .pointer("/from/username")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();

        let settings = self.settings.load();
        let allowed = &settings.telegram.allowed_users;

        // Persist username → chat id so send_telegram can target this user.
        if !username.is_empty() {
            self.agent.tg_users().record(&username, telegram_chat_id);
        }

        // Allow-list (deny-by-default).
        if username.is_empty() || !allowed.iter().any(|u| u == &username) {
            let display = if username.is_empty() {
                "(kein Username)".to_string()
            } else {
                format!("@{username}")
            };
            self.api
                .send_message(
                    telegram_chat_id,
                    &format!(
                        "Dein Telegram-Username {display} ist nicht freigeschaltet. \
                         Bitte kontaktiere den Administrator."
                    ),
                )
                .await;
            return Ok(());
        }

        // Reject unsupported media (photos + voice/audio are fine).
        for unsupported in ["video", "document", "sticker", "animation"] {
            if msg.get(unsupported).is_some() {
                self.api
                    .send_message(
                        telegram_chat_id,
                        "Aktuell werden nur Text-Nachrichten, Fotos und Sprachnachrichten unterstützt.",
                    )
                    .await;
                return Ok(());
            }
        }

        // Voice / audio → STT → treated as text.
        if let Some(file_info) = msg.get("voice").or_else(|| msg.get("audio")) {
            let file_id = file_info
                .get("file_id")
                .and_then(Value::as_str)
                .ok_or("voice without file_id")?
                .to_string();
            let mime = file_info
                .get("mime_type")
                .and_then(Value::as_str)
                .unwrap_or("audio/ogg");
            let audio_format = stt::audio_format_from_mime(mime);

            let chat_id = self.ensure_session(&username);
            let this = Arc::clone(self);
            tokio::spawn(async move {
                this.process_voice(telegram_chat_id, &username, chat_id, &file_id, &audio_format)
                    .await;
            });
            return Ok(());
        }

        // Photo → highest-resolution variant, stashed under the session key.
        if let Some(photos) = msg.get("photo").and_then(Value::as_array) {
            let caption = msg
                .get("caption")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .unwrap_or("Was soll ich mit diesem Bild machen?")
                .to_string();
            let file_id = photos
                .last()
                .and_then(|p| p.get("file_id"))
                .and_then(Value::as_str)
                .ok_or("photo without file_id")?
                .to_string();

            let chat_id = self.ensure_session(&username);
            let this = Arc::clone(self);
            tokio::spawn(async move {
                match this.api.download_file(&file_id).await {
                    Ok((bytes, mime)) => {
                        use base64::Engine;
                        let b64 = base64::engine::general_purpose::STANDARD.encode(&bytes);
                        this.process_message(
                            telegram_chat_id,
                            &username,
                            chat_id,
                            caption,
                            Some((b64, mime)),
                        )
                        .await;
                    }
                    Err(e) => {
                        warn!(error = %e, "photo download failed");
                        this.api
                            .send_message(
                                telegram_chat_id,
                                "Fehler: Bild konnte nicht heruntergeladen werden.",
                            )
                            .await;
                    }
                }
            });
            return Ok(());
        }

        // Plain text.
        let text = msg
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or("")
            .trim()
            .to_string();
        if text.is_empty() {
            return Ok(());
        }

        if let Some(rest) = text.strip_prefix("/new") {
            let title = rest.trim();
            let title = if title.is_empty() {
                format!("Telegram: @{username}")
            } else {
                title.to_string()
            };
            match self.chats.create_chat(&title, None) {
                Ok(chat_id) => {
                    self.sessions.insert(username.clone(), chat_id);
                    (self.events)("chat_created", json!({ "chat_id": chat_id, "title": title }));
                    self.api
                        .send_message(
                            telegram_chat_id,
                            &format!("Neue Chat-Session gestartet: \"{title}\""),
                        )
                        .await;
                }
                Err(e) => error!(error = %e, "chat creation failed"),
            }
            return Ok(());
        }

        if text == "/start" {
            self.api
                .send_message(
                    telegram_chat_id,
                    "Hallo! Ich bin Guenther, dein MCP-Agent. \
                     Schreib einfach los oder nutze /new <Name> für eine neue Chat-Session. \
                     Du kannst mir auch Fotos schicken!",
                )
                .await;
            return Ok(());
        }

        let chat_id = self.ensure_session(&username);
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.process_message(telegram_chat_id, &username, chat_id, text, None)
                .await;
        });
        Ok(())
    }

    /// Chat bound to this username, created lazily.
    fn ensure_session(&self, username: &str) -> i64 {
        if let Some(existing) = self.sessions.get(username) {
            // A stale entry can point at a deleted chat.
            if self.chats.get_chat(*existing).ok().flatten().is_some() {
                return *existing;
            }
        }
        let title = format!("Telegram: @{username}");
        let chat_id = self.chats.create_chat(&title, None).unwrap_or_default();
        self.sessions.insert(username.to_string(), chat_id);
        (self.events)("chat_created", json!({ "chat_id": chat_id, "title": title }));
        chat_id
    }

    async fn process_voice(
        self: &Arc<Self>,
        telegram_chat_id: i64,
        username: &str,
        chat_id: i64,
        file_id: &str,
        audio_format: &str,
    ) {
        let typing = TypingHandle::start(Arc::clone(&self.api), telegram_chat_id);

        let transcript = async {
            let (audio, _) = self
                .api
                .download_file(file_id)
                .await
                .map_err(|_| "Fehler: Sprachnachricht konnte nicht heruntergeladen werden.".to_string())?;

            let settings = self.settings.load();
            let transcript =
                stt::transcribe(self.agent.provider_client(), &settings, audio, audio_format)
                    .await?;
            if transcript.is_empty() {
                return Err("Konnte die Sprachnachricht nicht transkribieren.".to_string());
            }
            Ok::<String, String>(transcript)
        }
        .await;

        typing.stop();

        match transcript {
            Ok(transcript) => {
                info!(len = transcript.len(), "STT result");
                self.api
                    .send_message(telegram_chat_id, &format!("[Sprache erkannt]: {transcript}"))
                    .await;
                // The transcript flows through the normal text path.
                self.process_message(telegram_chat_id, username, chat_id, transcript, None)
                    .await;
            }
            Err(message) => {
                self.api.send_message(telegram_chat_id, &message).await;
            }
        }
    }

    async fn process_message(
        self: &Arc<Self>,
        telegram_chat_id: i64,
        username: &str,
        chat_id: i64,
        text: String,
        image: Option<(String, String)>,
    ) {
        let typing = TypingHandle::start(Arc::clone(&self.api), telegram_chat_id);
        let session_key = format!("tg_{username}");
        let has_image = image.is_some();

        let outcome = self
            .run_turn(chat_id, &session_key, &text, image)
            .await;

        typing.stop();
        if has_image {
            self.agent.blobs().remove(&session_key);
        }

        match outcome {
            Ok(response) => {
                let parts = split_media(&response);
                if !parts.text.is_empty() {
                    for chunk in split_chunks(&parts.text) {
                        self.api.send_message(telegram_chat_id, &chunk).await;
                    }
                }
                for image_bytes in parts.images {
                    self.api.send_photo(telegram_chat_id, image_bytes).await;
                }
                for audio_bytes in parts.audio {
                    self.api.send_audio(telegram_chat_id, audio_bytes).await;
                }
                for html in parts.pdf_html {
                    // PDF conversion is out-of-band; the HTML source is
                    // delivered as a document.
                    self.api
                        .send_document(
                            telegram_chat_id,
                            "report.html",
                            "text/html",
                            html.into_bytes(),
                        )
                        .await;
                }
                for (filename, bytes) in parts.pptx {
                    self.api
                        .send_document(telegram_chat_id, &filename, PPTX_MIME, bytes)
                        .await;
                }
            }
            Err(e) => {
                error!(error = %e, "error processing Telegram message");
                self.api
                    .send_message(telegram_chat_id, &format!("Fehler bei der Verarbeitung: {e}"))
                    .await;
            }
        }
    }

    /// One full agent turn: persist the user message, assemble history, run
    /// the agent, persist the reply. Returns the raw terminal string (with
    /// media markers) for fan-out.
    async fn run_turn(
        &self,
        chat_id: i64,
        session_key: &str,
        text: &str,
        image: Option<(String, String)>,
    ) -> Result<String, String> {
        self.chats
            .add_message(chat_id, "user", text)
            .map_err(|e| e.to_string())?;
        (self.events)("chat_updated", json!({ "chat_id": chat_id, "title": Value::Null }));

        let history = self.chats.get_messages(chat_id).map_err(|e| e.to_string())?;
        let mut messages: Vec<Value> = history
            .iter()
            .filter(|m| m.role == "user" || m.role == "assistant")
            .map(|m| json!({ "role": m.role, "content": m.content }))
            .collect();

        // First user message names the chat.
        if messages.len() == 1 {
            let title = truncate_title(text);
            let _ = self.chats.update_chat_title(chat_id, &title);
            (self.events)("chat_updated", json!({ "chat_id": chat_id, "title": title }));
        }

        // Stash the photo and tell the model how to reach it.
        if let Some((b64, mime)) = image {
            self.agent.blobs().store(session_key, b64, mime);
            if let Some(last_user) = messages
                .iter_mut()
                .rev()
                .find(|m| m["role"] == "user")
            {
                let hint = format!(
                    "\n\n[System: Bild vom Nutzer empfangen (Session-Key: '{session_key}'). \
                     Für Bildbearbeitung: process_image(session_key='{session_key}', operation='...'). \
                     Operationen: blur, grayscale, rotate, resize, sharpen, \
                     brightness, contrast, flip_horizontal, flip_vertical, invert]"
                );
                let combined = format!(
                    "{}{hint}",
                    last_user["content"].as_str().unwrap_or_default()
                );
                last_user["content"] = json!(combined);
            }
        }

        let settings = self.settings.load();

        (self.events)("agent_start", json!({ "chat_id": chat_id }));
        let response = self
            .agent
            .run_agent(
                &messages,
                &settings,
                &self.log,
                AgentRunOptions {
                    chat_id: Some(chat_id),
                    ..Default::default()
                },
            )
            .await;

        // Persist with blobs extracted into the chat's file directory.
        let stored = media::extract_and_store(&response, chat_id, &self.files);
        self.chats
            .add_message(chat_id, "assistant", &stored)
            .map_err(|e| e.to_string())?;
        (self.events)("agent_response", json!({ "chat_id": chat_id, "content": stored }));
        (self.events)("agent_end", json!({ "chat_id": chat_id }));

        Ok(response)
    }
}

fn truncate_title(text: &str) -> String {
    if text.chars().count() > 50 {
        let truncated: String = text.chars().take(50).collect();
        format!("{truncated}...")
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_truncates_at_50_chars() {
        assert_eq!(truncate_title("kurz"), "kurz");
        let long = "x".repeat(60);
        let title = truncate_title(&long);
        assert_eq!(title.chars().count(), 53);
        assert!(title.ends_with("..."));

        // Multi-byte input must not split a character.
        let umlauts = "ü".repeat(60);
        let title = truncate_title(&umlauts);
        assert!(title.ends_with("..."));
        assert_eq!(title.chars().count(), 53);
    }
}
