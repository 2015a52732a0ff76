//! Speech-to-text dispatch: either the OpenAI Whisper endpoint or a
//! multimodal chat model, chosen by configuration. Errors are user-facing
//! German strings sent straight back over Telegram.

use std::time::Duration;

use guenther_core::config::Settings;
use guenther_provider::{ProviderClient, ProviderTarget};

/// Transcribe a voice/audio message. Returns the transcript or a message
/// suitable for the user.
pub async fn transcribe(
    llm: &ProviderClient,
    settings: &Settings,
    audio: Vec<u8>,
    audio_format: &str,
) -> Result<String, String> {
    if settings.use_openai_whisper {
        let api_key = settings.openai_api_key.trim();
        if api_key.is_empty() {
            return Err("Whisper aktiviert, aber kein OpenAI API-Key konfiguriert.".to_string());
        }
        tracing::info!(format = audio_format, bytes = audio.len(), "STT via Whisper");
        return llm
            .transcribe_whisper(api_key, audio, audio_format)
            .await
            .map_err(|e| format!("Fehler bei Spracherkennung: {e}"));
    }

    let stt_model = settings.stt_model.trim();
    if stt_model.is_empty() {
        return Err(
            "Kein STT-Modell konfiguriert. Bitte in den Einstellungen ein \
             Audio-fähiges Modell eintragen (z.B. google/gemini-2.5-flash) \
             oder OpenAI Whisper aktivieren."
                .to_string(),
        );
    }

    let entry = settings.default_provider_entry();
    let mut target = ProviderTarget::from_entry(&settings.default_provider, &entry);
    if target.api_key.is_empty() {
        target.api_key = settings.openrouter_api_key.clone();
    }

    tracing::info!(model = stt_model, format = audio_format, bytes = audio.len(), "STT via Chat-Modell");
    llm.transcribe_chat(
        &target,
        stt_model,
        &audio,
        audio_format,
        Duration::from_secs(settings.llm_timeout),
    )
    .await
    .map_err(|e| format!("Fehler bei Spracherkennung: {e}"))
}

/// Map a Telegram MIME type to the short format tag the STT APIs expect.
pub fn audio_format_from_mime(mime: &str) -> String {
    let format = mime
        .split('/')
        .nth(1)
        .unwrap_or("ogg")
        .split(';')
        .next()
        .unwrap_or("ogg");
    if format == "mpeg" {
        "mp3".to_string()
    } else {
        format.to_string()
    }
}
