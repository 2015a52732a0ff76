//! Bridges provider-call usage events into the append-only usage_log table.

use std::sync::Arc;

use guenther_provider::{UsageEvent, UsageRecorder};
use guenther_store::{ChatStore, UsageEntry};

pub struct UsageLogRecorder {
    chats: Arc<ChatStore>,
}

impl UsageLogRecorder {
    pub fn new(chats: Arc<ChatStore>) -> Self {
        Self { chats }
    }
}

impl UsageRecorder for UsageLogRecorder {
    fn record(&self, event: UsageEvent) {
        let entry = UsageEntry {
            timestamp: chrono::Utc::now().to_rfc3339(),
            provider_id: event.provider_id,
            model: event.model,
            bytes_sent: event.bytes_sent,
            bytes_received: event.bytes_received,
            prompt_tokens: event.prompt_tokens,
            completion_tokens: event.completion_tokens,
        };
        if let Err(e) = self.chats.record_usage(&entry) {
            tracing::warn!(error = %e, "usage log write failed");
        }
    }
}
