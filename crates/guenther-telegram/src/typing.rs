//! Typing indicator — sends `sendChatAction` every 4 seconds while an agent
//! run is in progress. Telegram's typing status expires after ~5 seconds.

use std::sync::Arc;
use std::time::Duration;

use crate::api::TelegramApi;

/// Handle to a background typing heartbeat.
///
/// Call `stop()` once the response is ready; the loop is aborted
/// immediately and never outlives the request.
pub struct TypingHandle(tokio::task::JoinHandle<()>);

impl TypingHandle {
    /// Send one typing action immediately, then every 4 seconds.
    pub fn start(api: Arc<TelegramApi>, chat_id: i64) -> Self {
        let handle = tokio::spawn(async move {
            loop {
                api.send_typing(chat_id).await;
                tokio::time::sleep(Duration::from_secs(4)).await;
            }
        });
        TypingHandle(handle)
    }

    pub fn stop(self) {
        self.0.abort();
    }
}
