//! Consumes fired autoprompt records from the scheduler engine and replays
//! their prompts through the agent. A misbehaving prompt never takes the
//! runner down: failures land in the record's `last_error`.

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{error, info};

use guenther_agent::{media, AgentRunOptions};
use guenther_core::log::null_sink;
use guenther_scheduler::AutopromptRecord;

use crate::app::AppState;

/// Drain the fired-record channel for the lifetime of the process.
pub fn spawn(state: Arc<AppState>, mut fired_rx: mpsc::Receiver<AutopromptRecord>) {
    tokio::spawn(async move {
        while let Some(record) = fired_rx.recv().await {
            run_record(&state, record).await;
        }
    });
}

/// Execute one autoprompt: ensure its chat, assemble history, run the agent,
/// persist the outcome. Also the `run_now` path.
pub async fn run_record(state: &Arc<AppState>, record: AutopromptRecord) {
    // Work on the freshest copy — the record may have been edited since the
    // trigger fired.
    let Some(mut record) = state.autoprompts.get(&record.id) else {
        return;
    };

    info!(name = %record.name, "Autoprompt läuft...");
    let now_iso = chrono::Utc::now().to_rfc3339();

    let outcome = execute(state, &mut record).await;

    record.last_run = Some(now_iso.clone());
    match outcome {
        Ok(chat_id) => {
            record.last_error = None;
            state.broadcast_event(
                "autoprompt_done",
                json!({
                    "id": record.id,
                    "name": record.name,
                    "chat_id": chat_id,
                    "last_run": now_iso,
                }),
            );
            info!(name = %record.name, "Autoprompt abgeschlossen.");
        }
        Err(e) => {
            error!(name = %record.name, error = %e, "Autoprompt Fehler");
            record.last_error = Some(e);
        }
    }

    if let Err(e) = state.autoprompts.save(&record) {
        error!(error = %e, "autoprompt state write failed");
    }
}

async fn execute(state: &Arc<AppState>, record: &mut AutopromptRecord) -> Result<Option<i64>, String> {
    // Dedicated chat: create once, reuse always. A deleted chat is replaced.
    let chat_id = if record.save_to_chat {
        let existing = record
            .chat_id
            .filter(|id| state.chats.get_chat(*id).ok().flatten().is_some());
        let chat_id = match existing {
            Some(id) => id,
            None => {
                let title = format!("Autoprompt: {}", record.name);
                let id = state
                    .chats
                    .create_chat(&title, None)
                    .map_err(|e| e.to_string())?;
                record.chat_id = Some(id);
                id
            }
        };
        Some(chat_id)
    } else {
        None
    };

    // Full chat history plus the stored prompt as a synthetic user turn.
    let mut messages: Vec<Value> = match chat_id {
        Some(id) => state
            .chats
            .get_messages(id)
            .map_err(|e| e.to_string())?
            .iter()
            .filter(|m| m.role == "user" || m.role == "assistant")
            .map(|m| json!({ "role": m.role, "content": m.content }))
            .collect(),
        None => Vec::new(),
    };
    messages.push(json!({ "role": "user", "content": record.prompt }));

    let mut opts = AgentRunOptions {
        chat_id,
        ..Default::default()
    };
    if let Some(agent_id) = &record.agent_id {
        if let Some(profile) = state.agents.get(agent_id) {
            if !profile.system_prompt.trim().is_empty() {
                opts.system_prompt = Some(profile.system_prompt.clone());
            }
            opts.agent_provider_id = profile.provider_id.clone();
            opts.agent_model = profile.model.clone();
        }
    }

    // Scheduled runs have no terminal attached.
    let settings = state.settings.load();
    let log = null_sink();
    let response = state.agent.run_agent(&messages, &settings, &log, opts).await;

    if let Some(chat_id) = chat_id {
        let stored = media::extract_and_store(&response, chat_id, &state.files);
        state
            .chats
            .add_message(chat_id, "user", &record.prompt)
            .map_err(|e| e.to_string())?;
        state
            .chats
            .add_message(chat_id, "assistant", &stored)
            .map_err(|e| e.to_string())?;
    }

    Ok(chat_id)
}
