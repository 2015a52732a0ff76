//! Structured log bus for the Guenther terminal.
//!
//! Every agent turn streams `{type, ...}` records to the frontend. The bus
//! fans events out over a tokio broadcast channel (one logical channel per
//! process, so per-turn order is preserved at the subscriber side) and can
//! additionally collect a turn's events in memory.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

const BROADCAST_CAPACITY: usize = 1024;

/// One record on the terminal stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LogEvent {
    Header { message: String },
    Text { message: String },
    Json { label: String, data: serde_json::Value },
}

impl LogEvent {
    pub fn header(message: impl Into<String>) -> Self {
        LogEvent::Header {
            message: message.into(),
        }
    }

    pub fn text(message: impl Into<String>) -> Self {
        LogEvent::Text {
            message: message.into(),
        }
    }

    pub fn json(label: impl Into<String>, data: serde_json::Value) -> Self {
        LogEvent::Json {
            label: label.into(),
            data,
        }
    }
}

/// Callable log sink handed to the orchestrator and tool handlers.
pub type LogSink = Arc<dyn Fn(LogEvent) + Send + Sync>;

/// Named-event sink for frontend notifications (`chat_created`,
/// `agent_response`, `autoprompt_done`, …). The WS layer provides the
/// implementation; background components only know the shape.
pub type EventSink = Arc<dyn Fn(&str, serde_json::Value) + Send + Sync>;

/// `[HH:MM:SS]` prefix used in terminal text records.
pub fn ts() -> String {
    chrono::Local::now().format("%H:%M:%S").to_string()
}

/// Fan-out bus for terminal log events.
pub struct TerminalLog {
    tx: broadcast::Sender<LogEvent>,
}

impl TerminalLog {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self { tx }
    }

    /// New subscriber (WS connection) joins the stream.
    pub fn subscribe(&self) -> broadcast::Receiver<LogEvent> {
        self.tx.subscribe()
    }

    /// Push an event to all subscribers. Dropped silently when nobody listens.
    pub fn emit(&self, event: LogEvent) {
        let _ = self.tx.send(event);
    }

    /// A sink bound to this bus.
    pub fn sink(self: &Arc<Self>) -> LogSink {
        let bus = Arc::clone(self);
        Arc::new(move |event| bus.emit(event))
    }
}

impl Default for TerminalLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Sink that discards everything (scheduler runs without a terminal).
pub fn null_sink() -> LogSink {
    Arc::new(|_| {})
}

/// Sink that records events into a shared Vec for one request.
pub fn collector() -> (LogSink, Arc<Mutex<Vec<LogEvent>>>) {
    let events: Arc<Mutex<Vec<LogEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let events2 = Arc::clone(&events);
    let sink: LogSink = Arc::new(move |event| {
        events2.lock().unwrap().push(event);
    });
    (sink, events)
}
