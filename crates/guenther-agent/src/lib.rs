pub mod media;
pub mod orchestrator;
pub mod router;

pub use orchestrator::{AgentRunOptions, AgentRuntime, SYSTEM_PROMPT};
