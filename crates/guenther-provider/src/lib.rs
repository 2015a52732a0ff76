pub mod client;
pub mod error;

pub use client::{
    parse_chat_completion, ChatCompletion, ProviderClient, ProviderTarget, ToolCallRequest,
    Usage, UsageEvent, UsageRecorder,
};
pub use error::{ProviderError, Result};
