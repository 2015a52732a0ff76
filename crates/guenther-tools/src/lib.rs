//! Tool system for the Guenther agent.
//!
//! The registry maps tool names to descriptors; descriptors bind a JSON
//! schema to a handler. Handlers come in three origins: compiled-in
//! built-ins, custom tools (LLM-built child processes under the data root),
//! and external tool servers (long-lived children speaking a line-delimited
//! JSON-RPC protocol).

pub mod builder;
pub mod builtin;
pub mod custom;
pub mod descriptor;
pub mod error;
pub mod external;
pub mod registry;
pub mod rpc;

pub use descriptor::{
    HandlerContext, SettingsField, ToolDescriptor, ToolHandler, ToolOrigin,
};
pub use error::{Result, ToolError};
pub use registry::ToolRegistry;
