use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use guenther_core::config::{ProviderEntry, Settings, ToolSettings};
use guenther_core::log::LogSink;
use guenther_provider::{ProviderClient, ProviderTarget};
use guenther_store::{ImageBlobStore, TelegramUserMap};

use crate::error::Result;
use crate::registry::ToolRegistry;

/// Provenance tag, used for bulk deregistration on reload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolOrigin {
    Builtin,
    Custom,
    External(String),
}

impl std::fmt::Display for ToolOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ToolOrigin::Builtin => write!(f, "builtin"),
            ToolOrigin::Custom => write!(f, "custom"),
            ToolOrigin::External(id) => write!(f, "external:{id}"),
        }
    }
}

/// One field descriptor for a tool's settings UI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingsField {
    pub key: String,
    pub label: String,
    /// Field kind: "text" or "password".
    #[serde(rename = "type", default = "default_kind")]
    pub kind: String,
    #[serde(default)]
    pub placeholder: Option<String>,
    #[serde(default)]
    pub default: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

fn default_kind() -> String {
    "text".to_string()
}

impl SettingsField {
    pub fn text(key: &str, label: &str, placeholder: &str, description: &str) -> Self {
        Self {
            key: key.to_string(),
            label: label.to_string(),
            kind: "text".to_string(),
            placeholder: Some(placeholder.to_string()),
            default: None,
            description: Some(description.to_string()),
        }
    }
}

/// Everything a handler may need at call time, injected explicitly —
/// no thread-locals, no global lookups.
pub struct HandlerContext {
    /// Settings snapshot taken at the start of the turn.
    pub settings: Settings,
    pub log: LogSink,
    pub chat_id: Option<i64>,
    pub blobs: Arc<ImageBlobStore>,
    pub tg_users: Arc<TelegramUserMap>,
    pub data_dir: PathBuf,
    pub llm: Arc<ProviderClient>,
    pub registry: Arc<ToolRegistry>,
    pub http: reqwest::Client,
}

impl HandlerContext {
    pub fn tool_settings(&self, tool_name: &str) -> ToolSettings {
        self.settings.tool_settings(tool_name)
    }

    /// The default provider as a call target.
    pub fn default_target(&self) -> ProviderTarget {
        let entry = self.settings.default_provider_entry();
        ProviderTarget::from_entry(&self.settings.default_provider, &entry)
    }

    /// A specific provider as a call target, falling back to the default
    /// when `id` is unknown.
    pub fn target_for(&self, id: &str) -> ProviderTarget {
        match self.settings.provider(id) {
            Some(entry) => ProviderTarget::from_entry(id, entry),
            None => self.default_target(),
        }
    }

    /// API key of the default provider (legacy top-level key honoured).
    pub fn default_api_key(&self) -> String {
        let entry: ProviderEntry = self.settings.default_provider_entry();
        if !entry.api_key.is_empty() {
            entry.api_key
        } else {
            self.settings.openrouter_api_key.clone()
        }
    }
}

/// In-process handler interface. `args` is the parsed tool-call argument
/// object; the returned value is a free-form result mapping. Media records
/// carry one of the reserved keys (`image_base64`, `audio_base64`,
/// `pptx_base64`, `html_content`, `local_file_path`).
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, args: Value, ctx: &HandlerContext) -> Result<Value>;
}

/// The registered record binding a name to a handler and a schema.
/// Immutable once registered; re-registering the same name replaces it.
#[derive(Clone)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    /// Usage hints appended to the description in the model-facing schema.
    pub usage: Option<String>,
    pub input_schema: Value,
    pub handler: Arc<dyn ToolHandler>,
    pub settings_schema: Vec<SettingsField>,
    /// Markdown info text shown in the settings UI.
    pub settings_info: Option<String>,
    pub origin: ToolOrigin,
    /// When false, the tool's configured provider/model does not vote in
    /// the override resolution. Defaults to true.
    pub agent_overridable: bool,
}

impl ToolDescriptor {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
        handler: Arc<dyn ToolHandler>,
        origin: ToolOrigin,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            usage: None,
            input_schema,
            handler,
            settings_schema: Vec::new(),
            settings_info: None,
            origin,
            agent_overridable: true,
        }
    }

    pub fn with_usage(mut self, usage: impl Into<String>) -> Self {
        self.usage = Some(usage.into());
        self
    }

    pub fn with_settings_schema(mut self, schema: Vec<SettingsField>) -> Self {
        self.settings_schema = schema;
        self
    }

    pub fn with_settings_info(mut self, info: impl Into<String>) -> Self {
        self.settings_info = Some(info.into());
        self
    }

    pub fn not_agent_overridable(mut self) -> Self {
        self.agent_overridable = false;
        self
    }

    /// OpenAI function-calling schema for this tool.
    pub fn model_schema(&self) -> Value {
        let description = match &self.usage {
            Some(usage) => format!("{}\n\nVerwendung:\n{}", self.description, usage.trim()),
            None => self.description.clone(),
        };
        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": description,
                "parameters": self.input_schema,
            }
        })
    }
}

impl std::fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("name", &self.name)
            .field("origin", &self.origin)
            .field("agent_overridable", &self.agent_overridable)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    #[async_trait]
    impl ToolHandler for Noop {
        async fn call(&self, _args: Value, _ctx: &HandlerContext) -> Result<Value> {
            Ok(serde_json::json!({}))
        }
    }

    #[test]
    fn model_schema_appends_usage() {
        let tool = ToolDescriptor::new(
            "get_current_time",
            "Gibt die aktuelle Uhrzeit zurueck.",
            serde_json::json!({"type":"object","properties":{},"required":[]}),
            Arc::new(Noop),
            ToolOrigin::Builtin,
        )
        .with_usage("Beispiel: {\"timezone\": \"UTC\"}");

        let schema = tool.model_schema();
        assert_eq!(schema["type"], "function");
        assert_eq!(schema["function"]["name"], "get_current_time");
        let desc = schema["function"]["description"].as_str().unwrap();
        assert!(desc.contains("Verwendung:"));
        assert!(desc.contains("Beispiel"));
    }

    #[test]
    fn origin_display_keys() {
        assert_eq!(ToolOrigin::Builtin.to_string(), "builtin");
        assert_eq!(ToolOrigin::Custom.to_string(), "custom");
        assert_eq!(
            ToolOrigin::External("srv1".into()).to_string(),
            "external:srv1"
        );
    }
}
