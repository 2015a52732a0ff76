use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::{GuentherError, Result};

pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_BIND: &str = "0.0.0.0";
pub const DEFAULT_MODEL: &str = "openai/gpt-4o-mini";
pub const DEFAULT_LLM_TIMEOUT_SECS: u64 = 120;

/// Boot-time config (guenther.toml + GUENTHER_* env overrides).
///
/// Everything the server needs before the data root exists. Runtime
/// settings live in `settings.json` under the data root (see [`Settings`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            data_dir: default_data_dir(),
        }
    }
}

impl ServerConfig {
    /// Load from a TOML file with GUENTHER_* env var overrides.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: ServerConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("GUENTHER_"))
            .extract()
            .map_err(|e| GuentherError::Config(e.to_string()))?;

        Ok(config)
    }

    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(&self.data_dir)
    }
}

fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_data_dir() -> String {
    std::env::var("DATA_DIR").unwrap_or_else(|_| "/app/data".to_string())
}
fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.guenther/guenther.toml", home)
}

/// A single LLM provider entry (OpenAI-compatible endpoint).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEntry {
    pub name: String,
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub enabled: bool,
}

/// A configured external tool server (spawned child process, stdio JSON-RPC).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolServerEntry {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "bool_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TelegramSettings {
    #[serde(default)]
    pub bot_token: String,
    #[serde(default)]
    pub allowed_users: Vec<String>,
}

/// Per-tool settings bag: free-form string values keyed by the fields the
/// tool declares in its settings schema. `provider` and `model` are always
/// honoured when present.
pub type ToolSettings = BTreeMap<String, String>;

/// Mutable runtime settings, persisted as settings.json in the data root.
///
/// Unknown keys in the stored file are dropped on the next write; missing
/// keys fall back to serde defaults, so old files keep loading across
/// upgrades.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_provider_id")]
    pub default_provider: String,
    #[serde(default = "default_providers")]
    pub providers: BTreeMap<String, ProviderEntry>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_llm_timeout")]
    pub llm_timeout: u64,
    /// Speech-to-text model (empty = not configured).
    #[serde(default)]
    pub stt_model: String,
    /// Text-to-speech model (empty = use main model).
    #[serde(default)]
    pub tts_model: String,
    /// Image generation model (empty = use main model).
    #[serde(default)]
    pub image_gen_model: String,
    /// OpenAI key, used only for Whisper STT.
    #[serde(default)]
    pub openai_api_key: String,
    #[serde(default)]
    pub use_openai_whisper: bool,
    /// Legacy top-level key, migrated into providers.openrouter on load.
    #[serde(default)]
    pub openrouter_api_key: String,
    #[serde(default)]
    pub mcp_servers: Vec<ToolServerEntry>,
    #[serde(default)]
    pub tool_settings: BTreeMap<String, ToolSettings>,
    #[serde(default)]
    pub telegram: TelegramSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_provider: default_provider_id(),
            providers: default_providers(),
            model: default_model(),
            temperature: default_temperature(),
            llm_timeout: default_llm_timeout(),
            stt_model: String::new(),
            tts_model: String::new(),
            image_gen_model: String::new(),
            openai_api_key: String::new(),
            use_openai_whisper: false,
            openrouter_api_key: String::new(),
            mcp_servers: Vec::new(),
            tool_settings: BTreeMap::new(),
            telegram: TelegramSettings::default(),
        }
    }
}

impl Settings {
    /// Provider entry for `id`, if configured.
    pub fn provider(&self, id: &str) -> Option<&ProviderEntry> {
        self.providers.get(id)
    }

    /// The default provider's entry. Falls back to a synthesised OpenRouter
    /// entry so callers always get a base URL to report errors against.
    pub fn default_provider_entry(&self) -> ProviderEntry {
        self.providers
            .get(&self.default_provider)
            .cloned()
            .unwrap_or_else(|| openrouter_default())
    }

    pub fn tool_settings(&self, tool_name: &str) -> ToolSettings {
        self.tool_settings
            .get(tool_name)
            .cloned()
            .unwrap_or_default()
    }
}

fn default_provider_id() -> String {
    "openrouter".to_string()
}
fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}
fn default_temperature() -> f64 {
    0.5
}
fn default_llm_timeout() -> u64 {
    DEFAULT_LLM_TIMEOUT_SECS
}
fn bool_true() -> bool {
    true
}

fn openrouter_default() -> ProviderEntry {
    ProviderEntry {
        name: "OpenRouter".to_string(),
        base_url: "https://openrouter.ai/api/v1".to_string(),
        api_key: String::new(),
        enabled: true,
    }
}

fn default_providers() -> BTreeMap<String, ProviderEntry> {
    let mut map = BTreeMap::new();
    map.insert("openrouter".to_string(), openrouter_default());
    map.insert(
        "ollama".to_string(),
        ProviderEntry {
            name: "Ollama".to_string(),
            base_url: "http://localhost:11434/v1".to_string(),
            api_key: String::new(),
            enabled: false,
        },
    );
    map.insert(
        "lmstudio".to_string(),
        ProviderEntry {
            name: "LM Studio".to_string(),
            base_url: "http://localhost:1234/v1".to_string(),
            api_key: String::new(),
            enabled: false,
        },
    );
    map
}

/// File-backed settings store. Stateless: every read loads the file, every
/// write replaces it atomically. Concurrent writers are last-write-wins,
/// which is acceptable for admin operations.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join("settings.json"),
        }
    }

    /// Load settings, merging defaults over missing keys and applying
    /// migrations. Never fails on a missing or corrupt file.
    pub fn load(&self) -> Settings {
        let mut settings: Settings = match std::fs::read_to_string(&self.path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                tracing::warn!(path = %self.path.display(), "settings.json unreadable ({e}), using defaults");
                Settings::default()
            }),
            Err(_) => Settings::default(),
        };

        // Backfill any provider slots missing from the stored file.
        for (id, entry) in default_providers() {
            settings.providers.entry(id).or_insert(entry);
        }

        // Migration: copy the legacy openrouter_api_key into the provider entry.
        if !settings.openrouter_api_key.is_empty() {
            if let Some(p) = settings.providers.get_mut("openrouter") {
                if p.api_key.is_empty() {
                    p.api_key = settings.openrouter_api_key.clone();
                }
            }
        }

        settings
    }

    pub fn save(&self, settings: &Settings) -> Result<()> {
        write_json_atomic(&self.path, settings)
    }

    pub fn tool_settings(&self, tool_name: &str) -> ToolSettings {
        self.load().tool_settings(tool_name)
    }

    pub fn save_tool_settings(&self, tool_name: &str, values: ToolSettings) -> Result<()> {
        let mut settings = self.load();
        settings.tool_settings.insert(tool_name.to_string(), values);
        self.save(&settings)
    }
}

/// Serialise `value` to JSON and replace `path` atomically (temp file in the
/// same directory, then rename). Readers never observe a partial write.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| GuentherError::Config(format!("no parent dir for {}", path.display())))?;
    std::fs::create_dir_all(dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(&mut tmp, value)?;
    tmp.flush()?;
    tmp.persist(path)
        .map_err(|e| GuentherError::Io(e.error))?;
    Ok(())
}

/// Read a JSON file into `T`, returning `T::default()` when the file is
/// missing or unparseable.
pub fn read_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> T {
    match std::fs::read_to_string(path) {
        Ok(raw) => serde_json::from_str(&raw).unwrap_or_default(),
        Err(_) => T::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_have_three_providers() {
        let s = Settings::default();
        assert!(s.providers.contains_key("openrouter"));
        assert!(s.providers.contains_key("ollama"));
        assert!(s.providers.contains_key("lmstudio"));
        assert_eq!(s.default_provider, "openrouter");
    }

    #[test]
    fn load_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::new(dir.path());
        let s = store.load();
        assert_eq!(s.model, DEFAULT_MODEL);
        assert_eq!(s.llm_timeout, DEFAULT_LLM_TIMEOUT_SECS);
    }

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::new(dir.path());
        let mut s = store.load();
        s.model = "openai/gpt-4o".to_string();
        s.telegram.bot_token = "123:abc".to_string();
        store.save(&s).unwrap();

        let again = store.load();
        assert_eq!(again.model, "openai/gpt-4o");
        assert_eq!(again.telegram.bot_token, "123:abc");
    }

    #[test]
    fn legacy_openrouter_key_migrates_into_provider() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"openrouter_api_key":"sk-or-legacy"}"#).unwrap();

        let store = SettingsStore::new(dir.path());
        let s = store.load();
        assert_eq!(s.providers["openrouter"].api_key, "sk-or-legacy");
    }

    #[test]
    fn partial_file_backfills_missing_providers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"providers":{"openrouter":{"name":"OpenRouter","base_url":"https://openrouter.ai/api/v1","api_key":"k","enabled":true}}}"#,
        )
        .unwrap();

        let s = SettingsStore::new(dir.path()).load();
        assert_eq!(s.providers["openrouter"].api_key, "k");
        assert!(s.providers.contains_key("ollama"));
        assert!(s.providers.contains_key("lmstudio"));
    }

    #[test]
    fn tool_settings_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::new(dir.path());

        let mut values = ToolSettings::new();
        values.insert("provider".to_string(), "p1".to_string());
        values.insert("model".to_string(), "m1".to_string());
        store.save_tool_settings("generate_image", values).unwrap();

        let ts = store.tool_settings("generate_image");
        assert_eq!(ts.get("provider").map(String::as_str), Some("p1"));
        assert_eq!(ts.get("model").map(String::as_str), Some("m1"));
        // Unknown tool: empty bag, created lazily on first write.
        assert!(store.tool_settings("nope").is_empty());
    }
}
