//! Agent profiles — named system-prompt presets with optional provider and
//! model overrides, persisted as agents.json in the data root.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::{read_json_or_default, write_json_atomic};
use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentProfile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub system_prompt: String,
    /// Forces this provider for the whole chat when set (together with `model`).
    #[serde(default)]
    pub provider_id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

impl AgentProfile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            description: String::new(),
            system_prompt: String::new(),
            provider_id: None,
            model: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AgentStore {
    path: PathBuf,
}

impl AgentStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join("agents.json"),
        }
    }

    pub fn list(&self) -> Vec<AgentProfile> {
        read_json_or_default(&self.path)
    }

    pub fn get(&self, id: &str) -> Option<AgentProfile> {
        self.list().into_iter().find(|a| a.id == id)
    }

    /// Insert or replace by id.
    pub fn save(&self, profile: &AgentProfile) -> Result<()> {
        let mut all = self.list();
        match all.iter_mut().find(|a| a.id == profile.id) {
            Some(slot) => *slot = profile.clone(),
            None => all.push(profile.clone()),
        }
        write_json_atomic(&self.path, &all)
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        let all: Vec<AgentProfile> = self.list().into_iter().filter(|a| a.id != id).collect();
        write_json_atomic(&self.path, &all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_get_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = AgentStore::new(dir.path());
        assert!(store.list().is_empty());

        let mut agent = AgentProfile::new("Recherche");
        agent.system_prompt = "Du bist ein Recherche-Assistent.".to_string();
        agent.provider_id = Some("openrouter".to_string());
        agent.model = Some("openai/gpt-4o".to_string());
        store.save(&agent).unwrap();

        let got = store.get(&agent.id).unwrap();
        assert_eq!(got.name, "Recherche");
        assert_eq!(got.model.as_deref(), Some("openai/gpt-4o"));

        store.delete(&agent.id).unwrap();
        assert!(store.get(&agent.id).is_none());
    }

    #[test]
    fn save_replaces_existing() {
        let dir = tempfile::tempdir().unwrap();
        let store = AgentStore::new(dir.path());

        let mut agent = AgentProfile::new("A");
        store.save(&agent).unwrap();
        agent.name = "B".to_string();
        store.save(&agent).unwrap();

        let all = store.list();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].name, "B");
    }
}
