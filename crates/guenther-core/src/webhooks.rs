//! Webhook bindings — a random bearer token maps to a (chat, agent) pair.
//! Persisted as webhooks.json in the data root; tokens are masked when listed.

use std::path::{Path, PathBuf};

use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::{read_json_or_default, write_json_atomic};
use crate::error::{GuentherError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Webhook {
    pub id: String,
    pub name: String,
    /// Sole auth credential; sent as `Authorization: Bearer <token>`.
    pub token: String,
    #[serde(default)]
    pub chat_id: Option<i64>,
    #[serde(default)]
    pub agent_id: Option<String>,
    pub created_at: String,
}

impl Webhook {
    pub fn new(name: impl Into<String>) -> Result<Self> {
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            token: new_token()?,
            chat_id: None,
            agent_id: None,
            created_at: chrono::Utc::now().to_rfc3339(),
        })
    }

    /// Copy with the token replaced by its masked form, for list responses.
    pub fn masked(&self) -> Webhook {
        Webhook {
            token: mask_token(&self.token),
            ..self.clone()
        }
    }
}

/// `wh_` + 16 random bytes as hex.
fn new_token() -> Result<String> {
    let mut bytes = [0u8; 16];
    SystemRandom::new()
        .fill(&mut bytes)
        .map_err(|_| GuentherError::Internal("token generation failed".to_string()))?;
    Ok(format!("wh_{}", hex::encode(bytes)))
}

pub fn mask_token(token: &str) -> String {
    if token.len() <= 8 {
        return "***".to_string();
    }
    format!("{}...{}", &token[..6], &token[token.len() - 4..])
}

/// Constant-time token comparison for the public trigger endpoint.
pub fn token_matches(expected: &str, presented: &str) -> bool {
    ring::constant_time::verify_slices_are_equal(expected.as_bytes(), presented.as_bytes()).is_ok()
}

#[derive(Debug, Clone)]
pub struct WebhookStore {
    path: PathBuf,
}

impl WebhookStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join("webhooks.json"),
        }
    }

    pub fn list(&self) -> Vec<Webhook> {
        read_json_or_default(&self.path)
    }

    pub fn get(&self, id: &str) -> Option<Webhook> {
        self.list().into_iter().find(|w| w.id == id)
    }

    pub fn save(&self, webhook: &Webhook) -> Result<()> {
        let mut all = self.list();
        match all.iter_mut().find(|w| w.id == webhook.id) {
            Some(slot) => *slot = webhook.clone(),
            None => all.push(webhook.clone()),
        }
        write_json_atomic(&self.path, &all)
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        let all: Vec<Webhook> = self.list().into_iter().filter(|w| w.id != id).collect();
        write_json_atomic(&self.path, &all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_have_stable_prefix_and_length() {
        let wh = Webhook::new("ci").unwrap();
        assert!(wh.token.starts_with("wh_"));
        assert_eq!(wh.token.len(), 3 + 32);
    }

    #[test]
    fn masking_keeps_prefix_and_suffix() {
        let masked = mask_token("wh_0123456789abcdef0123456789abcdef");
        assert!(masked.starts_with("wh_012"));
        assert!(masked.ends_with("cdef"));
        assert!(masked.contains("..."));
        assert_eq!(mask_token("short"), "***");
    }

    #[test]
    fn token_compare_is_exact() {
        assert!(token_matches("wh_abc", "wh_abc"));
        assert!(!token_matches("wh_abc", "wh_abd"));
        assert!(!token_matches("wh_abc", "wh_ab"));
    }

    #[test]
    fn store_round_trip_masks_on_demand() {
        let dir = tempfile::tempdir().unwrap();
        let store = WebhookStore::new(dir.path());

        let wh = Webhook::new("deploy").unwrap();
        store.save(&wh).unwrap();

        let listed = store.list();
        assert_eq!(listed.len(), 1);
        // The raw store keeps the full token; masking is a view concern.
        assert_eq!(listed[0].token, wh.token);
        assert_ne!(listed[0].masked().token, wh.token);
    }
}
