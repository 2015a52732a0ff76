//! Temporary in-memory storage for images shared between the gateway and
//! tools. Blobs are keyed by session (e.g. `tg_<username>`), written by the
//! gateway before dispatch, read by `process_image`, and removed after the
//! turn completes.

use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone)]
pub struct ImageBlob {
    pub b64: String,
    pub mime: String,
}

#[derive(Debug, Default)]
pub struct ImageBlobStore {
    blobs: Mutex<HashMap<String, ImageBlob>>,
}

impl ImageBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self, key: &str, b64: String, mime: String) {
        self.blobs
            .lock()
            .unwrap()
            .insert(key.to_string(), ImageBlob { b64, mime });
    }

    pub fn get(&self, key: &str) -> Option<ImageBlob> {
        self.blobs.lock().unwrap().get(key).cloned()
    }

    pub fn remove(&self, key: &str) {
        self.blobs.lock().unwrap().remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_get_remove() {
        let blobs = ImageBlobStore::new();
        blobs.store("tg_alice", "aGVsbG8=".into(), "image/jpeg".into());

        let got = blobs.get("tg_alice").unwrap();
        assert_eq!(got.mime, "image/jpeg");
        assert!(blobs.get("tg_bob").is_none());

        blobs.remove("tg_alice");
        assert!(blobs.get("tg_alice").is_none());
    }

    #[test]
    fn store_overwrites_existing_key() {
        let blobs = ImageBlobStore::new();
        blobs.store("tg_alice", "one".into(), "image/png".into());
        blobs.store("tg_alice", "two".into(), "image/jpeg".into());
        assert_eq!(blobs.get("tg_alice").unwrap().b64, "two");
    }
}
