//! Per-chat artifact storage — presentations, reports, audio emitted by
//! tools land in `<data>/files/<chat_id>/<filename>` and are fetched by the
//! frontend via `[STORED_FILE]` references.

use std::path::{Path, PathBuf};

use crate::error::Result;

#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            root: data_dir.join("files"),
        }
    }

    fn chat_dir(&self, chat_id: i64) -> PathBuf {
        self.root.join(chat_id.to_string())
    }

    /// Strip any path components — stored names are opaque basenames.
    fn safe_name(filename: &str) -> &str {
        filename
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(filename)
    }

    pub fn save_file(&self, chat_id: i64, filename: &str, data: &[u8]) -> Result<()> {
        let dir = self.chat_dir(chat_id);
        std::fs::create_dir_all(&dir)?;
        std::fs::write(dir.join(Self::safe_name(filename)), data)?;
        Ok(())
    }

    pub fn get_file(&self, chat_id: i64, filename: &str) -> Option<Vec<u8>> {
        std::fs::read(self.chat_dir(chat_id).join(Self::safe_name(filename))).ok()
    }

    pub fn list_chat_files(&self, chat_id: i64) -> Vec<String> {
        let dir = self.chat_dir(chat_id);
        let mut names: Vec<String> = match std::fs::read_dir(dir) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .filter_map(|e| e.file_name().into_string().ok())
                .collect(),
            Err(_) => Vec::new(),
        };
        names.sort();
        names
    }

    /// Remove the chat's whole directory. Part of the delete-chat path.
    pub fn delete_chat_files(&self, chat_id: i64) -> Result<()> {
        let dir = self.chat_dir(chat_id);
        if dir.exists() {
            std::fs::remove_dir_all(dir)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_get_list_delete() {
        let tmp = tempfile::tempdir().unwrap();
        let files = FileStore::new(tmp.path());

        files.save_file(7, "report.pptx", b"PK\x03\x04").unwrap();
        files.save_file(7, "audio.mp3", b"ID3").unwrap();

        assert_eq!(files.get_file(7, "report.pptx").unwrap(), b"PK\x03\x04");
        assert_eq!(files.list_chat_files(7), vec!["audio.mp3", "report.pptx"]);

        files.delete_chat_files(7).unwrap();
        assert!(files.get_file(7, "report.pptx").is_none());
        assert!(files.list_chat_files(7).is_empty());
    }

    #[test]
    fn filenames_are_reduced_to_basenames() {
        let tmp = tempfile::tempdir().unwrap();
        let files = FileStore::new(tmp.path());

        files.save_file(1, "../../etc/evil.txt", b"x").unwrap();
        assert_eq!(files.list_chat_files(1), vec!["evil.txt"]);
        assert!(files.get_file(1, "evil.txt").is_some());
    }

    #[test]
    fn missing_chat_dir_is_empty_not_error() {
        let tmp = tempfile::tempdir().unwrap();
        let files = FileStore::new(tmp.path());
        assert!(files.list_chat_files(99).is_empty());
        assert!(files.get_file(99, "nope").is_none());
        files.delete_chat_files(99).unwrap();
    }
}
