//! File-backed autoprompt persistence (autoprompts.json in the data root).

use std::path::{Path, PathBuf};

use uuid::Uuid;

use guenther_core::config::{read_json_or_default, write_json_atomic};
use guenther_core::Result;

use crate::types::AutopromptRecord;

#[derive(Debug, Clone)]
pub struct AutopromptStore {
    path: PathBuf,
}

impl AutopromptStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join("autoprompts.json"),
        }
    }

    pub fn list(&self) -> Vec<AutopromptRecord> {
        read_json_or_default(&self.path)
    }

    pub fn get(&self, id: &str) -> Option<AutopromptRecord> {
        self.list().into_iter().find(|r| r.id == id)
    }

    /// Insert or replace by id.
    pub fn save(&self, record: &AutopromptRecord) -> Result<()> {
        let mut all = self.list();
        match all.iter_mut().find(|r| r.id == record.id) {
            Some(slot) => *slot = record.clone(),
            None => all.push(record.clone()),
        }
        write_json_atomic(&self.path, &all)
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        let all: Vec<AutopromptRecord> =
            self.list().into_iter().filter(|r| r.id != id).collect();
        write_json_atomic(&self.path, &all)
    }

    /// Import records from an export file. Each record gets a fresh id and
    /// loses its chat binding and run history; semantic fields carry over.
    pub fn import(&self, records: Vec<AutopromptRecord>) -> Result<Vec<AutopromptRecord>> {
        let mut imported = Vec::with_capacity(records.len());
        for mut record in records {
            record.id = Uuid::new_v4().to_string();
            record.chat_id = None;
            record.last_run = None;
            record.last_error = None;
            self.save(&record)?;
            imported.push(record);
        }
        Ok(imported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ScheduleType;

    #[test]
    fn save_replaces_by_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = AutopromptStore::new(dir.path());

        let mut record = AutopromptRecord::new("morgens", "Was gibt es Neues?");
        store.save(&record).unwrap();
        record.prompt = "Anders".to_string();
        store.save(&record).unwrap();

        let all = store.list();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].prompt, "Anders");

        store.delete(&record.id).unwrap();
        assert!(store.list().is_empty());
    }

    #[test]
    fn import_assigns_new_ids_and_clears_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = AutopromptStore::new(dir.path());

        let mut record = AutopromptRecord::new("woechentlich", "Wochenbericht");
        record.schedule_type = ScheduleType::Weekly;
        record.weekly_day = Some(4);
        record.chat_id = Some(12);
        record.last_run = Some("2024-01-01T08:00:00Z".to_string());
        let old_id = record.id.clone();

        let imported = store.import(vec![record]).unwrap();
        assert_eq!(imported.len(), 1);
        assert_ne!(imported[0].id, old_id);
        assert_eq!(imported[0].weekly_day, Some(4));
        assert!(imported[0].chat_id.is_none());
        assert!(imported[0].last_run.is_none());
        assert_eq!(store.list().len(), 1);
    }
}
