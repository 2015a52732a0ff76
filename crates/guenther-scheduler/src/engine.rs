//! Trigger engine. Polls once per second; due records are handed to the
//! runner over an mpsc channel (`try_send`, so a slow runner never stalls
//! the tick loop). The pending-trigger map is the single source of truth:
//! a reschedule replaces exactly one entry, disabled records have none.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::schedule::next_run;
use crate::store::AutopromptStore;
use crate::types::AutopromptRecord;

/// Handle for HTTP routes: after mutating the store, nudge the engine to
/// recompute the record's trigger.
#[derive(Clone)]
pub struct SchedulerHandle {
    reload_tx: mpsc::Sender<String>,
}

impl SchedulerHandle {
    /// Reschedule (or unschedule) the record with this id.
    pub fn reschedule(&self, id: &str) {
        if self.reload_tx.try_send(id.to_string()).is_err() {
            warn!(%id, "scheduler reload channel full — reschedule dropped");
        }
    }
}

pub struct SchedulerEngine {
    store: AutopromptStore,
    fired_tx: mpsc::Sender<AutopromptRecord>,
    reload_rx: mpsc::Receiver<String>,
    /// Keeps the reload channel open even if every handle is dropped, so
    /// `recv()` pends instead of returning `None` in a tight loop.
    _reload_tx: mpsc::Sender<String>,
    next_due: HashMap<String, DateTime<Utc>>,
}

enum Wake {
    Tick,
    Reload(String),
    Shutdown,
}

impl SchedulerEngine {
    /// Build the engine plus its reload handle. Fired records arrive on
    /// `fired_tx`'s receiving side.
    pub fn new(
        store: AutopromptStore,
        fired_tx: mpsc::Sender<AutopromptRecord>,
    ) -> (Self, SchedulerHandle) {
        let (reload_tx, reload_rx) = mpsc::channel(64);
        (
            Self {
                store,
                fired_tx,
                reload_rx,
                _reload_tx: reload_tx.clone(),
                next_due: HashMap::new(),
            },
            SchedulerHandle { reload_tx },
        )
    }

    /// Main loop. Seeds triggers for all enabled records, then ticks every
    /// second until `shutdown` flips to true.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("autoprompt scheduler started");
        let now = Utc::now();
        for record in self.store.list() {
            self.schedule_record(&record, now);
        }

        let mut interval = tokio::time::interval(std::time::Duration::from_secs(1));
        loop {
            // Resolve the wake reason first so the select borrows end before
            // the mutable self methods run.
            let wake = tokio::select! {
                _ = interval.tick() => Wake::Tick,
                id = self.reload_rx.recv() => match id {
                    Some(id) => Wake::Reload(id),
                    None => Wake::Shutdown,
                },
                _ = shutdown.changed() => {
                    if *shutdown.borrow() { Wake::Shutdown } else { Wake::Tick }
                }
            };

            match wake {
                Wake::Tick => {
                    self.tick(Utc::now());
                }
                Wake::Reload(id) => {
                    self.reschedule_id(&id, Utc::now());
                }
                Wake::Shutdown => {
                    info!("autoprompt scheduler shutting down");
                    break;
                }
            }
        }
    }

    /// Insert or remove the single trigger entry for one record.
    fn schedule_record(&mut self, record: &AutopromptRecord, now: DateTime<Utc>) {
        if !record.enabled {
            self.next_due.remove(&record.id);
            return;
        }
        match next_run(record, now) {
            Some(due) => {
                debug!(id = %record.id, name = %record.name, %due, "autoprompt scheduled");
                self.next_due.insert(record.id.clone(), due);
            }
            None => {
                warn!(id = %record.id, name = %record.name, "autoprompt has no valid schedule");
                self.next_due.remove(&record.id);
            }
        }
    }

    fn reschedule_id(&mut self, id: &str, now: DateTime<Utc>) {
        match self.store.get(id) {
            Some(record) => self.schedule_record(&record, now),
            None => {
                self.next_due.remove(id);
            }
        }
    }

    /// Fire every record whose trigger time has arrived and arm its next
    /// trigger. Returns the fired ids (used by tests).
    fn tick(&mut self, now: DateTime<Utc>) -> Vec<String> {
        let due: Vec<String> = self
            .next_due
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(id, _)| id.clone())
            .collect();

        let mut fired = Vec::new();
        for id in due {
            self.next_due.remove(&id);

            // Re-read the record: it may have been edited or disabled since
            // the trigger was armed.
            let Some(record) = self.store.get(&id) else {
                continue;
            };
            if !record.enabled {
                continue;
            }

            self.schedule_record(&record, now);

            info!(id = %record.id, name = %record.name, "autoprompt fired");
            if self.fired_tx.try_send(record).is_err() {
                warn!(%id, "autoprompt runner channel full or closed — fire dropped");
            }
            fired.push(id);
        }
        fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AutopromptRecord, ScheduleType};
    use chrono::{Duration, TimeZone};

    fn engine_with(
        records: Vec<AutopromptRecord>,
    ) -> (SchedulerEngine, mpsc::Receiver<AutopromptRecord>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = AutopromptStore::new(dir.path());
        for r in &records {
            store.save(r).unwrap();
        }
        let (fired_tx, fired_rx) = mpsc::channel(16);
        let (engine, _) = SchedulerEngine::new(store, fired_tx);
        (engine, fired_rx, dir)
    }

    fn daily_record(time: &str) -> AutopromptRecord {
        let mut r = AutopromptRecord::new("morgens", "Guten Morgen!");
        r.schedule_type = ScheduleType::Daily;
        r.daily_time = Some(time.to_string());
        r.save_to_chat = true;
        r
    }

    #[test]
    fn daily_fires_once_within_the_minute() {
        let record = daily_record("08:00");
        let id = record.id.clone();
        let (mut engine, mut fired_rx, _dir) = engine_with(vec![record]);

        let just_before = Utc.with_ymd_and_hms(2024, 3, 1, 7, 59, 0).unwrap();
        for r in engine.store.list() {
            engine.schedule_record(&r, just_before);
        }

        // 07:59:30 — nothing yet.
        assert!(engine
            .tick(Utc.with_ymd_and_hms(2024, 3, 1, 7, 59, 30).unwrap())
            .is_empty());

        // 08:00:30 — exactly one fire.
        let fired = engine.tick(Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 30).unwrap());
        assert_eq!(fired, vec![id.clone()]);
        assert_eq!(fired_rx.try_recv().unwrap().id, id);

        // Ticks for the rest of the day stay quiet.
        assert!(engine
            .tick(Utc.with_ymd_and_hms(2024, 3, 1, 8, 1, 30).unwrap())
            .is_empty());
        assert!(engine
            .tick(Utc.with_ymd_and_hms(2024, 3, 1, 20, 0, 0).unwrap())
            .is_empty());

        // Next day, same window: fires again.
        let fired = engine.tick(Utc.with_ymd_and_hms(2024, 3, 2, 8, 0, 10).unwrap());
        assert_eq!(fired.len(), 1);
    }

    #[test]
    fn disabled_before_trigger_does_not_fire() {
        let record = daily_record("08:00");
        let id = record.id.clone();
        let (mut engine, mut fired_rx, _dir) = engine_with(vec![record.clone()]);

        let before = Utc.with_ymd_and_hms(2024, 3, 1, 7, 0, 0).unwrap();
        engine.schedule_record(&record, before);

        // Disable in the store, then reschedule — the trigger must vanish.
        let mut disabled = record;
        disabled.enabled = false;
        engine.store.save(&disabled).unwrap();
        engine.reschedule_id(&id, before);
        assert!(engine.next_due.is_empty());

        assert!(engine
            .tick(Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 30).unwrap())
            .is_empty());
        assert!(fired_rx.try_recv().is_err());
    }

    #[test]
    fn interval_first_fire_is_one_interval_after_load() {
        let mut record = AutopromptRecord::new("alle5", "tick");
        record.schedule_type = ScheduleType::Interval;
        record.interval_minutes = Some(5);
        let (mut engine, _rx, _dir) = engine_with(vec![record.clone()]);

        let load = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        engine.schedule_record(&record, load);

        assert!(engine.tick(load + Duration::minutes(4)).is_empty());
        assert_eq!(engine.tick(load + Duration::minutes(5)).len(), 1);
    }

    #[test]
    fn deleted_record_is_unscheduled() {
        let record = daily_record("08:00");
        let id = record.id.clone();
        let (mut engine, _rx, _dir) = engine_with(vec![record.clone()]);
        engine.schedule_record(&record, Utc.with_ymd_and_hms(2024, 3, 1, 7, 0, 0).unwrap());

        engine.store.delete(&id).unwrap();
        engine.reschedule_id(&id, Utc::now());
        assert!(engine.next_due.is_empty());
    }
}
