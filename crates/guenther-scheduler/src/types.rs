use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleType {
    /// Fire every `interval_minutes` minutes; first fire one interval after load.
    Interval,
    /// Fire at `daily_time` (HH:MM UTC) every day.
    Daily,
    /// Fire at `daily_time` on `weekly_day` (0 = Monday … 6 = Sunday).
    Weekly,
}

/// A saved prompt replayed through the agent on a schedule.
///
/// Exactly one schedule-type field set is meaningful per `schedule_type`;
/// the others are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutopromptRecord {
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub prompt: String,
    #[serde(default)]
    pub enabled: bool,
    pub schedule_type: ScheduleType,
    #[serde(default)]
    pub interval_minutes: Option<u64>,
    /// "HH:MM" in UTC; used by daily and weekly schedules.
    #[serde(default)]
    pub daily_time: Option<String>,
    #[serde(default)]
    pub weekly_day: Option<u8>,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub save_to_chat: bool,
    #[serde(default)]
    pub chat_id: Option<i64>,
    #[serde(default)]
    pub last_run: Option<String>,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl AutopromptRecord {
    pub fn new(name: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            prompt: prompt.into(),
            enabled: true,
            schedule_type: ScheduleType::Daily,
            interval_minutes: None,
            daily_time: Some("08:00".to_string()),
            weekly_day: None,
            agent_id: None,
            save_to_chat: false,
            chat_id: None,
            last_run: None,
            last_error: None,
        }
    }
}
