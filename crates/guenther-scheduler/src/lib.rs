//! Autoprompt scheduler — interval, daily, and weekly triggers that replay
//! saved prompts through the agent.

pub mod engine;
pub mod schedule;
pub mod store;
pub mod types;

pub use engine::{SchedulerEngine, SchedulerHandle};
pub use store::AutopromptStore;
pub use types::{AutopromptRecord, ScheduleType};
