use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::enums::{ScheduleType, TaskStatus};

/// Scheduled task configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledTask {
    #[serde(default)]
    pub id: Option<i64>,
    pub group_folder: String,
    pub prompt: String,
    pub schedule_type: ScheduleType,
    pub schedule_value: String,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub next_run: Option<DateTime<Utc>>,
    #[serde(default = "default_context_mode")]
    pub context_mode: String,
    #[serde(default)]
    pub target_chat_jid: Option<String>,
}

fn default_context_mode() -> String {
    "group".to_string()
}
