use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::enums::IpcTaskKind;

/// Outbound chat message dropped by a container into its `messages/` mailbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcMessage {
    pub text: String,
    #[serde(default)]
    pub target_jid: Option<String>,
    #[serde(default)]
    pub sender: Option<String>,
    #[serde(default)]
    pub source_group: Option<String>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

/// Task-control directive dropped by a container into its `tasks/` mailbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcTask {
    #[serde(rename = "type")]
    pub kind: IpcTaskKind,
    #[serde(default)]
    pub data: Value,
    pub source_group: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

/// Host-to-container input dropped into a group's `input/` mailbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcInput {
    pub text: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}
