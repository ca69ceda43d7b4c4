use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Container execution configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerConfig {
    #[serde(default)]
    pub additional_mounts: Vec<HashMap<String, serde_json::Value>>,
    #[serde(default)]
    pub timeout: Option<i64>,
    #[serde(default)]
    pub max_output_size: Option<i64>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

/// One-shot input fed to a container agent over stdin.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerInput {
    pub prompt: String,
    #[serde(default)]
    pub session_id: Option<String>,
    pub group_folder: String,
    pub chat_jid: String,
    pub is_main: bool,
    #[serde(default)]
    pub is_scheduled_task: bool,
}

/// Container execution result, framed by the output sentinels on stdout.
///
/// Internally tagged on `status` so the wire shape stays `{"status":"success",...}` /
/// `{"status":"error",...}` while the Rust side gets exhaustive matching.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ContainerOutput {
    Success {
        #[serde(default)]
        result: Option<String>,
        #[serde(default)]
        new_session_id: Option<String>,
    },
    Error {
        error: String,
        #[serde(default)]
        result: Option<String>,
        #[serde(default)]
        new_session_id: Option<String>,
    },
}

impl ContainerOutput {
    pub fn result(&self) -> Option<&str> {
        match self {
            Self::Success { result, .. } | Self::Error { result, .. } => result.as_deref(),
        }
    }

    pub fn new_session_id(&self) -> Option<&str> {
        match self {
            Self::Success { new_session_id, .. } | Self::Error { new_session_id, .. } => {
                new_session_id.as_deref()
            }
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn error(err: impl Into<String>) -> Self {
        Self::Error {
            error: err.into(),
            result: None,
            new_session_id: None,
        }
    }
}
