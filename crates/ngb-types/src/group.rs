use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Registered group/chat configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisteredGroup {
    pub jid: String,
    pub name: String,
    pub folder: String,
    #[serde(default)]
    pub trigger_pattern: Option<String>,
    #[serde(default)]
    pub container_config: Option<HashMap<String, serde_json::Value>>,
    #[serde(default = "default_true")]
    pub requires_trigger: bool,
    /// Explicit main-group predicate. Prefer this over the `folder == "main"`
    /// fallback heuristic used for groups persisted before this field existed.
    #[serde(default)]
    pub is_main: bool,
}

fn default_true() -> bool {
    true
}

impl RegisteredGroup {
    /// Resolve main-group status, falling back to the `folder == "main"`
    /// heuristic when the explicit flag was never set.
    pub fn resolved_is_main(&self) -> bool {
        self.is_main || self.folder == "main"
    }
}
