use serde::{Deserialize, Serialize};

/// A single user-declared bind mount request, prior to validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mount {
    pub host_path: String,
    pub container_path: String,
    #[serde(default)]
    pub read_only: bool,
}

/// Declarative policy of permitted host path roots for user-supplied bind mounts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Allowlist {
    pub allowed_roots: Vec<String>,
    #[serde(default)]
    pub blocked_patterns: Vec<String>,
}
