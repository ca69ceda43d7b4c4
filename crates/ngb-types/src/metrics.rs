use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Container execution metric.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerMetric {
    #[serde(default)]
    pub id: Option<i64>,
    pub group_folder: String,
    pub channel: String,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_seconds: Option<f64>,
    #[serde(default = "default_status")]
    pub status: String,
    #[serde(default)]
    pub prompt_tokens: Option<i64>,
    #[serde(default)]
    pub completion_tokens: Option<i64>,
    #[serde(default)]
    pub total_tokens: Option<i64>,
    #[serde(default)]
    pub error: Option<String>,
}

fn default_status() -> String {
    "running".to_string()
}

/// Request statistics metric.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestMetric {
    #[serde(default)]
    pub id: Option<i64>,
    pub channel: String,
    #[serde(default)]
    pub group_folder: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub request_type: String,
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
}
