use std::collections::HashMap;

use chrono::{DateTime, Utc};

/// Escape XML special characters.
pub fn escape_xml(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

/// Format messages into XML for Claude input.
pub fn format_messages_xml(messages: &[MessageData]) -> String {
    let mut lines = vec!["<messages>".to_string()];

    for msg in messages {
        let sender_name = msg.sender_name.as_deref().unwrap_or(&msg.sender);
        let ts_str = msg.timestamp.to_rfc3339();
        let role = if msg.is_from_me { "assistant" } else { "user" };
        let content = escape_xml(&msg.content);
        let sender_escaped = escape_xml(sender_name);

        lines.push(format!(
            "  <message role=\"{role}\" sender=\"{sender_escaped}\" timestamp=\"{ts_str}\">"
        ));
        lines.push(format!("    {content}"));
        lines.push("  </message>".to_string());
    }

    lines.push("</messages>".to_string());
    lines.join("\n")
}

/// Format container output into XML.
pub fn format_output_xml(
    status: &str,
    result: Option<&str>,
    error: Option<&str>,
    new_session_id: Option<&str>,
) -> String {
    let mut lines = vec!["<output>".to_string()];

    lines.push(format!("  <status>{status}</status>"));

    if let Some(r) = result {
        lines.push(format!("  <result>{}</result>", escape_xml(r)));
    }
    if let Some(e) = error {
        lines.push(format!("  <error>{}</error>", escape_xml(e)));
    }
    if let Some(sid) = new_session_id {
        lines.push(format!(
            "  <new_session_id>{}</new_session_id>",
            escape_xml(sid)
        ));
    }

    lines.push("</output>".to_string());
    lines.join("\n")
}

/// Parse JSON input string into a HashMap.
pub fn parse_input_json(input: &str) -> Result<HashMap<String, serde_json::Value>, String> {
    serde_json::from_str(input).map_err(|e| format!("Invalid JSON input: {e}"))
}

/// Serialize output data to JSON string.
pub fn serialize_output(data: &HashMap<String, serde_json::Value>) -> Result<String, String> {
    serde_json::to_string(data).map_err(|e| format!("JSON serialization error: {e}"))
}

/// Simple message data for formatting.
pub struct MessageData {
    pub sender: String,
    pub sender_name: Option<String>,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub is_from_me: bool,
}
