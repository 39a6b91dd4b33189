//! 📨 MCP envelope types

use serde::Serialize;
use serde_json::Value;

/// 🎯 Handshake response for `initialize`
#[derive(Debug, Serialize)]
pub struct InitializeResult {
    pub session_id: String,
    pub server_version: String,
    /// True when the client reclaimed a disconnected session
    pub reconnected: bool,
}

impl InitializeResult {
    pub fn new(session_id: &str, reconnected: bool) -> Self {
        Self {
            session_id: session_id.to_string(),
            server_version: env!("CARGO_PKG_VERSION").to_string(),
            reconnected,
        }
    }
}

/// 🔧 Tools list response
#[derive(Debug, Serialize)]
pub struct ToolsListResult {
    pub tools: Vec<ToolInfo>,
}

/// 🔧 Individual tool information
#[derive(Debug, Serialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initialize_result_shape() {
        let result = InitializeResult::new("sess-1", true);
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["session_id"], "sess-1");
        assert_eq!(value["reconnected"], true);
        assert!(value["server_version"].is_string());
    }

    #[test]
    fn test_tool_info_uses_camel_case_schema_key() {
        let info = ToolInfo {
            name: "hover".into(),
            description: "d".into(),
            input_schema: serde_json::json!({"type": "object"}),
        };
        let value = serde_json::to_value(&info).unwrap();
        assert!(value.get("inputSchema").is_some());
    }
}
