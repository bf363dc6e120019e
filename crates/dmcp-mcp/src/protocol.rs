//! Tool-facing MCP types.

use async_trait::async_trait;
use dmcp_core::CoreError;
use dmcp_discord::DiscordError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

impl Tool {
    pub fn new(name: &str, description: &str, input_schema: Value) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            input_schema,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub content: Vec<ToolContent>,
    #[serde(rename = "isError", default)]
    pub is_error: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ToolContent {
    #[serde(rename = "text")]
    Text { text: String },
}

impl ToolResult {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text { text: text.into() }],
            is_error: false,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text { text: text.into() }],
            is_error: true,
        }
    }

    /// All text blocks joined, for logs and tests.
    pub fn joined_text(&self) -> String {
        self.content
            .iter()
            .map(|c| match c {
                ToolContent::Text { text } => text.as_str(),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// Surfaced as a JSON-RPC error rather than a tool result.
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Discord(#[from] DiscordError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ToolError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArguments(message.into())
    }
}

pub type ToolOutcome = Result<ToolResult, ToolError>;

/// A set of tools served over one MCP connection.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    fn tools(&self) -> Vec<Tool>;

    /// `cancel` fires when the client cancels the request or the server
    /// shuts down.
    async fn call(&self, name: &str, arguments: Value, cancel: CancellationToken) -> ToolOutcome;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn result_serialises_with_mcp_field_names() {
        let value = serde_json::to_value(ToolResult::error("boom")).expect("json");
        assert_eq!(
            value,
            json!({"content": [{"type": "text", "text": "boom"}], "isError": true})
        );
    }

    #[test]
    fn tool_schema_uses_camel_case_key() {
        let tool = Tool::new("ping", "Ping", json!({"type": "object"}));
        let value = serde_json::to_value(tool).expect("json");
        assert!(value.get("inputSchema").is_some());
    }

    #[test]
    fn core_errors_keep_their_message() {
        let err: ToolError = CoreError::channel_not_found(99).into();
        assert_eq!(err.to_string(), "channel 99 not found");
    }
}
