//! MCP surface for the Discord bridge: the JSON-RPC stdio server and the
//! tool catalog it exposes.

pub mod args;
pub mod format;
pub mod protocol;
pub mod server;
pub mod tools;

pub use protocol::{Tool, ToolContent, ToolError, ToolHandler, ToolOutcome, ToolResult};
pub use server::{McpServer, PROTOCOL_VERSION};
pub use tools::{DiscordTools, UnreadTools, TIMEOUT_TEXT};
