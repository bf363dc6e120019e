//! The Discord tool catalog.

mod catalog;
mod guild;
mod messages;
#[cfg(test)]
mod testing;
mod unread;

pub use catalog::all as catalog;
pub use unread::{UnreadTools, TIMEOUT_TEXT};

use crate::args::Args;
use crate::format;
use crate::protocol::{Tool, ToolError, ToolHandler, ToolOutcome, ToolResult};
use async_trait::async_trait;
use dmcp_discord::{AgentStatus, DiscordClient, DiscordError};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub struct DiscordTools {
    client: Arc<DiscordClient>,
    unread: UnreadTools,
    default_server_id: Option<String>,
    download_dir: PathBuf,
}

impl DiscordTools {
    pub fn new(
        client: Arc<DiscordClient>,
        unread: UnreadTools,
        default_server_id: Option<String>,
    ) -> Self {
        Self {
            client,
            unread,
            default_server_id,
            download_dir: PathBuf::from("downloads"),
        }
    }

    /// Where `download_attachment` saves when no `save_path` is given.
    pub fn with_download_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.download_dir = dir.into();
        self
    }

    /// `server_id` argument, else the configured default.
    fn server_id(&self, args: &Args) -> Result<Option<String>, ToolError> {
        if let Some(id) = args.opt_snowflake("server_id")? {
            return Ok(Some(id.to_string()));
        }
        Ok(self.default_server_id.clone())
    }

    async fn set_agent_status(&self, args: &Args) -> ToolOutcome {
        let status = AgentStatus::new(&args.string("status")?, args.opt_string("details").as_deref());
        if let Err(e) = self.client.set_agent_status(status.clone()) {
            warn!(error = %e, "presence update skipped");
        }
        let details = status
            .details
            .as_deref()
            .map(|d| format!(" with details: {}", d))
            .unwrap_or_default();
        Ok(ToolResult::text(format!(
            "Agent status set to '{}'{}.",
            status.status, details
        )))
    }

    fn check_connection(&self) -> ToolOutcome {
        Ok(ToolResult::text(format::connection_status(
            &self.client.state().snapshot(),
        )))
    }
}

/// Not-found and missing-permission answers for member actions.
fn member_failure(err: DiscordError, not_found: String, action: &str) -> ToolOutcome {
    if err.is_not_found() {
        return Ok(ToolResult::error(not_found));
    }
    if err.is_forbidden() {
        return Ok(ToolResult::error(format!(
            "Bot doesn't have permission to {} this user. Make sure the bot's role is higher than the user's role.",
            action
        )));
    }
    Err(err.into())
}

#[async_trait]
impl ToolHandler for DiscordTools {
    fn tools(&self) -> Vec<Tool> {
        catalog::all()
    }

    async fn call(&self, name: &str, arguments: Value, cancel: CancellationToken) -> ToolOutcome {
        let args = Args::from_value(arguments)?;
        debug!(tool = name, "tool call");

        match name {
            // Unread protocol
            "get_unread_messages" => self.unread.get_unread_messages(&args).await,
            "wait_for_message" => self.unread.wait_for_message(&args, &cancel).await,

            // Messages
            "send_message" => self.send_message(&args).await,
            "read_messages" => self.read_messages(&args).await,
            "moderate_message" => self.moderate_message(&args).await,
            "get_message_attachments" => self.get_message_attachments(&args).await,
            "download_attachment" => self.download_attachment(&args).await,
            "send_file" => self.send_file(&args).await,
            "send_file_from_bytes" => self.send_file_from_bytes(&args).await,
            "add_reaction" => self.add_reaction(&args).await,
            "add_multiple_reactions" => self.add_multiple_reactions(&args).await,
            "remove_reaction" => self.remove_reaction(&args).await,

            // Server
            "get_server_info" => self.get_server_info(&args).await,
            "list_members" => self.list_members(&args).await,
            "get_user_info" => self.get_user_info(&args).await,
            "add_role" => self.add_role(&args).await,
            "remove_role" => self.remove_role(&args).await,
            "create_role" => self.create_role(&args).await,
            "delete_role" => self.delete_role(&args).await,
            "list_roles" => self.list_roles(&args).await,
            "create_text_channel" => self.create_text_channel(&args).await,
            "delete_channel" => self.delete_channel(&args).await,
            "create_thread" => self.create_thread(&args).await,
            "set_channel_permissions" => self.set_channel_permissions(&args).await,
            "create_category" => self.create_category(&args).await,
            "kick_user" => self.kick_user(&args).await,
            "ban_user" => self.ban_user(&args).await,

            // Status
            "set_agent_status" => self.set_agent_status(&args).await,
            "check_connection" => self.check_connection(),

            other => Err(ToolError::UnknownTool(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dmcp_core::{ChatClient, EventListener, UnreadReconciler};
    use dmcp_discord::DiscordSettings;
    use serde_json::json;

    fn tools(default_server: Option<&str>) -> DiscordTools {
        // Points at a closed local port so nothing leaves the machine.
        let mut settings = DiscordSettings::new("token");
        settings.api_base = "http://127.0.0.1:9/api/v10".to_string();
        let (client, _session) = DiscordClient::connect(&settings).expect("client");
        let client = Arc::new(client);
        let chat: Arc<dyn ChatClient> = client.clone();
        let listener = Arc::new(EventListener::start(Arc::clone(&chat)));
        let unread = UnreadTools::new(Arc::new(UnreadReconciler::new(chat, listener)), 20);
        DiscordTools::new(client, unread, default_server.map(str::to_string))
    }

    async fn call(tools: &DiscordTools, name: &str, args: Value) -> ToolOutcome {
        tools.call(name, args, CancellationToken::new()).await
    }

    #[tokio::test]
    async fn every_catalog_entry_is_dispatched() {
        let tools = tools(None);
        let cancelled = CancellationToken::new();
        cancelled.cancel();
        for tool in tools.tools() {
            // Empty arguments fail validation or the server lookup, never
            // the dispatch itself.
            let outcome = tools.call(&tool.name, json!({}), cancelled.clone()).await;
            assert!(
                !matches!(outcome, Err(ToolError::UnknownTool(_))),
                "{} is not dispatched",
                tool.name
            );
        }
    }

    #[tokio::test]
    async fn unknown_tool_is_reported() {
        let tools = tools(None);
        let err = call(&tools, "launch_rocket", json!({})).await.expect_err("unknown");
        assert!(matches!(err, ToolError::UnknownTool(name) if name == "launch_rocket"));
    }

    #[tokio::test]
    async fn server_tools_need_a_server_id() {
        let tools = tools(None);
        for name in ["get_server_info", "list_members", "list_roles"] {
            let result = call(&tools, name, json!({})).await.expect("result");
            assert!(result.is_error);
            assert_eq!(result.joined_text(), format::MISSING_SERVER);
        }
    }

    #[tokio::test]
    async fn server_id_falls_back_to_default() {
        let tools = tools(Some("555"));
        let args = Args::from_value(json!({})).expect("args");
        assert_eq!(tools.server_id(&args).expect("id").as_deref(), Some("555"));

        let args = Args::from_value(json!({"server_id": "777"})).expect("args");
        assert_eq!(tools.server_id(&args).expect("id").as_deref(), Some("777"));

        let args = Args::from_value(json!({"server_id": "abc"})).expect("args");
        assert!(tools.server_id(&args).is_err());
    }

    #[tokio::test]
    async fn missing_required_arguments_fail_before_any_request() {
        let tools = tools(Some("555"));
        let err = call(&tools, "send_message", json!({"channel_id": "1"}))
            .await
            .expect_err("content missing");
        assert!(err.to_string().contains("content"));

        let err = call(&tools, "create_role", json!({"name": "mods", "color": "#zz0000"}))
            .await
            .expect_err("bad color");
        assert!(err.to_string().contains("color"));
    }

    #[tokio::test]
    async fn upload_tools_validate_their_input_locally() {
        let tools = tools(None);
        let missing = std::env::temp_dir().join("dmcp-no-such-upload.bin");
        let result = call(
            &tools,
            "send_file",
            json!({"channel_id": "1", "file_path": missing.to_string_lossy()}),
        )
        .await
        .expect("result");
        assert!(result.is_error);
        assert!(result.joined_text().starts_with("Error: File not found at path: "));

        let err = call(
            &tools,
            "send_file_from_bytes",
            json!({"channel_id": "1", "file_data": "%%%", "filename": "a.txt"}),
        )
        .await
        .expect_err("bad base64");
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[tokio::test]
    async fn channel_tools_reject_bad_arguments_before_any_request() {
        let tools = tools(None);
        let result = call(
            &tools,
            "set_channel_permissions",
            json!({"channel_id": "1", "role_id": "moderators"}),
        )
        .await
        .expect("result");
        assert!(result.is_error);
        assert_eq!(
            result.joined_text(),
            "Error: Invalid role ID 'moderators'. Must be a valid role ID or 'everyone'."
        );

        let err = call(
            &tools,
            "create_thread",
            json!({"channel_id": "1", "name": "t", "auto_archive_duration": 90}),
        )
        .await
        .expect_err("bad duration");
        assert!(err.to_string().contains("auto_archive_duration"));
    }

    #[tokio::test]
    async fn agent_status_and_connection_report() {
        let tools = tools(None);
        let result = call(
            &tools,
            "set_agent_status",
            json!({"status": "Working", "details": "Reviewing PR"}),
        )
        .await
        .expect("status");
        assert_eq!(
            result.joined_text(),
            "Agent status set to 'working' with details: Reviewing PR."
        );

        let result = call(&tools, "check_connection", json!({})).await.expect("status");
        let text = result.joined_text();
        assert!(text.contains("- Discord client ready: false"));
        assert!(text.contains("- Bot user: None"));
        assert!(text.ends_with("- Agent status: working (Reviewing PR)"));
    }

    #[test]
    fn member_failures_map_to_texts() {
        let result = member_failure(
            DiscordError::NotFound {
                route: "/guilds/1/members/2".into(),
            },
            "User with ID 2 not found in the server.".into(),
            "kick",
        )
        .expect("result");
        assert_eq!(result.joined_text(), "User with ID 2 not found in the server.");

        let result = member_failure(
            DiscordError::Forbidden {
                route: "/guilds/1/bans/2".into(),
            },
            String::new(),
            "ban",
        )
        .expect("result");
        assert!(result.joined_text().starts_with("Bot doesn't have permission to ban this user."));

        assert!(member_failure(DiscordError::NotConnected, String::new(), "kick").is_err());
    }
}
