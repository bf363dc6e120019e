use super::DiscordTools;
use crate::args::Args;
use crate::format;
use crate::protocol::{ToolError, ToolOutcome, ToolResult};
use base64::Engine;
use chrono::{SecondsFormat, Utc};
use dmcp_discord::api::MAX_HISTORY_PAGE;
use dmcp_discord::model::WireMessage;
use dmcp_discord::NewFile;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::info;

const DEFAULT_READ_LIMIT: u64 = 10;
/// Discord refuses member timeouts longer than 28 days.
const MAX_TIMEOUT_MINUTES: u64 = 28 * 24 * 60;

impl DiscordTools {
    pub(super) async fn send_message(&self, args: &Args) -> ToolOutcome {
        let channel = args.snowflake("channel_id")?.to_string();
        let content = args.string("content")?;

        let message = self
            .client
            .api()
            .create_message(&channel, &content)
            .await
            .map_err(|e| e.into_channel_error(&channel))?;
        Ok(ToolResult::text(format!(
            "Message sent successfully. Message ID: {}",
            message.id
        )))
    }

    pub(super) async fn read_messages(&self, args: &Args) -> ToolOutcome {
        let channel = args.snowflake("channel_id")?.to_string();
        let limit = args
            .opt_u64("limit")?
            .unwrap_or(DEFAULT_READ_LIMIT)
            .clamp(1, MAX_HISTORY_PAGE as u64) as usize;

        let messages = self
            .client
            .api()
            .get_messages(&channel, None, limit)
            .await
            .map_err(|e| e.into_channel_error(&channel))?;
        Ok(ToolResult::text(format::read_messages(&messages)))
    }

    /// Deletes the message; a positive `timeout_minutes` also times out its
    /// author when the message lives in a server.
    pub(super) async fn moderate_message(&self, args: &Args) -> ToolOutcome {
        let channel = args.snowflake("channel_id")?.to_string();
        let message_id = args.snowflake("message_id")?.to_string();
        let reason = args.opt_string("reason");
        let timeout_minutes = args
            .opt_u64("timeout_minutes")?
            .unwrap_or(0)
            .min(MAX_TIMEOUT_MINUTES);

        let api = self.client.api();
        let message = api
            .get_message(&channel, &message_id)
            .await?;
        api.delete_message(&channel, &message_id, reason.as_deref())
            .await?;
        info!(channel = %channel, message_id = %message_id, "message deleted");

        if timeout_minutes > 0 {
            let guild_id = match message.guild_id {
                Some(guild) => Some(guild),
                None => api.get_channel(&channel).await?.guild_id,
            };
            if let Some(guild_id) = guild_id {
                let until = Utc::now() + chrono::Duration::minutes(timeout_minutes as i64);
                api.timeout_member(
                    &guild_id,
                    &message.author.id,
                    Some(&until.to_rfc3339_opts(SecondsFormat::Secs, true)),
                    Some(format::reason_or(reason.as_deref(), "User timed out via MCP")),
                )
                .await?;
                return Ok(ToolResult::text(format!(
                    "Message deleted and user timed out for {} minutes.",
                    timeout_minutes
                )));
            }
        }

        Ok(ToolResult::text("Message deleted successfully."))
    }

    pub(super) async fn send_file(&self, args: &Args) -> ToolOutcome {
        let channel = args.snowflake("channel_id")?.to_string();
        let file_path = args.string("file_path")?;
        let content = args.opt_string("content").unwrap_or_default();

        let bytes = match tokio::fs::read(&file_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Ok(ToolResult::error(format!(
                    "Error: File not found at path: {}",
                    file_path
                )))
            }
            Err(e) => return Err(e.into()),
        };
        let filename = args
            .opt_string("filename")
            .unwrap_or_else(|| safe_file_name(&file_path));

        let message = self
            .upload(&channel, &content, NewFile { filename: filename.clone(), bytes })
            .await?;
        Ok(ToolResult::text(format!(
            "File uploaded successfully. Message ID: {}, Filename: {}",
            message.id, filename
        )))
    }

    pub(super) async fn send_file_from_bytes(&self, args: &Args) -> ToolOutcome {
        let channel = args.snowflake("channel_id")?.to_string();
        let bytes = decode_file_data(&args.string("file_data")?)?;
        let filename = args.string("filename")?;
        let content = args.opt_string("content").unwrap_or_default();

        let message = self
            .upload(&channel, &content, NewFile { filename: filename.clone(), bytes })
            .await?;
        Ok(ToolResult::text(format!(
            "File uploaded successfully from bytes. Message ID: {}, Filename: {}",
            message.id, filename
        )))
    }

    async fn upload(
        &self,
        channel: &str,
        content: &str,
        file: NewFile,
    ) -> Result<WireMessage, ToolError> {
        let size = file.bytes.len();
        let message = self
            .client
            .api()
            .upload_file(channel, content, file)
            .await
            .map_err(|e| e.into_channel_error(channel))?;
        info!(channel = %channel, message_id = %message.id, bytes = size, "file uploaded");
        Ok(message)
    }

    pub(super) async fn get_message_attachments(&self, args: &Args) -> ToolOutcome {
        let channel = args.snowflake("channel_id")?.to_string();
        let message_id = args.snowflake("message_id")?.to_string();

        let message = self
            .client
            .api()
            .get_message(&channel, &message_id)
            .await?;
        Ok(ToolResult::text(format::attachments(&message.attachments)))
    }

    pub(super) async fn download_attachment(&self, args: &Args) -> ToolOutcome {
        let channel = args.snowflake("channel_id")?.to_string();
        let message_id = args.snowflake("message_id")?.to_string();
        let filename = args.string("attachment_filename")?;
        let save_path = args.opt_string("save_path");

        let api = self.client.api();
        let message = api
            .get_message(&channel, &message_id)
            .await?;
        let Some(attachment) = message.attachments.iter().find(|a| a.filename == filename) else {
            return Ok(ToolResult::error(format!(
                "Error: Attachment '{}' not found in message",
                filename
            )));
        };

        let target = match save_path {
            Some(path) => PathBuf::from(path),
            None => self.download_dir.join(safe_file_name(&attachment.filename)),
        };
        let target = absolute(&target)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let bytes = api.download(&attachment.url).await?;
        tokio::fs::write(&target, &bytes).await?;
        info!(path = %target.display(), bytes = bytes.len(), "attachment saved");

        Ok(ToolResult::text(format!(
            "Attachment downloaded successfully:\n- Filename: {}\n- Saved to: {}\n- Absolute path: {}\n- Size: {} bytes",
            filename,
            target.display(),
            target.display(),
            attachment.size
        )))
    }

    pub(super) async fn add_reaction(&self, args: &Args) -> ToolOutcome {
        let channel = args.snowflake("channel_id")?.to_string();
        let message_id = args.snowflake("message_id")?.to_string();
        let emoji = args.string("emoji")?;

        self.client
            .api()
            .add_reaction(&channel, &message_id, &emoji)
            .await?;
        Ok(ToolResult::text(format!("Added reaction {} to message", emoji)))
    }

    pub(super) async fn add_multiple_reactions(&self, args: &Args) -> ToolOutcome {
        let channel = args.snowflake("channel_id")?.to_string();
        let message_id = args.snowflake("message_id")?.to_string();
        let emojis = args.string_list("emojis")?;

        // In order: Discord shows reactions in the order they were added.
        for emoji in &emojis {
            self.client
                .api()
                .add_reaction(&channel, &message_id, emoji)
                .await?;
        }
        Ok(ToolResult::text(format!(
            "Added reactions: {} to message",
            emojis.join(", ")
        )))
    }

    pub(super) async fn remove_reaction(&self, args: &Args) -> ToolOutcome {
        let channel = args.snowflake("channel_id")?.to_string();
        let message_id = args.snowflake("message_id")?.to_string();
        let emoji = args.string("emoji")?;

        self.client
            .api()
            .remove_own_reaction(&channel, &message_id, &emoji)
            .await?;
        Ok(ToolResult::text(format!(
            "Removed reaction {} from message",
            emoji
        )))
    }
}

/// Attachment names come from other users; keep only the final component.
fn safe_file_name(name: &str) -> String {
    Path::new(name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "attachment".to_string())
}

/// Standard alphabet; whitespace from wrapped encodings is ignored.
fn decode_file_data(data: &str) -> Result<Vec<u8>, ToolError> {
    let compact: String = data.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    base64::engine::general_purpose::STANDARD
        .decode(compact)
        .map_err(|e| ToolError::invalid(format!("'file_data' is not valid base64: {}", e)))
}

fn absolute(path: &Path) -> std::io::Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}
