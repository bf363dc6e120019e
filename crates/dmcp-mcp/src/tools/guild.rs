use super::{member_failure, DiscordTools};
use crate::args::Args;
use crate::format;
use crate::protocol::{ToolError, ToolOutcome, ToolResult};
use dmcp_discord::api::{MAX_MEMBER_PAGE, THREAD_ARCHIVE_MINUTES};
use dmcp_discord::model::WireRole;
use dmcp_discord::{NewChannel, NewRole, NewThread, PermissionOverwrite};
use tracing::{info, warn};

const DEFAULT_MEMBER_LIMIT: u64 = 100;
const MAX_BAN_DELETE_DAYS: u64 = 7;

const VIEW_CHANNEL: u64 = 1 << 10;
const SEND_MESSAGES: u64 = 1 << 11;
const READ_MESSAGE_HISTORY: u64 = 1 << 16;

const DEFAULT_ARCHIVE_MINUTES: u64 = 1440;

macro_rules! server_or_bail {
    ($tools:expr, $args:expr) => {
        match $tools.server_id($args)? {
            Some(id) => id,
            None => return Ok(ToolResult::error(format::MISSING_SERVER)),
        }
    };
}

impl DiscordTools {
    pub(super) async fn get_server_info(&self, args: &Args) -> ToolOutcome {
        let guild_id = server_or_bail!(self, args);

        let api = self.client.api();
        let guild = api.get_guild(&guild_id).await?;
        let channels = api.get_guild_channels(&guild_id).await?;
        Ok(ToolResult::text(format::server_info(&guild, &channels)))
    }

    pub(super) async fn list_members(&self, args: &Args) -> ToolOutcome {
        let guild_id = server_or_bail!(self, args);
        let limit = args
            .opt_u64("limit")?
            .unwrap_or(DEFAULT_MEMBER_LIMIT)
            .clamp(1, MAX_MEMBER_PAGE as u64) as usize;

        let members = self.client.api().list_members(&guild_id, limit).await?;
        Ok(ToolResult::text(format::members(&members)))
    }

    pub(super) async fn get_user_info(&self, args: &Args) -> ToolOutcome {
        let user_id = args.snowflake("user_id")?.to_string();
        let user = self.client.api().get_user(&user_id).await?;
        Ok(ToolResult::text(format::user_info(&user)))
    }

    // Roles

    pub(super) async fn add_role(&self, args: &Args) -> ToolOutcome {
        self.change_role(args, true).await
    }

    pub(super) async fn remove_role(&self, args: &Args) -> ToolOutcome {
        self.change_role(args, false).await
    }

    async fn change_role(&self, args: &Args, add: bool) -> ToolOutcome {
        let guild_id = server_or_bail!(self, args);
        let user_id = args.snowflake("user_id")?.to_string();
        let role_id = args.snowflake("role_id")?.to_string();

        let api = self.client.api();
        let member = api.get_member(&guild_id, &user_id).await?;
        let Some(role) = find_role(api.get_roles(&guild_id).await?, &role_id) else {
            return Ok(role_not_found(&role_id));
        };
        let member_name = member
            .user
            .map(|u| u.username)
            .unwrap_or_else(|| user_id.clone());

        if add {
            api.add_member_role(&guild_id, &user_id, &role_id, Some("Role added via MCP"))
                .await?;
            info!(guild = %guild_id, user = %user_id, role = %role_id, "role added");
            Ok(ToolResult::text(format!(
                "Added role {} to user {}",
                role.name, member_name
            )))
        } else {
            api.remove_member_role(&guild_id, &user_id, &role_id, Some("Role removed via MCP"))
                .await?;
            info!(guild = %guild_id, user = %user_id, role = %role_id, "role removed");
            Ok(ToolResult::text(format!(
                "Removed role {} from user {}",
                role.name, member_name
            )))
        }
    }

    pub(super) async fn create_role(&self, args: &Args) -> ToolOutcome {
        let guild_id = server_or_bail!(self, args);
        let role = NewRole {
            name: args.string("name")?,
            color: args.opt_string("color").map(|c| parse_color(&c)).transpose()?,
            hoist: args.opt_bool("hoist"),
            mentionable: args.opt_bool("mentionable"),
            permissions: args.opt_u64("permissions")?,
        };

        let created = self
            .client
            .api()
            .create_role(&guild_id, &role, Some("Role created via MCP"))
            .await?;
        info!(guild = %guild_id, role = %created.id, "role created");
        Ok(ToolResult::text(format!(
            "Created role {} (ID: {})",
            created.name, created.id
        )))
    }

    pub(super) async fn delete_role(&self, args: &Args) -> ToolOutcome {
        let guild_id = server_or_bail!(self, args);
        let role_id = args.snowflake("role_id")?.to_string();
        let reason = args.opt_string("reason");

        let api = self.client.api();
        let Some(role) = find_role(api.get_roles(&guild_id).await?, &role_id) else {
            return Ok(role_not_found(&role_id));
        };
        api.delete_role(
            &guild_id,
            &role_id,
            Some(format::reason_or(reason.as_deref(), "Role deleted via MCP")),
        )
        .await?;
        info!(guild = %guild_id, role = %role_id, "role deleted");
        Ok(ToolResult::text(format!(
            "Deleted role {} (ID: {})",
            role.name, role_id
        )))
    }

    pub(super) async fn list_roles(&self, args: &Args) -> ToolOutcome {
        let guild_id = server_or_bail!(self, args);
        let roles = self.client.api().get_roles(&guild_id).await?;
        Ok(ToolResult::text(format::roles(&roles)))
    }

    // Channels

    /// A `category_id` that is not a category is ignored with a warning.
    pub(super) async fn create_text_channel(&self, args: &Args) -> ToolOutcome {
        let guild_id = server_or_bail!(self, args);
        let name = args.string("name")?;
        let category_id = args.opt_snowflake("category_id")?.map(|c| c.to_string());

        let api = self.client.api();
        let mut channel = NewChannel::text(&name);
        channel.topic = args.opt_string("topic");
        if let Some(category_id) = category_id {
            match api.get_channel(&category_id).await {
                Ok(category) if category.is_category() => channel.parent_id = Some(category.id),
                Ok(_) => warn!(channel = %category_id, "not a category channel, ignoring"),
                Err(e) => warn!(channel = %category_id, error = %e, "category lookup failed, ignoring"),
            }
        }

        let created = api
            .create_guild_channel(&guild_id, &channel, Some("Channel created via MCP"))
            .await?;
        info!(guild = %guild_id, channel = %created.id, "text channel created");
        Ok(ToolResult::text(format!(
            "Created text channel #{} (ID: {})",
            created.display_name(),
            created.id
        )))
    }

    pub(super) async fn delete_channel(&self, args: &Args) -> ToolOutcome {
        let channel_id = args.snowflake("channel_id")?.to_string();
        let reason = args.opt_string("reason");

        self.client
            .api()
            .delete_channel(
                &channel_id,
                Some(format::reason_or(reason.as_deref(), "Channel deleted via MCP")),
            )
            .await
            .map_err(|e| e.into_channel_error(&channel_id))?;
        info!(channel = %channel_id, "channel deleted");
        Ok(ToolResult::text("Deleted channel successfully"))
    }

    pub(super) async fn create_thread(&self, args: &Args) -> ToolOutcome {
        let channel_id = args.snowflake("channel_id")?.to_string();
        let thread = NewThread {
            name: args.string("name")?,
            auto_archive_minutes: archive_minutes(args)?,
            message_id: args.opt_snowflake("message_id")?.map(|m| m.to_string()),
        };

        let api = self.client.api();
        let channel = api
            .get_channel(&channel_id)
            .await
            .map_err(|e| e.into_channel_error(&channel_id))?;
        if !channel.is_text() {
            return Ok(ToolResult::error(
                "Error: The specified channel is not a text channel. Only text channels can have threads.",
            ));
        }

        let created = match api
            .create_thread(&channel_id, &thread, Some("Thread created via MCP"))
            .await
        {
            Ok(created) => created,
            Err(e) if e.is_forbidden() => {
                return Ok(ToolResult::error(
                    "Error: The bot does not have permissions to create threads in this channel.",
                ))
            }
            Err(e) => return Err(e.into()),
        };
        info!(channel = %channel_id, thread = %created.id, "thread created");

        let text = if thread.message_id.is_some() {
            format!(
                "Created thread #{} (ID: {}) from message in channel #{}",
                created.display_name(),
                created.id,
                channel.display_name()
            )
        } else {
            format!(
                "Created public thread #{} (ID: {}) in channel #{}",
                created.display_name(),
                created.id,
                channel.display_name()
            )
        };
        Ok(ToolResult::text(text))
    }

    /// `allow_view` (default true) grants see, post and read history;
    /// false hides the channel from the role. With `modify_everyone` the
    /// @everyone overwrite follows `everyone_can_view` (default false).
    pub(super) async fn set_channel_permissions(&self, args: &Args) -> ToolOutcome {
        let channel_id = args.snowflake("channel_id")?.to_string();
        let raw_role = args.string("role_id")?;
        let Some(target) = overwrite_target(&raw_role) else {
            return Ok(ToolResult::error(format!(
                "Error: Invalid role ID '{}'. Must be a valid role ID or 'everyone'.",
                raw_role
            )));
        };
        let allow_view = args.bool_or("allow_view", true);
        let modify_everyone = args.bool_or("modify_everyone", false);
        let everyone_can_view = args.bool_or("everyone_can_view", false);

        let api = self.client.api();
        let channel = api
            .get_channel(&channel_id)
            .await
            .map_err(|e| e.into_channel_error(&channel_id))?;
        let Some(guild_id) = channel.guild_id.clone() else {
            return Ok(ToolResult::error(
                "Error: Channel permissions can only be set on server channels.",
            ));
        };

        // The @everyone role shares the guild's id.
        let (role_id, role_name) = match target {
            OverwriteTarget::Everyone => (guild_id.clone(), "@everyone".to_string()),
            OverwriteTarget::Role(id) => match find_role(api.get_roles(&guild_id).await?, &id) {
                Some(role) => (role.id, role.name),
                None => return Ok(role_not_found(&id)),
            },
        };

        let overwrite = if allow_view {
            member_access_overwrite(&role_id)
        } else {
            view_overwrite(&role_id, false)
        };
        let mut updates = vec![overwrite];
        if modify_everyone && role_id != guild_id {
            updates.push(view_overwrite(&guild_id, everyone_can_view));
        }
        for overwrite in &updates {
            if let Err(e) = api
                .edit_channel_permissions(&channel_id, overwrite, Some("Permissions set via MCP"))
                .await
            {
                if e.is_forbidden() {
                    return Ok(ToolResult::error(
                        "Error: The bot does not have permissions to modify channel permissions.",
                    ));
                }
                return Err(e.into());
            }
        }
        info!(channel = %channel_id, role = %role_id, allow_view, "channel permissions updated");

        let state = if allow_view {
            "can now see"
        } else {
            "can no longer see"
        };
        let mut text = format!(
            "Updated permissions: Role {} {} the channel #{}.",
            role_name,
            state,
            channel.display_name()
        );
        if updates.len() > 1 {
            text.push_str(if everyone_can_view {
                " @everyone can now see the channel."
            } else {
                " @everyone can no longer see the channel."
            });
        }
        Ok(ToolResult::text(text))
    }

    /// Creates the category and a `<name>-general` text channel inside it.
    pub(super) async fn create_category(&self, args: &Args) -> ToolOutcome {
        let guild_id = server_or_bail!(self, args);
        let name = args.string("name")?;
        let everyone_can_view = args.bool_or("everyone_can_view", true);
        let restricted_role_id = args.opt_snowflake("restricted_role_id")?.map(|r| r.to_string());
        let position = args.opt_u64("position")?;

        let api = self.client.api();
        // The @everyone role shares the guild's id.
        let mut overwrites = vec![view_overwrite(&guild_id, everyone_can_view)];
        if let Some(role_id) = &restricted_role_id {
            if find_role(api.get_roles(&guild_id).await?, role_id).is_some() {
                overwrites.push(member_access_overwrite(role_id));
            } else {
                warn!(role = %role_id, "restricted role not found, skipping its overwrite");
            }
        }

        let mut category = NewChannel::category(&name);
        category.permission_overwrites = overwrites;
        category.position = position.map(|p| i64::try_from(p).unwrap_or(i64::MAX));
        let category = api
            .create_guild_channel(&guild_id, &category, Some("Category created via MCP"))
            .await?;

        let mut general = NewChannel::text(&format!("{}-general", name));
        general.parent_id = Some(category.id.clone());
        let general = api
            .create_guild_channel(&guild_id, &general, Some("Default channel for new category"))
            .await?;
        info!(guild = %guild_id, category = %category.id, "category created");

        let text = match (restricted_role_id.is_some(), everyone_can_view) {
            (true, false) => format!(
                "Created restricted category {} (ID: {}) with default channel #{}. Only specified roles can view it.",
                category.display_name(),
                category.id,
                general.display_name()
            ),
            (false, false) => format!(
                "Created hidden category {} (ID: {}) with default channel #{}. @everyone cannot view it.",
                category.display_name(),
                category.id,
                general.display_name()
            ),
            _ => format!(
                "Created category {} (ID: {}) with default channel #{}",
                category.display_name(),
                category.id,
                general.display_name()
            ),
        };
        Ok(ToolResult::text(text))
    }

    // Members

    pub(super) async fn kick_user(&self, args: &Args) -> ToolOutcome {
        let guild_id = server_or_bail!(self, args);
        let user_id = args.snowflake("user_id")?.to_string();
        let reason = args.opt_string("reason");
        let not_found = format!("User with ID {} not found in the server.", user_id);

        let api = self.client.api();
        let member = match api.get_member(&guild_id, &user_id).await {
            Ok(member) => member,
            Err(e) => return member_failure(e, not_found, "kick"),
        };
        if let Err(e) = api
            .kick_member(
                &guild_id,
                &user_id,
                Some(format::reason_or(reason.as_deref(), "Kicked via MCP")),
            )
            .await
        {
            return member_failure(e, not_found, "kick");
        }

        info!(guild = %guild_id, user = %user_id, "user kicked");
        let (name, discriminator) = member
            .user
            .map(|u| (u.username, u.discriminator.unwrap_or_else(|| "0".to_string())))
            .unwrap_or_else(|| (user_id.clone(), "0".to_string()));
        Ok(ToolResult::text(format!(
            "Successfully kicked user {}#{} (ID: {}) from the server.",
            name, discriminator, user_id
        )))
    }

    pub(super) async fn ban_user(&self, args: &Args) -> ToolOutcome {
        let guild_id = server_or_bail!(self, args);
        let user_id = args.snowflake("user_id")?.to_string();
        let reason = args.opt_string("reason");
        let days = args
            .opt_u64("delete_message_days")?
            .unwrap_or(0)
            .min(MAX_BAN_DELETE_DAYS);

        if let Err(e) = self
            .client
            .api()
            .ban_member(
                &guild_id,
                &user_id,
                days as u32,
                Some(format::reason_or(reason.as_deref(), "Banned via MCP")),
            )
            .await
        {
            return member_failure(e, format!("User with ID {} not found.", user_id), "ban");
        }

        info!(guild = %guild_id, user = %user_id, days, "user banned");
        Ok(ToolResult::text(format!(
            "Successfully banned user with ID {} from the server. Deleted messages from the past {} days.",
            user_id, days
        )))
    }
}

fn find_role(roles: Vec<WireRole>, role_id: &str) -> Option<WireRole> {
    roles.into_iter().find(|r| r.id == role_id)
}

fn role_not_found(role_id: &str) -> ToolResult {
    ToolResult::error(format!(
        "Error: Role with ID {} not found in the server.",
        role_id
    ))
}

fn view_overwrite(role_id: &str, can_view: bool) -> PermissionOverwrite {
    if can_view {
        PermissionOverwrite::role(role_id, VIEW_CHANNEL, 0)
    } else {
        PermissionOverwrite::role(role_id, 0, VIEW_CHANNEL)
    }
}

/// See, post and read back.
fn member_access_overwrite(role_id: &str) -> PermissionOverwrite {
    PermissionOverwrite::role(role_id, VIEW_CHANNEL | SEND_MESSAGES | READ_MESSAGE_HISTORY, 0)
}

/// `everyone` (any case) targets the guild's @everyone role.
fn overwrite_target(raw: &str) -> Option<OverwriteTarget> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("everyone") {
        return Some(OverwriteTarget::Everyone);
    }
    raw.parse::<u64>()
        .ok()
        .filter(|id| *id > 0)
        .map(|id| OverwriteTarget::Role(id.to_string()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum OverwriteTarget {
    Everyone,
    Role(String),
}

fn archive_minutes(args: &Args) -> Result<u32, ToolError> {
    let minutes = args
        .opt_u64("auto_archive_duration")?
        .unwrap_or(DEFAULT_ARCHIVE_MINUTES);
    THREAD_ARCHIVE_MINUTES
        .iter()
        .copied()
        .find(|allowed| u64::from(*allowed) == minutes)
        .ok_or_else(|| {
            ToolError::invalid(format!(
                "'auto_archive_duration' must be one of 60, 1440, 4320, 10080, got {}",
                minutes
            ))
        })
}

/// `#FF0000`, `ff0000` and `0xff0000` all parse.
fn parse_color(raw: &str) -> Result<u32, ToolError> {
    let hex = raw.trim().trim_start_matches('#');
    let hex = hex
        .strip_prefix("0x")
        .or_else(|| hex.strip_prefix("0X"))
        .unwrap_or(hex);
    u32::from_str_radix(hex, 16)
        .ok()
        .filter(|c| *c <= 0xFF_FFFF)
        .ok_or_else(|| ToolError::invalid(format!("color '{}' is not a hex RGB value", raw)))
}
