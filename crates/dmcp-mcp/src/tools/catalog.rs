//! Tool definitions advertised by `tools/list`.

use crate::protocol::Tool;
use serde_json::{json, Value};

fn schema(properties: Value, required: &[&str]) -> Value {
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

fn id(description: &str) -> Value {
    json!({ "type": "string", "description": description })
}

fn server_id() -> Value {
    id("Discord server ID (optional, falls back to the default server)")
}

fn text(description: &str) -> Value {
    json!({ "type": "string", "description": description })
}

fn flag(description: &str) -> Value {
    json!({ "type": "boolean", "description": description })
}

fn number(description: &str) -> Value {
    json!({ "type": "number", "description": description })
}

pub fn all() -> Vec<Tool> {
    let mut tools = messages();
    tools.extend(reactions());
    tools.extend(server());
    tools.extend(roles());
    tools.extend(channels());
    tools.extend(members());
    tools.extend(unread());
    tools.extend(status());
    tools
}

fn messages() -> Vec<Tool> {
    vec![
        Tool::new(
            "send_message",
            "Send a message to a specific channel",
            schema(
                json!({
                    "channel_id": id("Discord channel ID"),
                    "content": text("Message content"),
                }),
                &["channel_id", "content"],
            ),
        ),
        Tool::new(
            "read_messages",
            "Read recent messages from a channel, newest first, with reactions",
            schema(
                json!({
                    "channel_id": id("Discord channel ID"),
                    "limit": {
                        "type": "number",
                        "description": "Number of messages to fetch (max 100)",
                        "minimum": 1,
                        "maximum": 100,
                    },
                }),
                &["channel_id"],
            ),
        ),
        Tool::new(
            "moderate_message",
            "Delete a message and optionally time out its author",
            schema(
                json!({
                    "channel_id": id("Channel ID containing the message"),
                    "message_id": id("ID of message to moderate"),
                    "reason": text("Reason for moderation"),
                    "timeout_minutes": {
                        "type": "number",
                        "description": "Optional timeout duration in minutes",
                        "minimum": 0,
                        "maximum": 40320,
                    },
                }),
                &["channel_id", "message_id", "reason"],
            ),
        ),
        Tool::new(
            "get_message_attachments",
            "List the attachments of a message",
            schema(
                json!({
                    "channel_id": id("Discord channel ID"),
                    "message_id": id("Discord message ID"),
                }),
                &["channel_id", "message_id"],
            ),
        ),
        Tool::new(
            "download_attachment",
            "Download an attachment from a message to a local file",
            schema(
                json!({
                    "channel_id": id("Discord channel ID"),
                    "message_id": id("Discord message ID"),
                    "attachment_filename": text("Filename of the attachment to download"),
                    "save_path": text("Local path to save to (optional, defaults to downloads/<filename>)"),
                }),
                &["channel_id", "message_id", "attachment_filename"],
            ),
        ),
        Tool::new(
            "send_file",
            "Upload a local file to a channel",
            schema(
                json!({
                    "channel_id": id("Discord channel ID"),
                    "file_path": text("Local file path to upload"),
                    "filename": text("Filename shown in Discord (optional, defaults to the file's name)"),
                    "content": text("Message text to send with the file (optional)"),
                }),
                &["channel_id", "file_path"],
            ),
        ),
        Tool::new(
            "send_file_from_bytes",
            "Upload base64-encoded file data to a channel",
            schema(
                json!({
                    "channel_id": id("Discord channel ID"),
                    "file_data": text("Base64-encoded file data"),
                    "filename": text("Filename for the uploaded file"),
                    "content": text("Message text to send with the file (optional)"),
                }),
                &["channel_id", "file_data", "filename"],
            ),
        ),
    ]
}

fn reactions() -> Vec<Tool> {
    let target = |extra: (&str, Value)| {
        let mut props = json!({
            "channel_id": id("Channel containing the message"),
            "message_id": id("Message to react to"),
        });
        props[extra.0] = extra.1;
        props
    };
    vec![
        Tool::new(
            "add_reaction",
            "Add a reaction to a message",
            schema(
                target(("emoji", text("Emoji to react with (Unicode or custom emoji ID)"))),
                &["channel_id", "message_id", "emoji"],
            ),
        ),
        Tool::new(
            "add_multiple_reactions",
            "Add multiple reactions to a message",
            schema(
                target((
                    "emojis",
                    json!({
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Emojis to react with (Unicode or custom emoji IDs)",
                    }),
                )),
                &["channel_id", "message_id", "emojis"],
            ),
        ),
        Tool::new(
            "remove_reaction",
            "Remove the bot's reaction from a message",
            schema(
                target(("emoji", text("Emoji to remove (Unicode or custom emoji ID)"))),
                &["channel_id", "message_id", "emoji"],
            ),
        ),
    ]
}

fn server() -> Vec<Tool> {
    vec![
        Tool::new(
            "get_server_info",
            "Get information about a Discord server, including its channels",
            schema(json!({ "server_id": server_id() }), &[]),
        ),
        Tool::new(
            "list_members",
            "List the members of a server",
            schema(
                json!({
                    "server_id": server_id(),
                    "limit": {
                        "type": "number",
                        "description": "Maximum number of members to fetch (max 1000)",
                        "minimum": 1,
                        "maximum": 1000,
                    },
                }),
                &[],
            ),
        ),
        Tool::new(
            "get_user_info",
            "Get information about a Discord user",
            schema(json!({ "user_id": id("Discord user ID") }), &["user_id"]),
        ),
    ]
}

fn roles() -> Vec<Tool> {
    let assignment = json!({
        "server_id": server_id(),
        "user_id": id("User to modify"),
        "role_id": id("Role to add or remove"),
    });
    vec![
        Tool::new(
            "add_role",
            "Add a role to a user",
            schema(assignment.clone(), &["user_id", "role_id"]),
        ),
        Tool::new(
            "remove_role",
            "Remove a role from a user",
            schema(assignment, &["user_id", "role_id"]),
        ),
        Tool::new(
            "create_role",
            "Create a new role in the server",
            schema(
                json!({
                    "server_id": server_id(),
                    "name": text("Name for the new role"),
                    "color": text("Color as hex, e.g. #FF0000 (optional)"),
                    "hoist": flag("Show role members separately in the sidebar (optional)"),
                    "mentionable": flag("Allow anyone to mention this role (optional)"),
                    "permissions": number("Permission bitset (optional)"),
                }),
                &["name"],
            ),
        ),
        Tool::new(
            "delete_role",
            "Delete a role from the server",
            schema(
                json!({
                    "server_id": server_id(),
                    "role_id": id("Role to delete"),
                    "reason": text("Reason for deletion (optional)"),
                }),
                &["role_id"],
            ),
        ),
        Tool::new(
            "list_roles",
            "List the roles of the server, highest first",
            schema(json!({ "server_id": server_id() }), &[]),
        ),
    ]
}

fn channels() -> Vec<Tool> {
    vec![
        Tool::new(
            "create_text_channel",
            "Create a new text channel",
            schema(
                json!({
                    "server_id": server_id(),
                    "name": text("Channel name"),
                    "category_id": id("Optional category ID to place the channel in"),
                    "topic": text("Optional channel topic"),
                }),
                &["name"],
            ),
        ),
        Tool::new(
            "delete_channel",
            "Delete a channel",
            schema(
                json!({
                    "channel_id": id("ID of channel to delete"),
                    "reason": text("Reason for deletion"),
                }),
                &["channel_id"],
            ),
        ),
        Tool::new(
            "create_thread",
            "Create a thread in a text channel, optionally from a message",
            schema(
                json!({
                    "channel_id": id("ID of the text channel to create the thread in"),
                    "name": text("Thread name"),
                    "message_id": id("Message to start the thread from (optional, otherwise a public thread)"),
                    "auto_archive_duration": {
                        "type": "number",
                        "description": "Minutes of inactivity before the thread archives (default 1440)",
                        "enum": [60, 1440, 4320, 10080],
                    },
                }),
                &["channel_id", "name"],
            ),
        ),
        Tool::new(
            "set_channel_permissions",
            "Show or hide a channel for a role",
            schema(
                json!({
                    "channel_id": id("ID of the channel"),
                    "role_id": id("Role ID, or 'everyone' for the @everyone role"),
                    "allow_view": flag("Allow (default) or deny viewing the channel"),
                    "modify_everyone": flag("Also update the @everyone overwrite"),
                    "everyone_can_view": flag("With modify_everyone, whether @everyone can view the channel (default false)"),
                }),
                &["channel_id", "role_id"],
            ),
        ),
        Tool::new(
            "create_category",
            "Create a channel category with a default text channel",
            schema(
                json!({
                    "server_id": server_id(),
                    "name": text("Category name"),
                    "position": number("Position of the category (optional)"),
                    "everyone_can_view": flag("Whether @everyone can see the category (default true)"),
                    "restricted_role_id": id("Role that can see the category when it is restricted (optional)"),
                }),
                &["name"],
            ),
        ),
    ]
}

fn members() -> Vec<Tool> {
    vec![
        Tool::new(
            "kick_user",
            "Kick a user from the server",
            schema(
                json!({
                    "server_id": server_id(),
                    "user_id": id("User to kick"),
                    "reason": text("Reason for the kick (optional)"),
                }),
                &["user_id"],
            ),
        ),
        Tool::new(
            "ban_user",
            "Ban a user from the server",
            schema(
                json!({
                    "server_id": server_id(),
                    "user_id": id("User to ban"),
                    "reason": text("Reason for the ban (optional)"),
                    "delete_message_days": {
                        "type": "number",
                        "description": "Days of messages to delete (0-7)",
                        "minimum": 0,
                        "maximum": 7,
                    },
                }),
                &["user_id"],
            ),
        ),
    ]
}

fn unread() -> Vec<Tool> {
    vec![
        Tool::new(
            "wait_for_message",
            "Wait for a Discord message matching filters (channel, DM, mention, sender, content, timeout)",
            schema(
                json!({
                    "channel_id": id("Channel ID to filter (optional)"),
                    "dm_only": flag("Only match DMs (optional)"),
                    "mention_only": flag("Only match messages mentioning the bot (optional)"),
                    "sender_id": id("Only match messages from this user ID (optional)"),
                    "content_regex": text("Regex to search message content for (optional)"),
                    "timeout": number("Timeout in seconds (optional, waits indefinitely when absent)"),
                }),
                &[],
            ),
        ),
        Tool::new(
            "get_unread_messages",
            "Get unread messages in a channel since a given message ID (optional). Returns messages newer than since_message_id, oldest first, up to limit; without it the most recent messages, newest first. Supports filtering by sender, mention, DM, and content regex.",
            schema(
                json!({
                    "channel_id": id("Discord channel ID"),
                    "since_message_id": id("Only return messages after this message ID (optional)"),
                    "limit": {
                        "type": "number",
                        "description": "Number of messages to fetch (max 100)",
                        "minimum": 1,
                        "maximum": 100,
                    },
                    "sender_id": id("Only return messages from this user ID (optional)"),
                    "mention_only": flag("Only return messages mentioning the bot (optional)"),
                    "dm_only": flag("Only return DMs (optional)"),
                    "content_regex": text("Regex to search message content for (optional)"),
                }),
                &["channel_id"],
            ),
        ),
    ]
}

fn status() -> Vec<Tool> {
    vec![
        Tool::new(
            "set_agent_status",
            "Set the agent's status (available, working, offline, etc.) and update Discord presence",
            schema(
                json!({
                    "status": text("Agent status: available, working, offline, etc."),
                    "details": text("Optional custom status message or activity"),
                }),
                &["status"],
            ),
        ),
        Tool::new(
            "check_connection",
            "Check the Discord bot connection status and return diagnostic information",
            schema(json!({}), &[]),
        ),
    ]
}
