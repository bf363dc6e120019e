//! Plain-text renderings returned by the tools.

use dmcp_core::Message;
use dmcp_discord::model::{
    explicit_content_filter_name, snowflake_created_at, WireAttachment, WireChannel, WireGuild,
    WireMember, WireMessage, WireRole, WireUser, CHANNEL_GUILD_CATEGORY, CHANNEL_GUILD_TEXT,
    CHANNEL_GUILD_VOICE,
};
use dmcp_discord::ConnectionSnapshot;
use std::fmt::Write;

pub const MISSING_SERVER: &str = "Error: No server ID provided and no default server ID set. Set DEFAULT_SERVER_ID environment variable or provide server_id in the request.";

pub fn unread_messages(messages: &[Message]) -> String {
    let body = messages
        .iter()
        .map(Message::to_string)
        .collect::<Vec<_>>()
        .join("\n");
    format!("Unread messages ({}):\n\n{}", messages.len(), body)
}

pub fn read_messages(messages: &[WireMessage]) -> String {
    let body = messages
        .iter()
        .map(|m| {
            let reactions = if m.reactions.is_empty() {
                "No reactions".to_string()
            } else {
                m.reactions
                    .iter()
                    .map(|r| format!("{}({})", r.emoji.label(), r.count))
                    .collect::<Vec<_>>()
                    .join(", ")
            };
            format!(
                "ID: {}\n{} ({}): {}\nReactions: {}",
                m.id,
                m.author.display_name(),
                m.timestamp,
                m.content,
                reactions
            )
        })
        .collect::<Vec<_>>()
        .join("\n");
    format!("Retrieved {} messages:\n\n{}", messages.len(), body)
}

pub fn user_info(user: &WireUser) -> String {
    format!(
        "User information:\nName: {}#{}\nID: {}\nBot: {}\nCreated: {}",
        user.username,
        user.discriminator.as_deref().unwrap_or("0"),
        user.id,
        user.bot,
        snowflake_created_at(&user.id).unwrap_or_else(|| "unknown".to_string())
    )
}

pub fn server_info(guild: &WireGuild, channels: &[WireChannel]) -> String {
    let mut out = String::from("Server Information:\n");
    let fields = [
        ("name", guild.name.clone()),
        ("id", guild.id.clone()),
        ("owner_id", guild.owner_id.clone()),
        (
            "member_count",
            guild
                .approximate_member_count
                .map(|c| c.to_string())
                .unwrap_or_else(|| "unknown".to_string()),
        ),
        (
            "created_at",
            snowflake_created_at(&guild.id).unwrap_or_else(|| "unknown".to_string()),
        ),
        (
            "description",
            guild.description.clone().unwrap_or_else(|| "None".to_string()),
        ),
        ("premium_tier", guild.premium_tier.to_string()),
        (
            "explicit_content_filter",
            explicit_content_filter_name(guild.explicit_content_filter).to_string(),
        ),
    ];
    for (key, value) in fields {
        let _ = writeln!(out, "{}: {}", key, value);
    }

    let mut categories: Vec<&WireChannel> = channels
        .iter()
        .filter(|c| c.kind == CHANNEL_GUILD_CATEGORY)
        .collect();
    categories.sort_by_key(|c| c.position.unwrap_or_default());

    out.push_str("\nCategories:");
    for category in categories {
        let _ = write!(out, "\n  {} (ID: {})", category.display_name(), category.id);
    }

    out.push_str("\n\nText Channels:");
    for channel in channels.iter().filter(|c| c.kind == CHANNEL_GUILD_TEXT) {
        let _ = write!(
            out,
            "\n  #{} (ID: {}, Category: {})",
            channel.display_name(),
            channel.id,
            channel.parent_id.as_deref().unwrap_or("None")
        );
    }

    out.push_str("\n\nVoice Channels:");
    for channel in channels.iter().filter(|c| c.kind == CHANNEL_GUILD_VOICE) {
        let _ = write!(
            out,
            "\n  🔊 {} (ID: {}, Category: {})",
            channel.display_name(),
            channel.id,
            channel.parent_id.as_deref().unwrap_or("None")
        );
    }
    out
}

pub fn members(members: &[WireMember]) -> String {
    let lines = members
        .iter()
        .filter_map(|m| {
            let user = m.user.as_ref()?;
            Some(format!(
                "{} (ID: {}, Roles: {})",
                user.username,
                user.id,
                m.roles.join(", ")
            ))
        })
        .collect::<Vec<_>>();
    format!("Server Members ({}):\n{}", lines.len(), lines.join("\n"))
}

/// Highest position first, the order Discord shows them in.
pub fn roles(roles: &[WireRole]) -> String {
    let mut sorted: Vec<&WireRole> = roles.iter().collect();
    sorted.sort_by(|a, b| b.position.cmp(&a.position));

    let mut out = String::from("Server Roles:\n");
    for role in sorted {
        let _ = writeln!(
            out,
            "- {} (ID: {}, Position: {})",
            role.name, role.id, role.position
        );
    }
    out
}

pub fn attachments(attachments: &[WireAttachment]) -> String {
    if attachments.is_empty() {
        return "No attachments found in this message.".to_string();
    }
    let mut out = format!("Found {} attachments:\n", attachments.len());
    for att in attachments {
        let _ = writeln!(
            out,
            "- {} ({} bytes, {})",
            att.filename,
            att.size,
            att.content_type.as_deref().unwrap_or("unknown")
        );
        let _ = writeln!(out, "  URL: {}", att.url);
    }
    out
}

pub fn connection_status(snapshot: &ConnectionSnapshot) -> String {
    let bot_user = snapshot
        .identity
        .as_ref()
        .map(|i| i.display_name())
        .unwrap_or_else(|| "None".to_string());
    let mut out = format!(
        "Discord Connection Status:\n- Discord client exists: true\n- Discord client ready: {}\n- Bot user: {}\n- Connected to {} servers\n- Agent status: {}",
        snapshot.ready, bot_user, snapshot.guild_count, snapshot.agent_status.status
    );
    if let Some(details) = &snapshot.agent_status.details {
        let _ = write!(out, " ({})", details);
    }
    out
}

/// Reason used for an action when the caller gave none.
pub fn reason_or<'a>(given: Option<&'a str>, default: &'a str) -> &'a str {
    given.filter(|r| !r.trim().is_empty()).unwrap_or(default)
}
