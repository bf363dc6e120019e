//! REST and gateway object shapes, trimmed to the fields this bridge reads.

use chrono::{DateTime, SecondsFormat, Utc};
use dmcp_ipc::{Author, Identity, RawMessage};
use serde::{Deserialize, Serialize};

/// Milliseconds between the Unix epoch and the first second of 2015.
pub const DISCORD_EPOCH_MS: u64 = 1_420_070_400_000;

pub const CHANNEL_GUILD_TEXT: u8 = 0;
pub const CHANNEL_DM: u8 = 1;
pub const CHANNEL_GUILD_VOICE: u8 = 2;
pub const CHANNEL_GROUP_DM: u8 = 3;
pub const CHANNEL_GUILD_CATEGORY: u8 = 4;
pub const CHANNEL_PUBLIC_THREAD: u8 = 11;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireUser {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub discriminator: Option<String>,
    #[serde(default)]
    pub global_name: Option<String>,
    #[serde(default)]
    pub bot: bool,
}

impl WireUser {
    pub fn to_author(&self) -> Author {
        Author {
            id: self.id.clone(),
            username: self.username.clone(),
            discriminator: self.discriminator.clone(),
            bot: self.bot,
        }
    }

    pub fn to_identity(&self) -> Identity {
        Identity {
            id: self.id.clone(),
            username: self.username.clone(),
            discriminator: self.discriminator.clone(),
        }
    }

    pub fn display_name(&self) -> String {
        self.to_author().display_name()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireMessage {
    pub id: String,
    pub channel_id: String,
    /// Present on gateway events; REST history omits it.
    #[serde(default)]
    pub guild_id: Option<String>,
    pub author: WireUser,
    #[serde(default)]
    pub content: String,
    pub timestamp: String,
    #[serde(default)]
    pub mentions: Vec<WireUser>,
    #[serde(default)]
    pub reactions: Vec<WireReaction>,
    #[serde(default)]
    pub attachments: Vec<WireAttachment>,
}

impl WireMessage {
    pub fn to_raw(&self) -> RawMessage {
        RawMessage {
            id: self.id.clone(),
            channel_id: self.channel_id.clone(),
            guild_id: self.guild_id.clone(),
            author: self.author.to_author(),
            content: self.content.clone(),
            timestamp: self.timestamp.clone(),
            mentions: self.mentions.iter().map(|u| u.id.clone()).collect(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireReaction {
    pub count: u64,
    pub emoji: WireEmoji,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireEmoji {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

impl WireEmoji {
    /// Unicode emoji have only a name; deleted custom emoji only an id.
    pub fn label(&self) -> String {
        self.name
            .clone()
            .filter(|name| !name.is_empty())
            .or_else(|| self.id.clone())
            .unwrap_or_else(|| "?".to_string())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireAttachment {
    pub id: String,
    pub filename: String,
    pub size: u64,
    pub url: String,
    #[serde(default)]
    pub content_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireChannel {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: u8,
    #[serde(default)]
    pub guild_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub position: Option<i64>,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub topic: Option<String>,
}

impl WireChannel {
    pub fn is_category(&self) -> bool {
        self.kind == CHANNEL_GUILD_CATEGORY
    }

    pub fn is_text(&self) -> bool {
        self.kind == CHANNEL_GUILD_TEXT
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("unnamed")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireGuild {
    pub id: String,
    pub name: String,
    pub owner_id: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub premium_tier: u8,
    #[serde(default)]
    pub explicit_content_filter: u8,
    #[serde(default)]
    pub approximate_member_count: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireRole {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub color: u32,
    #[serde(default)]
    pub position: i64,
    #[serde(default)]
    pub hoist: bool,
    #[serde(default)]
    pub mentionable: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireMember {
    #[serde(default)]
    pub user: Option<WireUser>,
    #[serde(default)]
    pub nick: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub joined_at: Option<String>,
}

/// Creation instant encoded in a snowflake, RFC 3339.
pub fn snowflake_created_at(id: &str) -> Option<String> {
    let raw: u64 = id.trim().parse().ok()?;
    let millis = (raw >> 22).checked_add(DISCORD_EPOCH_MS)?;
    let instant = DateTime::<Utc>::from_timestamp_millis(i64::try_from(millis).ok()?)?;
    Some(instant.to_rfc3339_opts(SecondsFormat::Millis, false))
}

pub fn explicit_content_filter_name(level: u8) -> &'static str {
    match level {
        0 => "disabled",
        1 => "no_role",
        2 => "all_members",
        _ => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_message_normalises_to_raw() {
        let message: WireMessage = serde_json::from_str(
            r#"{
                "id": "103",
                "channel_id": "10",
                "author": {"id": "1", "username": "alice", "discriminator": "0"},
                "content": "hi <@42>",
                "timestamp": "2024-05-01T10:00:00.000000+00:00",
                "mentions": [{"id": "42", "username": "helper", "bot": true}],
                "reactions": [{"count": 2, "emoji": {"id": null, "name": "👍"}}]
            }"#,
        )
        .expect("message");

        let raw = message.to_raw();
        assert_eq!(raw.id, "103");
        assert!(raw.guild_id.is_none());
        assert_eq!(raw.author.display_name(), "alice");
        assert!(raw.mentions_user("42"));
        assert_eq!(message.reactions[0].emoji.label(), "👍");
        assert!(message.attachments.is_empty());
    }

    #[test]
    fn custom_emoji_without_name_uses_id() {
        let emoji = WireEmoji {
            id: Some("555".into()),
            name: None,
        };
        assert_eq!(emoji.label(), "555");
    }

    #[test]
    fn snowflake_timestamp_decodes() {
        // 175928847299117063 is the documented example: 2016-04-30T11:18:25.796Z
        assert_eq!(
            snowflake_created_at("175928847299117063").as_deref(),
            Some("2016-04-30T11:18:25.796+00:00")
        );
        assert!(snowflake_created_at("not-a-number").is_none());
    }

    #[test]
    fn legacy_discriminator_is_kept_in_display_name() {
        let user = WireUser {
            id: "1".into(),
            username: "bob".into(),
            discriminator: Some("1234".into()),
            global_name: None,
            bot: false,
        };
        assert_eq!(user.display_name(), "bob#1234");
    }
}
