//! Discord REST client.
//!
//! Thin typed wrappers over the v10 routes the bridge uses. Every call is a
//! single request: rate limits are surfaced as `RateLimited`, never retried
//! here.

use crate::error::{DiscordError, DiscordResult};
use crate::events::RateLimitInfo;
use crate::model::{
    WireChannel, WireGuild, WireMember, WireMessage, WireRole, WireUser, CHANNEL_GUILD_CATEGORY,
    CHANNEL_GUILD_TEXT, CHANNEL_PUBLIC_THREAD,
};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, ClientBuilder, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

pub const DEFAULT_API_BASE: &str = "https://discord.com/api/v10";

/// Discord caps one history page at 100 messages.
pub const MAX_HISTORY_PAGE: usize = 100;
/// Discord caps one member page at 1000 members.
pub const MAX_MEMBER_PAGE: usize = 1000;

/// Thread auto-archive durations Discord accepts, in minutes.
pub const THREAD_ARCHIVE_MINUTES: [u32; 4] = [60, 1440, 4320, 10080];

/// Overwrite target kind for roles; members use 1.
pub const OVERWRITE_ROLE: u8 = 0;

#[derive(Debug, Clone, Default)]
pub struct NewRole {
    pub name: String,
    pub color: Option<u32>,
    pub hoist: Option<bool>,
    pub mentionable: Option<bool>,
    pub permissions: Option<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct NewChannel {
    pub name: String,
    pub kind: u8,
    pub parent_id: Option<String>,
    pub topic: Option<String>,
    pub position: Option<i64>,
    pub permission_overwrites: Vec<PermissionOverwrite>,
}

impl NewChannel {
    pub fn text(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: CHANNEL_GUILD_TEXT,
            ..Self::default()
        }
    }

    pub fn category(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: CHANNEL_GUILD_CATEGORY,
            ..Self::default()
        }
    }
}

/// Allow and deny bitsets for one role or member on one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionOverwrite {
    pub id: String,
    pub kind: u8,
    pub allow: u64,
    pub deny: u64,
}

impl PermissionOverwrite {
    pub fn role(id: &str, allow: u64, deny: u64) -> Self {
        Self {
            id: id.to_string(),
            kind: OVERWRITE_ROLE,
            allow,
            deny,
        }
    }

    /// Permission bitsets travel as strings.
    pub fn to_json(&self) -> Value {
        json!({
            "id": self.id,
            "type": self.kind,
            "allow": self.allow.to_string(),
            "deny": self.deny.to_string(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct NewThread {
    pub name: String,
    pub auto_archive_minutes: u32,
    /// Starts the thread from this message instead of as a standalone
    /// public thread.
    pub message_id: Option<String>,
}

impl NewThread {
    fn body(&self) -> Value {
        let mut body = json!({
            "name": self.name,
            "auto_archive_duration": self.auto_archive_minutes,
        });
        if self.message_id.is_none() {
            body["type"] = json!(CHANNEL_PUBLIC_THREAD);
        }
        body
    }
}

/// A file to attach to a new message.
#[derive(Debug, Clone)]
pub struct NewFile {
    pub filename: String,
    pub bytes: Vec<u8>,
}

enum Payload {
    Json(Value),
    Multipart(Form),
}

/// `payload_json` part of a single-file upload.
fn upload_payload(content: &str, filename: &str) -> Value {
    let mut payload = json!({
        "attachments": [{ "id": 0, "filename": filename }],
    });
    if !content.is_empty() {
        payload["content"] = json!(content);
    }
    payload
}

pub struct DiscordApiClient {
    http: Client,
    token: String,
    base_url: Url,
}

impl DiscordApiClient {
    pub fn new(token: &str, api_base: &str) -> DiscordResult<Self> {
        let base = api_base.trim().trim_end_matches('/');
        Ok(Self {
            http: Self::build_client()?,
            token: token.trim().to_string(),
            base_url: Url::parse(&format!("{}/", base))?,
        })
    }

    fn build_client() -> reqwest::Result<Client> {
        ClientBuilder::new()
            .pool_idle_timeout(Duration::from_secs(600))
            .pool_max_idle_per_host(10)
            .tcp_keepalive(Some(Duration::from_secs(30)))
            .timeout(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(30))
            .user_agent(concat!("DiscordBot (dmcp, ", env!("CARGO_PKG_VERSION"), ")"))
            .build()
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str().trim_end_matches('/')
    }

    /// Joins `segments` onto the API base, percent-encoding each one.
    pub fn endpoint(&self, segments: &[&str]) -> DiscordResult<Url> {
        let mut url = self.base_url.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| url::ParseError::RelativeUrlWithCannotBeABaseBase)?;
            path.pop_if_empty();
            path.extend(segments);
        }
        Ok(url)
    }

    async fn send(
        &self,
        method: Method,
        segments: &[&str],
        query: &[(&str, String)],
        body: Option<Payload>,
        reason: Option<&str>,
    ) -> DiscordResult<Response> {
        let route = format!("/{}", segments.join("/"));
        let url = self.endpoint(segments)?;

        debug!(method = %method, route = %route, "discord request");

        let mut request = self
            .http
            .request(method, url)
            .header("Authorization", format!("Bot {}", self.token));
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(reason) = reason {
            request = request.header("X-Audit-Log-Reason", encode_reason(reason));
        }
        match body {
            Some(Payload::Json(body)) => request = request.json(&body),
            Some(Payload::Multipart(form)) => request = request.multipart(form),
            None => {}
        }

        let resp = request.send().await?;

        let rate_limit = RateLimitInfo::from_headers(resp.headers());
        if rate_limit.is_exhausted() {
            warn!(
                route = %route,
                bucket = ?rate_limit.bucket,
                wait_ms = ?rate_limit.retry_after_ms(),
                "Discord rate limit bucket exhausted"
            );
        }

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let body = resp.text().await.unwrap_or_default();
        Err(match status {
            StatusCode::NOT_FOUND => DiscordError::NotFound { route },
            StatusCode::FORBIDDEN => DiscordError::Forbidden { route },
            StatusCode::TOO_MANY_REQUESTS => DiscordError::RateLimited {
                route,
                retry_after_ms: retry_after_from_body(&body)
                    .or_else(|| rate_limit.retry_after_ms())
                    .unwrap_or(1000),
            },
            _ => DiscordError::Api {
                route,
                status: status.as_u16(),
                body,
            },
        })
    }

    async fn json<T: DeserializeOwned>(
        &self,
        method: Method,
        segments: &[&str],
        query: &[(&str, String)],
        body: Option<Value>,
        reason: Option<&str>,
    ) -> DiscordResult<T> {
        let resp = self
            .send(method, segments, query, body.map(Payload::Json), reason)
            .await?;
        Self::decode(resp, segments).await
    }

    async fn decode<T: DeserializeOwned>(resp: Response, segments: &[&str]) -> DiscordResult<T> {
        let text = resp.text().await?;
        serde_json::from_str(&text)
            .map_err(|e| DiscordError::decode(format!("/{}", segments.join("/")), e))
    }

    async fn empty(
        &self,
        method: Method,
        segments: &[&str],
        body: Option<Value>,
        reason: Option<&str>,
    ) -> DiscordResult<()> {
        self.send(method, segments, &[], body.map(Payload::Json), reason)
            .await?;
        Ok(())
    }

    // Users

    pub async fn current_user(&self) -> DiscordResult<WireUser> {
        self.json(Method::GET, &["users", "@me"], &[], None, None)
            .await
    }

    pub async fn get_user(&self, user_id: &str) -> DiscordResult<WireUser> {
        self.json(Method::GET, &["users", user_id], &[], None, None)
            .await
    }

    // Channels and messages

    pub async fn get_channel(&self, channel_id: &str) -> DiscordResult<WireChannel> {
        self.json(Method::GET, &["channels", channel_id], &[], None, None)
            .await
    }

    /// One history page. With `after` Discord returns the oldest `limit`
    /// messages past it; without, the newest `limit`. Either way the page is
    /// ordered newest first.
    pub async fn get_messages(
        &self,
        channel_id: &str,
        after: Option<&str>,
        limit: usize,
    ) -> DiscordResult<Vec<WireMessage>> {
        let mut query = vec![("limit", limit.clamp(1, MAX_HISTORY_PAGE).to_string())];
        if let Some(after) = after {
            query.push(("after", after.to_string()));
        }
        self.json(
            Method::GET,
            &["channels", channel_id, "messages"],
            &query,
            None,
            None,
        )
        .await
    }

    pub async fn get_message(
        &self,
        channel_id: &str,
        message_id: &str,
    ) -> DiscordResult<WireMessage> {
        self.json(
            Method::GET,
            &["channels", channel_id, "messages", message_id],
            &[],
            None,
            None,
        )
        .await
    }

    pub async fn create_message(
        &self,
        channel_id: &str,
        content: &str,
    ) -> DiscordResult<WireMessage> {
        self.json(
            Method::POST,
            &["channels", channel_id, "messages"],
            &[],
            Some(json!({ "content": content })),
            None,
        )
        .await
    }

    pub async fn delete_message(
        &self,
        channel_id: &str,
        message_id: &str,
        reason: Option<&str>,
    ) -> DiscordResult<()> {
        self.empty(
            Method::DELETE,
            &["channels", channel_id, "messages", message_id],
            None,
            reason,
        )
        .await
    }

    pub async fn delete_channel(&self, channel_id: &str, reason: Option<&str>) -> DiscordResult<()> {
        self.empty(Method::DELETE, &["channels", channel_id], None, reason)
            .await
    }

    /// Sends `content` with one attached file.
    pub async fn upload_file(
        &self,
        channel_id: &str,
        content: &str,
        file: NewFile,
    ) -> DiscordResult<WireMessage> {
        let payload = upload_payload(content, &file.filename);
        let form = Form::new()
            .text("payload_json", payload.to_string())
            .part("files[0]", Part::bytes(file.bytes).file_name(file.filename));
        let segments = ["channels", channel_id, "messages"];
        let resp = self
            .send(
                Method::POST,
                &segments,
                &[],
                Some(Payload::Multipart(form)),
                None,
            )
            .await?;
        Self::decode(resp, &segments).await
    }

    pub async fn create_thread(
        &self,
        channel_id: &str,
        thread: &NewThread,
        reason: Option<&str>,
    ) -> DiscordResult<WireChannel> {
        let body = Some(thread.body());
        match &thread.message_id {
            Some(message_id) => {
                self.json(
                    Method::POST,
                    &["channels", channel_id, "messages", message_id.as_str(), "threads"],
                    &[],
                    body,
                    reason,
                )
                .await
            }
            None => {
                self.json(
                    Method::POST,
                    &["channels", channel_id, "threads"],
                    &[],
                    body,
                    reason,
                )
                .await
            }
        }
    }

    /// Replaces the whole overwrite for `overwrite.id` on the channel.
    pub async fn edit_channel_permissions(
        &self,
        channel_id: &str,
        overwrite: &PermissionOverwrite,
        reason: Option<&str>,
    ) -> DiscordResult<()> {
        let mut body = overwrite.to_json();
        if let Some(fields) = body.as_object_mut() {
            fields.remove("id");
        }
        self.empty(
            Method::PUT,
            &["channels", channel_id, "permissions", overwrite.id.as_str()],
            Some(body),
            reason,
        )
        .await
    }

    // Reactions

    pub async fn add_reaction(
        &self,
        channel_id: &str,
        message_id: &str,
        emoji: &str,
    ) -> DiscordResult<()> {
        self.empty(
            Method::PUT,
            &["channels", channel_id, "messages", message_id, "reactions", emoji, "@me"],
            None,
            None,
        )
        .await
    }

    pub async fn remove_own_reaction(
        &self,
        channel_id: &str,
        message_id: &str,
        emoji: &str,
    ) -> DiscordResult<()> {
        self.empty(
            Method::DELETE,
            &["channels", channel_id, "messages", message_id, "reactions", emoji, "@me"],
            None,
            None,
        )
        .await
    }

    // Guilds

    pub async fn get_guild(&self, guild_id: &str) -> DiscordResult<WireGuild> {
        self.json(
            Method::GET,
            &["guilds", guild_id],
            &[("with_counts", "true".to_string())],
            None,
            None,
        )
        .await
    }

    pub async fn get_guild_channels(&self, guild_id: &str) -> DiscordResult<Vec<WireChannel>> {
        self.json(Method::GET, &["guilds", guild_id, "channels"], &[], None, None)
            .await
    }

    pub async fn create_guild_channel(
        &self,
        guild_id: &str,
        channel: &NewChannel,
        reason: Option<&str>,
    ) -> DiscordResult<WireChannel> {
        let mut body = json!({
            "name": channel.name,
            "type": channel.kind,
        });
        if let Some(parent) = &channel.parent_id {
            body["parent_id"] = json!(parent);
        }
        if let Some(topic) = &channel.topic {
            body["topic"] = json!(topic);
        }
        if let Some(position) = channel.position {
            body["position"] = json!(position);
        }
        if !channel.permission_overwrites.is_empty() {
            body["permission_overwrites"] = channel
                .permission_overwrites
                .iter()
                .map(PermissionOverwrite::to_json)
                .collect();
        }
        self.json(
            Method::POST,
            &["guilds", guild_id, "channels"],
            &[],
            Some(body),
            reason,
        )
        .await
    }

    pub async fn list_members(&self, guild_id: &str, limit: usize) -> DiscordResult<Vec<WireMember>> {
        self.json(
            Method::GET,
            &["guilds", guild_id, "members"],
            &[("limit", limit.clamp(1, MAX_MEMBER_PAGE).to_string())],
            None,
            None,
        )
        .await
    }

    pub async fn get_member(&self, guild_id: &str, user_id: &str) -> DiscordResult<WireMember> {
        self.json(
            Method::GET,
            &["guilds", guild_id, "members", user_id],
            &[],
            None,
            None,
        )
        .await
    }

    /// `until` is an RFC 3339 instant; `None` lifts an existing timeout.
    pub async fn timeout_member(
        &self,
        guild_id: &str,
        user_id: &str,
        until: Option<&str>,
        reason: Option<&str>,
    ) -> DiscordResult<()> {
        self.empty(
            Method::PATCH,
            &["guilds", guild_id, "members", user_id],
            Some(json!({ "communication_disabled_until": until })),
            reason,
        )
        .await
    }

    pub async fn kick_member(
        &self,
        guild_id: &str,
        user_id: &str,
        reason: Option<&str>,
    ) -> DiscordResult<()> {
        self.empty(
            Method::DELETE,
            &["guilds", guild_id, "members", user_id],
            None,
            reason,
        )
        .await
    }

    pub async fn ban_member(
        &self,
        guild_id: &str,
        user_id: &str,
        delete_message_days: u32,
        reason: Option<&str>,
    ) -> DiscordResult<()> {
        let seconds = u64::from(delete_message_days.min(7)) * 86_400;
        self.empty(
            Method::PUT,
            &["guilds", guild_id, "bans", user_id],
            Some(json!({ "delete_message_seconds": seconds })),
            reason,
        )
        .await
    }

    // Roles

    pub async fn get_roles(&self, guild_id: &str) -> DiscordResult<Vec<WireRole>> {
        self.json(Method::GET, &["guilds", guild_id, "roles"], &[], None, None)
            .await
    }

    pub async fn create_role(
        &self,
        guild_id: &str,
        role: &NewRole,
        reason: Option<&str>,
    ) -> DiscordResult<WireRole> {
        let mut body = json!({ "name": role.name });
        if let Some(color) = role.color {
            body["color"] = json!(color);
        }
        if let Some(hoist) = role.hoist {
            body["hoist"] = json!(hoist);
        }
        if let Some(mentionable) = role.mentionable {
            body["mentionable"] = json!(mentionable);
        }
        if let Some(permissions) = role.permissions {
            // Permission bitsets travel as strings.
            body["permissions"] = json!(permissions.to_string());
        }
        self.json(
            Method::POST,
            &["guilds", guild_id, "roles"],
            &[],
            Some(body),
            reason,
        )
        .await
    }

    pub async fn delete_role(
        &self,
        guild_id: &str,
        role_id: &str,
        reason: Option<&str>,
    ) -> DiscordResult<()> {
        self.empty(
            Method::DELETE,
            &["guilds", guild_id, "roles", role_id],
            None,
            reason,
        )
        .await
    }

    pub async fn add_member_role(
        &self,
        guild_id: &str,
        user_id: &str,
        role_id: &str,
        reason: Option<&str>,
    ) -> DiscordResult<()> {
        self.empty(
            Method::PUT,
            &["guilds", guild_id, "members", user_id, "roles", role_id],
            None,
            reason,
        )
        .await
    }

    pub async fn remove_member_role(
        &self,
        guild_id: &str,
        user_id: &str,
        role_id: &str,
        reason: Option<&str>,
    ) -> DiscordResult<()> {
        self.empty(
            Method::DELETE,
            &["guilds", guild_id, "members", user_id, "roles", role_id],
            None,
            reason,
        )
        .await
    }

    // Attachments

    /// Fetches a CDN url. No bot token is sent off the API host.
    pub async fn download(&self, url: &str) -> DiscordResult<Vec<u8>> {
        let resp = self.http.get(url).send().await?.error_for_status()?;
        Ok(resp.bytes().await?.to_vec())
    }
}

/// Audit log reasons travel percent-encoded in a header.
fn encode_reason(reason: &str) -> String {
    url::form_urlencoded::byte_serialize(reason.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

fn retry_after_from_body(body: &str) -> Option<u64> {
    let value: Value = serde_json::from_str(body).ok()?;
    let secs = value.get("retry_after")?.as_f64()?;
    Some((secs * 1000.0) as u64)
}
