use crate::api::{DiscordApiClient, DEFAULT_API_BASE};
use crate::error::{DiscordError, DiscordResult};
use crate::gateway::{GatewayCommand, GatewayConfig, GatewaySession, COMMAND_QUEUE_CAPACITY};
use crate::model::WireMessage;
use crate::state::{AgentStatus, ConnectionState};
use async_trait::async_trait;
use dmcp_core::{ChatClient, CoreResult, HistoryQuery, Snowflake};
use dmcp_ipc::{Envelope, EventBus, Identity, RawMessage};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

pub const DEFAULT_GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=10&encoding=json";

/// GUILDS, GUILD_MEMBERS, GUILD_MESSAGES, DIRECT_MESSAGES, MESSAGE_CONTENT.
pub const DEFAULT_INTENTS: u64 = 37379;

#[derive(Debug, Clone)]
pub struct DiscordSettings {
    pub token: String,
    pub api_base: String,
    pub gateway_url: String,
    pub intents: u64,
}

impl DiscordSettings {
    pub fn new(token: &str) -> Self {
        Self {
            token: token.to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
            gateway_url: DEFAULT_GATEWAY_URL.to_string(),
            intents: DEFAULT_INTENTS,
        }
    }
}

/// REST client, live event stream and session state behind one handle.
///
/// Built together with the [`GatewaySession`] that feeds it; the caller
/// decides where the session runs.
pub struct DiscordClient {
    api: Arc<DiscordApiClient>,
    bus: EventBus,
    state: Arc<ConnectionState>,
    commands: mpsc::Sender<GatewayCommand>,
    /// Channel id to owning guild, `None` for DMs. Channels never move
    /// between guilds, so entries never go stale.
    channel_guilds: RwLock<HashMap<Snowflake, Option<String>>>,
}

impl DiscordClient {
    pub fn connect(settings: &DiscordSettings) -> DiscordResult<(Self, GatewaySession)> {
        let api = Arc::new(DiscordApiClient::new(&settings.token, &settings.api_base)?);
        let bus = EventBus::new();
        let state = Arc::new(ConnectionState::new());
        let (commands, command_rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);

        let session = GatewaySession::new(
            GatewayConfig {
                token: settings.token.clone(),
                gateway_url: settings.gateway_url.clone(),
                intents: settings.intents,
            },
            bus.clone(),
            Arc::clone(&state),
            command_rx,
        );

        let client = Self {
            api,
            bus,
            state,
            commands,
            channel_guilds: RwLock::new(HashMap::new()),
        };
        Ok((client, session))
    }

    pub fn api(&self) -> &DiscordApiClient {
        &self.api
    }

    pub fn state(&self) -> &Arc<ConnectionState> {
        &self.state
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Records the status and queues the matching presence update. The
    /// status is kept even when the gateway cannot take the update.
    pub fn set_agent_status(&self, status: AgentStatus) -> DiscordResult<()> {
        let presence = status.presence();
        self.state.set_agent_status(status);
        self.commands
            .try_send(GatewayCommand::UpdatePresence(presence))
            .map_err(|e| {
                warn!(error = %e, "presence update not queued");
                DiscordError::NotConnected
            })
    }

    async fn channel_guild(&self, channel: Snowflake) -> CoreResult<Option<String>> {
        let cached = self
            .channel_guilds
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(&channel)
            .cloned();
        if let Some(guild) = cached {
            return Ok(guild);
        }

        let id = channel.to_string();
        let resolved = self
            .api
            .get_channel(&id)
            .await
            .map_err(|e| e.into_channel_error(&id))?;
        self.channel_guilds
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(channel, resolved.guild_id.clone());
        Ok(resolved.guild_id)
    }
}

#[async_trait]
impl ChatClient for DiscordClient {
    /// History pages carry no guild id, so it is filled in from the channel.
    async fn fetch_history(
        &self,
        channel: Snowflake,
        query: HistoryQuery,
    ) -> CoreResult<Vec<RawMessage>> {
        let guild_id = self.channel_guild(channel).await?;

        let id = channel.to_string();
        let after = query.after.map(|s| s.to_string());
        let page = self
            .api
            .get_messages(&id, after.as_deref(), query.limit)
            .await
            .map_err(|e| e.into_channel_error(&id))?;
        debug!(channel = %channel, fetched = page.len(), "history page");

        Ok(with_channel_guild(&page, guild_id.as_deref()))
    }

    fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.bus.subscribe()
    }

    fn current_identity(&self) -> Option<Identity> {
        self.state.identity()
    }
}

/// Converts a history page, filling the guild id only where the payload
/// left it out.
fn with_channel_guild(page: &[WireMessage], guild_id: Option<&str>) -> Vec<RawMessage> {
    page.iter()
        .map(|message| {
            let mut raw = message.to_raw();
            if raw.guild_id.is_none() {
                raw.guild_id = guild_id.map(str::to_string);
            }
            raw
        })
        .collect()
}
